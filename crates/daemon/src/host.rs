// Host collaborators: the editor-side primitives the tools delegate to.
//
// Paths crossing this boundary are workspace-relative strings. `LocalHost`
// serves them from a directory on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use toolbridge_common::path::{normalize_relative, PathError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One child returned by `Host::list_directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self { name: name.into(), kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Diagnostics reported for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDiagnostics {
    pub path: String,
    pub diagnostics: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path `{path}`: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: PathError,
    },

    #[error("`{0}` is not valid UTF-8 text")]
    NotText(String),

    #[error("i/o error on `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not supported by this host")]
    Unsupported(&'static str),

    #[error("command could not be run: {0}")]
    CommandFailed(String),

    #[error("command timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("no workspace is open")]
    NoWorkspace,
}

impl HostError {
    fn io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            Self::NotFound(path.to_string())
        } else {
            Self::Io { path: path.to_string(), source }
        }
    }
}

/// Editor-side capabilities the bridge exposes as tools.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Immediate children of a directory, in no particular order.
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, HostError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), HostError>;

    /// Diagnostic snapshot for one file, or for the whole workspace.
    async fn diagnostics(&self, path: Option<&str>) -> Result<Vec<FileDiagnostics>, HostError>;

    async fn run_command(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, HostError>;

    async fn symbol_info(&self, path: &str, line: u32, character: u32) -> Result<Value, HostError>;

    /// Best-effort visual diff. Never fails.
    fn show_diff(&self, path: &str, before: &str, after: &str);
}

// ── Local host ──────────────────────────────────────────────────────

/// Host backed by a workspace directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalHost {
    root: PathBuf,
}

impl LocalHost {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, HostError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(HostError::NoWorkspace);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, HostError> {
        let relative = normalize_relative(path)
            .map_err(|source| HostError::InvalidPath { path: path.to_string(), source })?;
        if relative.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Host for LocalHost {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, HostError> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir).await.map_err(|e| HostError::io(path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| HostError::io(path, e))? {
            let file_type = entry.file_type().await.map_err(|e| HostError::io(path, e))?;
            // Symlinks are listed but never followed.
            let kind = if file_type.is_dir() { EntryKind::Directory } else { EntryKind::File };
            entries.push(DirEntry::new(entry.file_name().to_string_lossy(), kind));
        }
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file).await.map_err(|e| HostError::io(path, e))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), HostError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| HostError::io(path, e))?;
        }
        tokio::fs::write(&file, contents).await.map_err(|e| HostError::io(path, e))
    }

    async fn diagnostics(&self, _path: Option<&str>) -> Result<Vec<FileDiagnostics>, HostError> {
        Err(HostError::Unsupported("diagnostics"))
    }

    async fn run_command(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, HostError> {
        let dir = match cwd {
            Some(cwd) => self.resolve(cwd)?,
            None => self.root.clone(),
        };

        let mut cmd = shell_command(command);
        cmd.current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command, cwd = %dir.display(), "running command");
        let child = cmd.spawn().map_err(|e| HostError::CommandFailed(e.to_string()))?;

        // Dropping the child on timeout kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(error)) => Err(HostError::CommandFailed(error.to_string())),
            Err(_) => Err(HostError::Timeout(timeout)),
        }
    }

    async fn symbol_info(&self, _path: &str, _line: u32, _character: u32) -> Result<Value, HostError> {
        Err(HostError::Unsupported("symbol info"))
    }

    fn show_diff(&self, path: &str, before: &str, after: &str) {
        info!(
            path,
            before_lines = before.lines().count(),
            after_lines = after.lines().count(),
            "file changed"
        );
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}
