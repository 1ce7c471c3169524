// Entry filtering: fixed excluded names plus the workspace `.gitignore`.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

use crate::host::{Host, HostError};

/// Directory names never listed, regardless of ignore settings.
pub const EXCLUDED_NAMES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    ".cache",
];

/// Ignore file read from the workspace root.
///
/// This is the only ignore file consulted, even when listing a subdirectory.
/// Listed paths are workspace-relative and the root file's anchored patterns
/// (`/gen/`) are relative to the workspace root, so one matcher gives the same
/// answer for a path whether the walk started at `.` or at `src/`. Nested
/// files such as `src/.gitignore` are not read.
pub const IGNORE_FILE: &str = ".gitignore";

pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name)
}

/// Compiled ignore patterns. Paths are workspace-relative.
#[derive(Debug)]
pub struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    pub fn parse(contents: &str) -> Self {
        let mut builder = GitignoreBuilder::new(".");
        for line in contents.lines() {
            if let Err(error) = builder.add_line(None, line) {
                warn!(%error, line, "skipping invalid ignore pattern");
            }
        }
        let matcher = builder.build().unwrap_or_else(|error| {
            warn!(%error, "ignore patterns could not be compiled");
            Gitignore::empty()
        });
        Self { matcher }
    }

    /// Reads the workspace ignore file. A missing or unreadable file yields
    /// `None`.
    pub async fn load(host: &dyn Host) -> Option<Self> {
        match host.read_file(IGNORE_FILE).await {
            Ok(bytes) => {
                debug!(file = IGNORE_FILE, "loaded ignore patterns");
                Some(Self::parse(&String::from_utf8_lossy(&bytes)))
            }
            Err(HostError::NotFound(_)) => None,
            Err(error) => {
                warn!(%error, "ignore file unreadable; listing without it");
                None
            }
        }
    }

    pub fn is_ignored(&self, path: &str, is_dir: bool) -> bool {
        self.matcher.matched_path_or_any_parents(Path::new(path), is_dir).is_ignore()
    }
}
