// Tool registry and handlers.
//
// Bad arguments are protocol errors (INVALID_PARAMS). Failures while doing
// the work, such as a missing file or an unmatched patch, are tool results
// with `isError: true`.

use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use toolbridge_common::patch::{apply_patch, Applied};
use toolbridge_common::path::normalize_relative;
use toolbridge_common::protocol::jsonrpc::RpcError;
use tracing::debug;

use super::Dispatcher;
use crate::config::ToolGroups;
use crate::host::HostError;
use crate::traversal::{self, ListOptions, ListingEntry};

const DEFAULT_SEARCH_RESULTS: usize = 100;
const MAX_SEARCH_RESULTS: usize = 1_000;
/// Longest line echoed back in a search hit.
const MAX_MATCH_LINE_CHARS: usize = 240;

// ── Registry ────────────────────────────────────────────────────────

/// Capability group a tool belongs to. Each can be switched off in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGroup {
    Files,
    Search,
    Diagnostics,
    Shell,
    Symbols,
}

impl ToolGroup {
    pub fn is_enabled(self, groups: &ToolGroups) -> bool {
        match self {
            Self::Files => groups.files,
            Self::Search => groups.search,
            Self::Diagnostics => groups.diagnostics,
            Self::Shell => groups.shell,
            Self::Symbols => groups.symbols,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    ReadFile,
    WriteFile,
    ApplyPatch,
    ListFiles,
    SearchText,
    GetDiagnostics,
    RunCommand,
    GetSymbolInfo,
}

pub struct ToolSpec {
    pub name: &'static str,
    pub group: ToolGroup,
    pub description: &'static str,
    kind: ToolKind,
    schema: fn() -> Value,
}

impl ToolSpec {
    /// Entry for `tools/list`.
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": (self.schema)(),
        })
    }
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "read_file",
        group: ToolGroup::Files,
        description: "Read a text file from the workspace.",
        kind: ToolKind::ReadFile,
        schema: path_schema,
    },
    ToolSpec {
        name: "write_file",
        group: ToolGroup::Files,
        description: "Create or overwrite a text file in the workspace.",
        kind: ToolKind::WriteFile,
        schema: write_file_schema,
    },
    ToolSpec {
        name: "apply_patch",
        group: ToolGroup::Files,
        description: "Replace the region of a file described by `search` with `replace`. \
                      Matching tries an exact match, then ignores indentation, then \
                      matches blocks of 3+ lines by their first and last lines. \
                      An empty `search` replaces the whole file.",
        kind: ToolKind::ApplyPatch,
        schema: apply_patch_schema,
    },
    ToolSpec {
        name: "list_files",
        group: ToolGroup::Files,
        description: "List files under a directory, depth-first, with depth and count limits.",
        kind: ToolKind::ListFiles,
        schema: list_files_schema,
    },
    ToolSpec {
        name: "search_text",
        group: ToolGroup::Search,
        description: "Search workspace files line by line with a regular expression.",
        kind: ToolKind::SearchText,
        schema: search_text_schema,
    },
    ToolSpec {
        name: "get_diagnostics",
        group: ToolGroup::Diagnostics,
        description: "Current diagnostics for one file or the whole workspace.",
        kind: ToolKind::GetDiagnostics,
        schema: diagnostics_schema,
    },
    ToolSpec {
        name: "run_command",
        group: ToolGroup::Shell,
        description: "Run a shell command in the workspace and capture its output.",
        kind: ToolKind::RunCommand,
        schema: run_command_schema,
    },
    ToolSpec {
        name: "get_symbol_info",
        group: ToolGroup::Symbols,
        description: "Symbol information at a position in a file.",
        kind: ToolKind::GetSymbolInfo,
        schema: symbol_info_schema,
    },
];

pub(super) fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

// ── Results ─────────────────────────────────────────────────────────

/// Text result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    text: String,
    is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: false }
    }

    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { text: message.into(), is_error: true }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn into_value(self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

impl From<HostError> for ToolOutput {
    fn from(error: HostError) -> Self {
        Self::error(error.to_string())
    }
}

// ── Arguments ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApplyPatchArgs {
    path: String,
    #[serde(default)]
    search: String,
    replace: String,
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default)]
    path: String,
    #[serde(default = "enabled")]
    recursive: bool,
    #[serde(default = "enabled")]
    respect_ignore: bool,
    max_depth: Option<usize>,
    max_files: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchTextArgs {
    pattern: String,
    #[serde(default)]
    path: String,
    max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DiagnosticsArgs {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
    cwd: Option<String>,
    timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfoArgs {
    path: String,
    line: u32,
    character: u32,
}

fn enabled() -> bool {
    true
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, RpcError> {
    serde_json::from_value(arguments)
        .map_err(|error| RpcError::invalid_params(format!("invalid arguments for {tool}: {error}")))
}

fn normalized(path: &str) -> Result<String, HostError> {
    normalize_relative(path).map_err(|source| HostError::InvalidPath { path: path.to_string(), source })
}

// ── Handlers ────────────────────────────────────────────────────────

impl Dispatcher {
    pub(super) async fn call_tool(&self, tool: &ToolSpec, arguments: Value) -> Result<ToolOutput, RpcError> {
        debug!(tool = tool.name, "calling tool");
        let output = match tool.kind {
            ToolKind::ReadFile => self.read_file(parse_args(tool.name, arguments)?).await,
            ToolKind::WriteFile => self.write_file(parse_args(tool.name, arguments)?).await,
            ToolKind::ApplyPatch => self.apply_patch(parse_args(tool.name, arguments)?).await,
            ToolKind::ListFiles => self.list_files(parse_args(tool.name, arguments)?).await,
            ToolKind::SearchText => return self.search_text(parse_args(tool.name, arguments)?).await,
            ToolKind::GetDiagnostics => self.diagnostics(parse_args(tool.name, arguments)?).await,
            ToolKind::RunCommand => self.run_command(parse_args(tool.name, arguments)?).await,
            ToolKind::GetSymbolInfo => self.symbol_info(parse_args(tool.name, arguments)?).await,
        };
        Ok(output.unwrap_or_else(ToolOutput::from))
    }

    async fn read_file(&self, args: PathArgs) -> Result<ToolOutput, HostError> {
        self.context.read_text(&args.path).await.map(ToolOutput::text)
    }

    async fn write_file(&self, args: WriteFileArgs) -> Result<ToolOutput, HostError> {
        self.context.write_text(&args.path, &args.content).await?;
        Ok(ToolOutput::text(format!("wrote {} bytes to {}", args.content.len(), args.path)))
    }

    async fn apply_patch(&self, args: ApplyPatchArgs) -> Result<ToolOutput, HostError> {
        let path = normalized(&args.path)?;
        let whole_document = args.search.trim().is_empty();
        let before = match self.context.read_text(&path).await {
            Ok(text) => text,
            Err(HostError::NotFound(_)) if whole_document => String::new(),
            Err(error) => return Err(error),
        };

        let patched = match apply_patch(&before, &args.search, &args.replace) {
            Ok(patched) => patched,
            Err(error) => return Ok(ToolOutput::error(format!("{path}: {error}"))),
        };

        self.context.write_text(&path, &patched.text).await?;
        self.context.host().show_diff(&path, &before, &patched.text);

        let summary = match patched.applied {
            Applied::WholeDocument => json!({ "path": path, "match": "whole_document" }),
            Applied::Matched { tier, span } => {
                let (first, last) = span.line_range(&before);
                json!({ "path": path, "match": tier.as_str(), "lines": [first, last] })
            }
        };
        Ok(ToolOutput::json(&summary))
    }

    async fn list_files(&self, args: ListFilesArgs) -> Result<ToolOutput, HostError> {
        let options = ListOptions {
            recursive: args.recursive,
            respect_ignore: args.respect_ignore,
            max_depth: args.max_depth.unwrap_or(self.traversal.max_depth),
            max_files: args.max_files.unwrap_or(self.traversal.max_files),
        };
        let entries = traversal::list(self.context.host(), &args.path, options, self.limits).await?;
        let truncated = entries.last().is_some_and(ListingEntry::is_truncation);
        Ok(ToolOutput::json(&json!({ "entries": entries, "truncated": truncated })))
    }

    async fn search_text(&self, args: SearchTextArgs) -> Result<ToolOutput, RpcError> {
        let pattern = Regex::new(&args.pattern)
            .map_err(|error| RpcError::invalid_params(format!("invalid pattern: {error}")))?;
        let max_results = args.max_results.unwrap_or(DEFAULT_SEARCH_RESULTS).clamp(1, MAX_SEARCH_RESULTS);

        let options = ListOptions {
            recursive: true,
            respect_ignore: true,
            max_depth: self.limits.max_depth,
            max_files: self.limits.max_entries,
        };
        let entries = match traversal::list(self.context.host(), &args.path, options, self.limits).await {
            Ok(entries) => entries,
            Err(error) => return Ok(error.into()),
        };

        let mut matches = Vec::new();
        let mut truncated = entries.last().is_some_and(ListingEntry::is_truncation);
        'files: for entry in &entries {
            let ListingEntry::File { path } = entry else {
                continue;
            };
            let text = match self.context.read_text(path).await {
                Ok(text) => text,
                Err(error) => {
                    debug!(path = %path, %error, "skipping unreadable file");
                    continue;
                }
            };
            for (index, line) in text.lines().enumerate() {
                if !pattern.is_match(line) {
                    continue;
                }
                if matches.len() == max_results {
                    truncated = true;
                    break 'files;
                }
                let shown: String = line.chars().take(MAX_MATCH_LINE_CHARS).collect();
                matches.push(json!({ "path": path, "line": index + 1, "text": shown }));
            }
        }

        Ok(ToolOutput::json(&json!({ "matches": matches, "truncated": truncated })))
    }

    async fn diagnostics(&self, args: DiagnosticsArgs) -> Result<ToolOutput, HostError> {
        let path = args.path.as_deref().map(normalized).transpose()?;
        let report = self.context.host().diagnostics(path.as_deref()).await?;
        Ok(ToolOutput::json(&json!(report)))
    }

    async fn run_command(&self, args: RunCommandArgs) -> Result<ToolOutput, HostError> {
        let timeout = args.timeout_sec.map_or(self.shell_timeout, Duration::from_secs);
        let output = self.context.host().run_command(&args.command, args.cwd.as_deref(), timeout).await?;
        let failed = output.exit_code != Some(0);
        let rendered = ToolOutput::json(&json!(output));
        Ok(if failed { ToolOutput::error(rendered.text) } else { rendered })
    }

    async fn symbol_info(&self, args: SymbolInfoArgs) -> Result<ToolOutput, HostError> {
        let path = normalized(&args.path)?;
        let info = self.context.host().symbol_info(&path, args.line, args.character).await?;
        Ok(ToolOutput::json(&info))
    }
}

// ── Schemas ─────────────────────────────────────────────────────────

fn path_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "path": { "type": "string", "description": "Workspace-relative path" } },
        "required": ["path"],
    })
}

fn write_file_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string" },
            "content": { "type": "string" },
        },
        "required": ["path", "content"],
    })
}

fn apply_patch_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string" },
            "search": { "type": "string", "description": "Text of the region to replace" },
            "replace": { "type": "string" },
        },
        "required": ["path", "search", "replace"],
    })
}

fn list_files_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "default": "" },
            "recursive": { "type": "boolean", "default": true },
            "respect_ignore": { "type": "boolean", "default": true },
            "max_depth": { "type": "integer", "minimum": 1 },
            "max_files": { "type": "integer", "minimum": 1 },
        },
    })
}

fn search_text_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "pattern": { "type": "string", "description": "Regular expression" },
            "path": { "type": "string", "default": "" },
            "max_results": { "type": "integer", "minimum": 1, "maximum": MAX_SEARCH_RESULTS },
        },
        "required": ["pattern"],
    })
}

fn diagnostics_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "path": { "type": "string" } },
    })
}

fn run_command_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "command": { "type": "string" },
            "cwd": { "type": "string" },
            "timeout_sec": { "type": "integer", "minimum": 1 },
        },
        "required": ["command"],
    })
}

fn symbol_info_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string" },
            "line": { "type": "integer", "minimum": 0 },
            "character": { "type": "integer", "minimum": 0 },
        },
        "required": ["path", "line", "character"],
    })
}
