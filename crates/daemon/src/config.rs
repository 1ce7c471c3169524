// Local configuration for the bridge daemon.
//
// Global config: `~/.toolbridge/config.toml`
//
// The credential never lives here. It is supplied by the controller at
// startup (`--token` or `TOOLBRIDGE_TOKEN`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root directory for toolbridge global state: `~/.toolbridge/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".toolbridge"))
}

/// Path to the global config file: `~/.toolbridge/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Environment variable the controller reads the credential from.
pub const TOKEN_ENV_VAR: &str = "TOOLBRIDGE_TOKEN";

// ── Bridge config ──────────────────────────────────────────────────

/// Bridge configuration at `~/.toolbridge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory the tools operate on (defaults to the current directory).
    pub workspace_root: Option<PathBuf>,
    /// Remote endpoint settings.
    pub connection: ConnectionConfig,
    /// Capability groups exposed to the remote client.
    pub tools: ToolGroups,
    /// Default listing limits (capped by fixed ceilings).
    pub traversal: TraversalDefaults,
    /// Shell execution settings.
    pub shell: ShellConfig,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
}

impl BridgeConfig {
    /// Load from `~/.toolbridge/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Remote endpoint. Credentials are rejected here on purpose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// WebSocket URL of the tool-calling client (e.g. `wss://host/bridge`).
    pub url: Option<String>,
}

/// Per-capability-group enable flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolGroups {
    pub files: bool,
    pub search: bool,
    pub diagnostics: bool,
    pub shell: bool,
    pub symbols: bool,
}

impl Default for ToolGroups {
    fn default() -> Self {
        Self { files: true, search: true, diagnostics: true, shell: true, symbols: true }
    }
}

/// Listing limits applied when a caller does not pass its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TraversalDefaults {
    pub max_depth: usize,
    pub max_files: usize,
}

impl Default for TraversalDefaults {
    fn default() -> Self {
        Self { max_depth: 5, max_files: 500 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Default command timeout in seconds.
    pub timeout_sec: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self { timeout_sec: 30 }
    }
}

impl ShellConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

/// Reconnection parameters, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { base_delay_ms: 1_000, max_delay_ms: 30_000, max_attempts: 5 }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
