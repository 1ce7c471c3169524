// Per-bridge context: host access with a virtual-file override layer.
//
// Overridden paths are served from the store instead of the host, and
// writes to them update the store. Keys are normalized relative paths.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use toolbridge_common::path::normalize_relative;
use tracing::debug;

use crate::host::{Host, HostError};

/// Key-value store of virtual file contents.
pub trait OverrideStore: Send + Sync + 'static {
    fn get(&self, path: &str) -> Option<String>;
    fn contains(&self, path: &str) -> bool;
    fn set(&self, path: &str, contents: String);
    fn remove(&self, path: &str) -> Option<String>;
}

/// In-memory override store.
#[derive(Debug, Default)]
pub struct MemoryOverrides {
    entries: RwLock<HashMap<String, String>>,
}

impl OverrideStore for MemoryOverrides {
    fn get(&self, path: &str) -> Option<String> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(path).cloned()
    }

    fn contains(&self, path: &str) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(path)
    }

    fn set(&self, path: &str, contents: String) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(path.to_string(), contents);
    }

    fn remove(&self, path: &str) -> Option<String> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(path)
    }
}

#[derive(Clone)]
pub struct BridgeContext {
    host: Arc<dyn Host>,
    overrides: Arc<dyn OverrideStore>,
}

impl BridgeContext {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::with_overrides(host, Arc::new(MemoryOverrides::default()))
    }

    pub fn with_overrides(host: Arc<dyn Host>, overrides: Arc<dyn OverrideStore>) -> Self {
        Self { host, overrides }
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    /// Serve `contents` for `path` instead of the host's file.
    pub fn set_override(&self, path: &str, contents: impl Into<String>) -> Result<(), HostError> {
        let key = normalize(path)?;
        self.overrides.set(&key, contents.into());
        Ok(())
    }

    pub fn clear_override(&self, path: &str) -> Result<Option<String>, HostError> {
        let key = normalize(path)?;
        Ok(self.overrides.remove(&key))
    }

    /// Reads a text file, preferring the override store.
    pub async fn read_text(&self, path: &str) -> Result<String, HostError> {
        let key = normalize(path)?;
        if let Some(contents) = self.overrides.get(&key) {
            debug!(path = %key, "serving virtual file");
            return Ok(contents);
        }
        let bytes = self.host.read_file(&key).await?;
        String::from_utf8(bytes).map_err(|_| HostError::NotText(key))
    }

    /// Writes a text file. Overridden paths are updated in the store only.
    pub async fn write_text(&self, path: &str, contents: &str) -> Result<(), HostError> {
        let key = normalize(path)?;
        if self.overrides.contains(&key) {
            debug!(path = %key, "updating virtual file");
            self.overrides.set(&key, contents.to_string());
            return Ok(());
        }
        self.host.write_file(&key, contents.as_bytes()).await
    }
}

fn normalize(path: &str) -> Result<String, HostError> {
    normalize_relative(path).map_err(|source| HostError::InvalidPath { path: path.to_string(), source })
}
