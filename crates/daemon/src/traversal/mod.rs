// Bounded directory listing.
//
// Depth-first, pre-order walk over `Host::list_directory` under four
// simultaneous limits: depth, total entries, per-directory fan-out and wall
// clock. Caller limits can only tighten the fixed ceilings. Hitting any limit,
// or failing to list a subdirectory, ends the listing with exactly one
// `Truncated` entry carrying the first cause.

mod ignore_rules;

use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use toolbridge_common::path::{join_relative, normalize_relative};
use tracing::{debug, warn};

use crate::config::TraversalDefaults;
use crate::host::{DirEntry, EntryKind, Host, HostError};

pub use ignore_rules::{is_excluded, IgnoreRules, EXCLUDED_NAMES, IGNORE_FILE};

/// Hidden ceilings. Requests above these are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_depth: usize,
    pub max_entries: usize,
    pub max_fanout: usize,
    pub timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 20,
            max_entries: 5_000,
            max_fanout: 1_000,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Per-call listing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub recursive: bool,
    pub respect_ignore: bool,
    pub max_depth: usize,
    pub max_files: usize,
}

impl ListOptions {
    pub fn from_defaults(defaults: TraversalDefaults) -> Self {
        Self {
            recursive: true,
            respect_ignore: true,
            max_depth: defaults.max_depth,
            max_files: defaults.max_files,
        }
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self::from_defaults(TraversalDefaults::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    MaxEntries,
    Timeout,
    DirectoryTooLarge,
    /// A subdirectory could not be listed; its entry is marked `unreadable`.
    Unreadable,
}

/// One listing element. Paths are workspace-relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListingEntry {
    File {
        path: String,
    },
    Directory {
        path: String,
        /// Set when the directory had too many children to enumerate.
        #[serde(skip_serializing_if = "Option::is_none")]
        omitted: Option<usize>,
        /// Set when the host failed to list the directory's children.
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        unreadable: bool,
    },
    /// Always the final element when present.
    Truncated { reason: TruncationReason },
}

impl ListingEntry {
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::File { path } | Self::Directory { path, .. } => Some(path),
            Self::Truncated { .. } => None,
        }
    }

    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Lists `path` under `options`, clamped to `limits`.
pub async fn list(
    host: &dyn Host,
    path: &str,
    options: ListOptions,
    limits: Limits,
) -> Result<Vec<ListingEntry>, HostError> {
    let root = normalize_relative(path)
        .map_err(|source| HostError::InvalidPath { path: path.to_string(), source })?;
    Walk::new(host, options, limits).run(root).await
}

/// One directory whose children are being emitted.
struct Frame {
    path: String,
    depth: usize,
    children: std::vec::IntoIter<DirEntry>,
}

struct Walk<'a> {
    host: &'a dyn Host,
    recursive: bool,
    respect_ignore: bool,
    max_depth: usize,
    max_files: usize,
    max_fanout: usize,
    timeout: Duration,
    started: Instant,
    ignore: OnceCell<Option<IgnoreRules>>,
    entries: Vec<ListingEntry>,
    truncated: Option<TruncationReason>,
}

impl<'a> Walk<'a> {
    fn new(host: &'a dyn Host, options: ListOptions, limits: Limits) -> Self {
        Self {
            host,
            recursive: options.recursive,
            respect_ignore: options.respect_ignore,
            // Depth 1 is the directory's own children, always listed.
            max_depth: options.max_depth.min(limits.max_depth).max(1),
            max_files: options.max_files.min(limits.max_entries),
            max_fanout: limits.max_fanout,
            timeout: limits.timeout,
            started: Instant::now(),
            ignore: OnceCell::new(),
            entries: Vec::new(),
            truncated: None,
        }
    }

    async fn run(mut self, root: String) -> Result<Vec<ListingEntry>, HostError> {
        let children = self.host.list_directory(&root).await?;
        if children.len() > self.max_fanout {
            debug!(path = %root, children = children.len(), "root directory too large to enumerate");
            let path = if root.is_empty() { ".".to_string() } else { root };
            self.entries.push(ListingEntry::Directory {
                path,
                omitted: Some(children.len()),
                unreadable: false,
            });
            self.truncate(TruncationReason::DirectoryTooLarge);
            return Ok(self.finish());
        }

        let mut stack = vec![Frame { path: root, depth: 1, children: sorted(children) }];
        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.children.next() else {
                stack.pop();
                continue;
            };
            let depth = frame.depth;
            let path = join_relative(&frame.path, &child.name);
            let is_dir = child.kind == EntryKind::Directory;

            if self.skip(&child.name, &path, is_dir).await {
                continue;
            }
            if self.entries.len() >= self.max_files {
                self.truncate(TruncationReason::MaxEntries);
                break;
            }

            if !is_dir {
                self.entries.push(ListingEntry::File { path });
                continue;
            }
            self.entries.push(ListingEntry::Directory { path: path.clone(), omitted: None, unreadable: false });

            if !self.recursive || depth >= self.max_depth {
                continue;
            }
            if self.started.elapsed() > self.timeout {
                self.truncate(TruncationReason::Timeout);
                break;
            }

            let grandchildren = match self.host.list_directory(&path).await {
                Ok(entries) => entries,
                Err(error) => {
                    warn!(path = %path, %error, "directory could not be listed");
                    if let Some(ListingEntry::Directory { unreadable, .. }) = self.entries.last_mut() {
                        *unreadable = true;
                    }
                    self.truncate(TruncationReason::Unreadable);
                    continue;
                }
            };
            if grandchildren.len() > self.max_fanout {
                debug!(path = %path, children = grandchildren.len(), "directory too large to enumerate");
                if let Some(ListingEntry::Directory { omitted, .. }) = self.entries.last_mut() {
                    *omitted = Some(grandchildren.len());
                }
                self.truncate(TruncationReason::DirectoryTooLarge);
                continue;
            }
            stack.push(Frame { path, depth: depth + 1, children: sorted(grandchildren) });
        }

        Ok(self.finish())
    }

    async fn skip(&self, name: &str, path: &str, is_dir: bool) -> bool {
        if is_excluded(name) {
            return true;
        }
        if !self.respect_ignore {
            return false;
        }
        let host = self.host;
        let rules = self.ignore.get_or_init(|| IgnoreRules::load(host)).await;
        rules.as_ref().is_some_and(|rules| rules.is_ignored(path, is_dir))
    }

    /// Records the first truncation cause. Later causes are ignored.
    fn truncate(&mut self, reason: TruncationReason) {
        if self.truncated.is_none() {
            debug!(?reason, entries = self.entries.len(), "listing truncated");
            self.truncated = Some(reason);
        }
    }

    fn finish(mut self) -> Vec<ListingEntry> {
        if let Some(reason) = self.truncated {
            self.entries.push(ListingEntry::Truncated { reason });
        }
        self.entries
    }
}

fn sorted(mut entries: Vec<DirEntry>) -> std::vec::IntoIter<DirEntry> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries.into_iter()
}
