//! Persisted record of what each stored file was fetched from.
//!
//! A stored file's name is `<key>.<ext>`; the key alone cannot tell the
//! Manifest Builder which original file name (`a.jpg`) to alias it under, or
//! whether the bytes were converted. This index keeps that per file.
//!
//! # Storage
//!
//! The index is a JSON file at `<asset_root>/.asset-index.json`, keyed by the
//! path relative to the asset root (`<key>.webp`, `banner/<key>.png`). It
//! lives alongside the assets so it travels with them when the directory is
//! cached in CI.
//!
//! It also records fallbacks: a reference that could not be fetched this run
//! and is served by another reference's file. No file is written under the
//! served reference's own key, so the next run still tries to fetch it.
//!
//! The index is advisory. A missing, corrupt, or outdated file loads as
//! empty, and a stored file without an entry still gets aliases from its
//! file name.

use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the index file within the asset root.
pub const INDEX_FILENAME: &str = ".asset-index.json";

/// Version of the index format. Bump to discard existing indexes when the
/// format changes.
const INDEX_VERSION: u32 = 1;

/// What is known about one stored file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub locator: String,
    pub category: Category,
    pub converted: bool,
}

/// A reference served by another reference's stored file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackEntry {
    /// Category of the reference being served.
    pub category: Category,
    /// Stored path of the serving file, relative to the asset root.
    pub target: String,
}

/// On-disk index: relative stored path → entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreIndex {
    pub version: u32,
    pub entries: BTreeMap<String, IndexEntry>,
    /// Locator → file serving it in place of its own.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fallbacks: BTreeMap<String, FallbackEntry>,
}

impl StoreIndex {
    pub fn empty() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: BTreeMap::new(),
            fallbacks: BTreeMap::new(),
        }
    }

    /// Load from the asset root. Returns an empty index if the file doesn't
    /// exist or can't be parsed (version mismatch, corruption).
    pub fn load(asset_root: &Path) -> Self {
        let content = match std::fs::read_to_string(index_path(asset_root)) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let index: Self = match serde_json::from_str(&content) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!("ignoring unreadable {INDEX_FILENAME}: {e}");
                return Self::empty();
            }
        };
        if index.version != INDEX_VERSION {
            return Self::empty();
        }
        index
    }

    /// Save to the asset root, replacing the previous index in one rename.
    pub fn save(&self, asset_root: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&index_path(asset_root), json.as_bytes())
    }

    pub fn get(&self, relative_path: &str) -> Option<&IndexEntry> {
        self.entries.get(relative_path)
    }

    pub fn insert(&mut self, relative_path: String, entry: IndexEntry) {
        self.entries.insert(relative_path, entry);
    }

    pub fn remove(&mut self, relative_path: &str) -> Option<IndexEntry> {
        self.entries.remove(relative_path)
    }

    /// Move an entry to a new relative path, updating its category.
    /// Fallbacks served by the moved file follow it.
    pub fn relocate(&mut self, from: &str, to: String, category: Category) {
        for link in self.fallbacks.values_mut() {
            if link.target == from {
                link.target = to.clone();
            }
        }
        if let Some(mut entry) = self.entries.remove(from) {
            entry.category = category;
            self.entries.insert(to, entry);
        }
    }

    pub fn fallback(&self, locator: &str) -> Option<&FallbackEntry> {
        self.fallbacks.get(locator)
    }

    pub fn link_fallback(&mut self, locator: String, link: FallbackEntry) {
        self.fallbacks.insert(locator, link);
    }

    /// Forget every fallback. A run recomputes them after all fetches.
    pub fn clear_fallbacks(&mut self) {
        self.fallbacks.clear();
    }

    /// Forget entries and fallbacks whose file no longer exists.
    pub fn prune(&mut self, asset_root: &Path) {
        self.entries
            .retain(|path, _| asset_root.join(path).is_file());
        self.fallbacks
            .retain(|_, link| asset_root.join(&link.target).is_file());
    }
}

/// Replace `path` with `contents` through a scratch file in the same directory.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut scratch = tempfile::Builder::new().prefix(".write-").tempfile_in(dir)?;
    scratch.write_all(contents)?;
    scratch.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Resolve the index path for an asset root.
pub fn index_path(asset_root: &Path) -> PathBuf {
    asset_root.join(INDEX_FILENAME)
}
