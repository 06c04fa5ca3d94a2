//! Storage Manager: decides, per reference, whether anything has to happen.
//!
//! | Category | File already stored | Action |
//! |---|---|---|
//! | Generic | `<key>.*` in the asset root | reuse, no network |
//! | Generic | `banner/<key>.*` | delete it, then as above |
//! | Generic | nothing | fetch → convert → store |
//! | Banner | `banner/<key>.*` | delete, then fetch → copy → store |
//! | Banner | only `<key>.*` in the asset root | move it into `banner/` |
//! | Banner | nothing | fetch → copy → store |
//!
//! The directory listing is taken once when the [`Store`] is opened and kept
//! in a [`RunCache`] for the rest of the run, so the per-reference decisions
//! never scan the filesystem. Two references never share a key (the
//! extractor dedupes locators), so parallel pipelines touch disjoint files.
//!
//! Failures are per asset. Only creating the output roots can fail the run.

use crate::convert::{ConvertError, ConvertRequest, Conversion, FormatConverter};
use crate::fetch::{Fetcher, UrlResolver};
use crate::index::{FallbackEntry, IndexEntry, StoreIndex};
use crate::keys::{is_key_like, resolve_key};
use crate::types::{AssetReference, Category, StorageKey, StoredAsset};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Banner assets live in this subdirectory of the asset root.
pub const BANNER_DIR: &str = "banner";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot create output directory {path}: {source}")]
    CreateRoot { path: PathBuf, source: io::Error },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The collaborators a fetching pipeline needs.
#[derive(Clone, Copy)]
pub struct Stages<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub resolver: &'a UrlResolver,
    pub converter: &'a FormatConverter,
}

/// Where in the pipeline an asset was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Fetch,
    Validation,
    Convert,
    Storage,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Validation => "validation",
            FailureStage::Convert => "convert",
            FailureStage::Storage => "storage",
        })
    }
}

/// Terminal state of one reference's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetStatus {
    /// Fetched this run.
    Stored(Conversion),
    /// Already on disk; no network.
    Reused,
    /// Moved from the Generic directory into the Banner directory.
    Migrated,
    /// Served by another reference's file (see [`fallback`](crate::fallback)).
    /// `stored` is that file.
    Substituted { from: StorageKey },
    Failed { stage: FailureStage, reason: String },
}

/// One reference and what became of it.
#[derive(Debug, Clone)]
pub struct AssetOutcome {
    pub reference: AssetReference,
    pub key: StorageKey,
    pub status: AssetStatus,
    /// The file now serving this reference, if any.
    pub stored: Option<StoredAsset>,
}

impl AssetOutcome {
    fn failed(reference: &AssetReference, key: StorageKey, stage: FailureStage, reason: String) -> Self {
        Self {
            reference: reference.clone(),
            key,
            status: AssetStatus::Failed { stage, reason },
            stored: None,
        }
    }

    pub fn failed_at(&self) -> Option<FailureStage> {
        match &self.status {
            AssetStatus::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Files present in one category directory, grouped by key.
#[derive(Debug, Default)]
struct Listing {
    by_key: BTreeMap<String, Vec<String>>,
}

impl Listing {
    fn scan(dir: &Path) -> io::Result<Self> {
        let mut listing = Self::default();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Some((stem, _)) = name.split_once('.') else {
                continue;
            };
            if is_key_like(stem) {
                listing.insert(stem.to_string(), name);
            }
        }
        Ok(listing)
    }

    fn insert(&mut self, key: String, file_name: String) {
        let names = self.by_key.entry(key).or_default();
        if !names.contains(&file_name) {
            names.push(file_name);
            names.sort();
        }
    }

    fn files(&self, key: &str) -> &[String] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn remove(&mut self, key: &str) -> Vec<String> {
        self.by_key.remove(key).unwrap_or_default()
    }
}

/// What is on disk for this run. Created when the store opens and dropped
/// with it.
#[derive(Debug, Default)]
pub struct RunCache {
    generic: Listing,
    banner: Listing,
}

impl RunCache {
    fn listing(&self, category: Category) -> &Listing {
        match category {
            Category::Generic => &self.generic,
            Category::Banner => &self.banner,
        }
    }

    fn listing_mut(&mut self, category: Category) -> &mut Listing {
        match category {
            Category::Generic => &mut self.generic,
            Category::Banner => &mut self.banner,
        }
    }

    /// Stored file name for a key, if any.
    pub fn file_for(&self, category: Category, key: &str) -> Option<&str> {
        self.listing(category).files(key).first().map(String::as_str)
    }

    pub fn len(&self, category: Category) -> usize {
        self.listing(category).by_key.len()
    }
}

/// Owner of the asset directories for one run.
pub struct Store {
    generic_dir: PathBuf,
    banner_dir: PathBuf,
    cache: Mutex<RunCache>,
    index: Mutex<StoreIndex>,
}

impl Store {
    /// Create the output roots if needed, list what is there and load the
    /// index.
    pub fn open(asset_root: &Path) -> Result<Self, StoreError> {
        let generic_dir = asset_root.to_path_buf();
        let banner_dir = asset_root.join(BANNER_DIR);
        for dir in [&generic_dir, &banner_dir] {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateRoot {
                path: dir.clone(),
                source,
            })?;
        }

        let cache = RunCache {
            generic: Listing::scan(&generic_dir)?,
            banner: Listing::scan(&banner_dir)?,
        };
        tracing::debug!(
            generic = cache.len(Category::Generic),
            banner = cache.len(Category::Banner),
            "opened asset store at {}",
            asset_root.display()
        );

        Ok(Self {
            index: Mutex::new(StoreIndex::load(asset_root)),
            generic_dir,
            banner_dir,
            cache: Mutex::new(cache),
        })
    }

    pub fn asset_root(&self) -> &Path {
        &self.generic_dir
    }

    pub fn dir(&self, category: Category) -> &Path {
        match category {
            Category::Generic => &self.generic_dir,
            Category::Banner => &self.banner_dir,
        }
    }

    /// The stored file for a key, with what the index knows about it.
    pub fn lookup(&self, category: Category, key: &StorageKey) -> Option<StoredAsset> {
        let file_name = lock(&self.cache)
            .file_for(category, key.as_str())?
            .to_string();
        let (_, extension) = file_name.split_once('.')?;
        let entry = lock(&self.index).get(&relative_path(category, &file_name)).cloned();
        Some(StoredAsset {
            key: key.clone(),
            category,
            extension: extension.to_string(),
            converted: entry
                .as_ref()
                .map(|e| e.converted)
                .unwrap_or(extension == crate::convert::NORMALIZED_EXTENSION),
            original_locator: entry.map(|e| e.locator),
        })
    }

    /// Bring one reference's file up to date.
    pub fn ensure(&self, reference: &AssetReference, stages: &Stages) -> AssetOutcome {
        let key = resolve_key(&reference.locator);

        match reference.category {
            Category::Generic => {
                // A Generic locator keeps no Banner copy.
                if let Err(e) = self.evict(Category::Banner, &key) {
                    return AssetOutcome::failed(reference, key, FailureStage::Storage, e.to_string());
                }
                if let Some(existing) = self.lookup(Category::Generic, &key) {
                    return AssetOutcome {
                        reference: reference.clone(),
                        key,
                        status: AssetStatus::Reused,
                        stored: Some(existing),
                    };
                }
            }
            Category::Banner => {
                match self.migrate(reference, &key) {
                    Ok(Some(outcome)) => return outcome,
                    Ok(None) => {}
                    Err(e) => {
                        return AssetOutcome::failed(reference, key, FailureStage::Storage, e.to_string());
                    }
                }
                if let Err(e) = self.evict(Category::Banner, &key) {
                    return AssetOutcome::failed(reference, key, FailureStage::Storage, e.to_string());
                }
            }
        }

        self.fetch_and_store(reference, key, stages)
    }

    /// Move a Banner reference's file out of the Generic directory when that
    /// is the only copy. Returns `None` when there is nothing to migrate.
    pub fn migrate(
        &self,
        reference: &AssetReference,
        key: &StorageKey,
    ) -> Result<Option<AssetOutcome>, StoreError> {
        if reference.category != Category::Banner {
            return Ok(None);
        }
        let file_name = {
            let cache = lock(&self.cache);
            if cache.file_for(Category::Banner, key.as_str()).is_some() {
                return Ok(None);
            }
            match cache.file_for(Category::Generic, key.as_str()) {
                Some(name) => name.to_string(),
                None => return Ok(None),
            }
        };

        let from = self.generic_dir.join(&file_name);
        let to = self.banner_dir.join(&file_name);
        std::fs::rename(&from, &to)?;
        tracing::info!(locator = %reference.locator, "migrated {file_name} into {BANNER_DIR}/");

        {
            let mut cache = lock(&self.cache);
            cache.generic.remove(key.as_str());
            cache.banner.insert(key.as_str().to_string(), file_name.clone());
        }
        lock(&self.index).relocate(
            &relative_path(Category::Generic, &file_name),
            relative_path(Category::Banner, &file_name),
            Category::Banner,
        );

        Ok(Some(AssetOutcome {
            reference: reference.clone(),
            key: key.clone(),
            status: AssetStatus::Migrated,
            stored: self.lookup(Category::Banner, key),
        }))
    }

    /// Run only the migration policy over a reference list. No network.
    pub fn reclassify(&self, references: &[AssetReference]) -> Vec<AssetOutcome> {
        references
            .iter()
            .filter(|r| r.category == Category::Banner)
            .filter_map(|r| {
                let key = resolve_key(&r.locator);
                match self.migrate(r, &key) {
                    Ok(outcome) => outcome,
                    Err(e) => Some(AssetOutcome::failed(r, key, FailureStage::Storage, e.to_string())),
                }
            })
            .collect()
    }

    /// Serve `primary` with an already stored file.
    ///
    /// Only the index learns about it: nothing is written under the
    /// primary's key, so a later run still fetches the primary itself.
    pub fn substitute(
        &self,
        primary: &AssetReference,
        source: &StoredAsset,
    ) -> Result<StoredAsset, StoreError> {
        let file_name = source.file_name();
        let path = self.dir(source.category).join(&file_name);
        if !path.is_file() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not stored", path.display()),
            )));
        }

        lock(&self.index).link_fallback(
            primary.locator.clone(),
            FallbackEntry {
                category: primary.category,
                target: relative_path(source.category, &file_name),
            },
        );
        Ok(source.clone())
    }

    /// Forget the previous run's fallbacks before fetching again.
    pub fn clear_fallbacks(&self) {
        lock(&self.index).clear_fallbacks();
    }

    /// Prune and save the index. Call once after every pipeline settled.
    pub fn finish(&self) -> Result<(), StoreError> {
        let mut index = lock(&self.index);
        index.prune(&self.generic_dir);
        index.save(&self.generic_dir)?;
        Ok(())
    }

    fn fetch_and_store(&self, reference: &AssetReference, key: StorageKey, stages: &Stages) -> AssetOutcome {
        let fail = |key: StorageKey, stage: FailureStage, reason: String| {
            tracing::warn!(locator = %reference.locator, "{stage} failed: {reason}");
            AssetOutcome::failed(reference, key, stage, reason)
        };

        let url = match stages.resolver.resolve(&reference.locator) {
            Ok(url) => url,
            Err(e) => return fail(key, FailureStage::Fetch, e.to_string()),
        };
        let target_dir = self.dir(reference.category);
        let fetched = match stages.fetcher.fetch(&url, target_dir) {
            Ok(f) => f,
            Err(e) => return fail(key, FailureStage::Fetch, e.to_string()),
        };

        let request = ConvertRequest {
            key: &key,
            category: reference.category,
            target_dir,
            locator: &reference.locator,
            content_type: fetched.content_type.as_deref(),
        };
        let converted = match stages.converter.convert(fetched.path(), &request) {
            Ok(c) => c,
            Err(ConvertError::Validation(e)) => return fail(key, FailureStage::Validation, e.to_string()),
            Err(ConvertError::Io(e)) => return fail(key, FailureStage::Convert, e.to_string()),
        };

        self.record(&converted.asset);
        AssetOutcome {
            reference: reference.clone(),
            key,
            status: AssetStatus::Stored(converted.conversion),
            stored: Some(converted.asset),
        }
    }

    /// Delete every stored `<key>.*` in one category.
    fn evict(&self, category: Category, key: &StorageKey) -> io::Result<()> {
        let names = lock(&self.cache).listing_mut(category).remove(key.as_str());
        let dir = self.dir(category);
        let mut index = lock(&self.index);
        for name in names {
            match std::fs::remove_file(dir.join(&name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            let relative = relative_path(category, &name);
            tracing::debug!("removed stale {relative}");
            index.remove(&relative);
        }
        Ok(())
    }

    fn record(&self, asset: &StoredAsset) {
        let file_name = asset.file_name();
        lock(&self.cache)
            .listing_mut(asset.category)
            .insert(asset.key.as_str().to_string(), file_name.clone());
        lock(&self.index).insert(
            relative_path(asset.category, &file_name),
            IndexEntry {
                locator: asset.original_locator.clone().unwrap_or_default(),
                category: asset.category,
                converted: asset.converted,
            },
        );
    }
}

/// Index path of a stored file, relative to the asset root.
pub fn relative_path(category: Category, file_name: &str) -> String {
    match category {
        Category::Generic => file_name.to_string(),
        Category::Banner => format!("{BANNER_DIR}/{file_name}"),
    }
}

/// Lock ignoring poison: a panicked worker must not take the run down.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
