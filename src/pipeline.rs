//! Run orchestration: extract → store (parallel) → fallbacks → manifest.
//!
//! ```text
//! CMS JSON ──► extract ──► [ensure × N on the worker pool] ──► barrier
//!                                                           │
//!                          fallbacks ◄──────────────────────┘
//!                              │
//!                      save index ──► manifest
//! ```
//!
//! Per-asset problems never stop the run; they show up in the
//! [`RunSummary`]. The run fails only when it cannot start: an invalid base
//! URL, output roots that cannot be created, or a worker pool that cannot be
//! built. A manifest that cannot be written is logged and reported, and the
//! assets that were stored stay stored.

use crate::config::{PipelineConfig, effective_threads};
use crate::convert::{Conversion, FormatConverter};
use crate::extract::{ExtractRules, extract_many};
use crate::fallback;
use crate::fetch::{FetchError, Fetcher, HttpFetcher, UrlResolver};
use crate::manifest::{self, Manifest, ManifestError, WrittenManifest};
use crate::store::{AssetOutcome, AssetStatus, Stages, Store, StoreError};
use crate::types::{AssetReference, FallbackLink};
use rayon::prelude::*;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot list {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("CMS base URL: {0}")]
    BaseUrl(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Progress reported while a run is in flight.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Started { references: usize, workers: usize },
    Asset(AssetOutcome),
    Fallback(FallbackLink),
    ManifestWritten { path: PathBuf, assets: usize },
}

/// Counts of terminal states across a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Fetched this run and stored as intended.
    pub stored: u32,
    pub reused: u32,
    pub migrated: u32,
    /// Stored, but in the original format.
    pub degraded: u32,
    pub fallback: u32,
    pub failed: u32,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[AssetOutcome]) -> Self {
        let mut s = Self::default();
        for outcome in outcomes {
            match &outcome.status {
                AssetStatus::Stored(Conversion::Degraded) => s.degraded += 1,
                AssetStatus::Stored(_) => s.stored += 1,
                AssetStatus::Reused => s.reused += 1,
                AssetStatus::Migrated => s.migrated += 1,
                AssetStatus::Substituted { .. } => s.fallback += 1,
                AssetStatus::Failed { .. } => s.failed += 1,
            }
        }
        s
    }

    pub fn succeeded(&self) -> u32 {
        self.stored + self.reused + self.migrated
    }

    pub fn total(&self) -> u32 {
        self.succeeded() + self.degraded + self.fallback + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stored, {} reused",
            self.stored, self.reused
        )?;
        if self.migrated > 0 {
            write!(f, ", {} migrated", self.migrated)?;
        }
        write!(
            f,
            ", {} degraded, {} fallback, {} failed ({} total)",
            self.degraded,
            self.fallback,
            self.failed,
            self.total()
        )
    }
}

/// Everything a full run produced.
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<AssetOutcome>,
    pub fallbacks: Vec<FallbackLink>,
    pub summary: RunSummary,
    pub manifest: Option<(Manifest, WrittenManifest)>,
    pub manifest_error: Option<String>,
}

// ============================================================================
// Inputs
// ============================================================================

/// Expand CLI inputs: files as given, directories to their `*.json` files.
pub fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|source| PipelineError::Walk {
                path: path.clone(),
                source,
            })?;
            let p = entry.path();
            if entry.file_type().is_file() && is_json_input(p) {
                files.push(p.to_path_buf());
            }
        }
    }
    Ok(files)
}

/// Parse one JSON document per input file.
pub fn load_documents(files: &[PathBuf]) -> Result<Vec<Value>, PipelineError> {
    files
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|source| PipelineError::Json {
                path: path.clone(),
                source,
            })
        })
        .collect()
}

/// Extraction rules as configured.
pub fn extract_rules(config: &PipelineConfig) -> ExtractRules {
    ExtractRules {
        upload_prefixes: config.cms.upload_prefixes.clone(),
        banner_markers: config
            .classify
            .banner_keys
            .iter()
            .map(|k| k.to_lowercase())
            .collect(),
    }
}

/// All references in a set of documents, deduplicated across them.
pub fn extract_references(documents: &[Value], config: &PipelineConfig) -> Vec<AssetReference> {
    extract_many(documents, &extract_rules(config))
}

// ============================================================================
// Stages
// ============================================================================

/// The network fetcher described by the config.
pub fn http_fetcher(config: &PipelineConfig) -> HttpFetcher {
    HttpFetcher::new(
        Duration::from_secs(config.cms.timeout_secs),
        config.cms.token.clone(),
    )
}

fn emit(events: Option<&Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        // The printer may have gone away; progress is best effort.
        tx.send(event).ok();
    }
}

/// Fetch, convert and store every reference, then resolve fallbacks and
/// publish the manifest.
pub fn run(
    references: &[AssetReference],
    config: &PipelineConfig,
    fetcher: &dyn Fetcher,
    converter: &FormatConverter,
    events: Option<Sender<PipelineEvent>>,
) -> Result<RunReport, PipelineError> {
    let resolver = UrlResolver::new(config.cms.base_url.as_deref())?;
    let store = Store::open(&config.output.asset_root)?;
    store.clear_fallbacks();
    let workers = effective_threads(&config.processing);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;

    tracing::info!(
        backends = ?converter.backend_names(),
        "processing {} references on {workers} workers",
        references.len()
    );
    let events = events.as_ref();
    emit(
        events,
        PipelineEvent::Started {
            references: references.len(),
            workers,
        },
    );

    let stages = Stages {
        fetcher,
        resolver: &resolver,
        converter,
    };
    let mut outcomes: Vec<AssetOutcome> = pool.install(|| {
        references
            .par_iter()
            .map(|reference| {
                let outcome = store.ensure(reference, &stages);
                emit(events, PipelineEvent::Asset(outcome.clone()));
                outcome
            })
            .collect()
    });

    let fallbacks = fallback::apply(&store, &mut outcomes);
    for link in &fallbacks {
        emit(events, PipelineEvent::Fallback(link.clone()));
    }

    if let Err(e) = store.finish() {
        tracing::warn!("could not save asset index: {e}");
    }
    drop(store);

    let (manifest, manifest_error) = match build_manifest(config, events) {
        Ok(m) => (Some(m), None),
        Err(e) => {
            tracing::error!("manifest not written: {e}");
            (None, Some(e.to_string()))
        }
    };

    let summary = RunSummary::from_outcomes(&outcomes);
    tracing::info!("run finished: {summary}");
    Ok(RunReport {
        outcomes,
        fallbacks,
        summary,
        manifest,
        manifest_error,
    })
}

/// Move Banner files stranded in the Generic directory. No network.
pub fn reclassify(
    references: &[AssetReference],
    config: &PipelineConfig,
) -> Result<Vec<AssetOutcome>, PipelineError> {
    let store = Store::open(&config.output.asset_root)?;
    let outcomes = store.reclassify(references);
    store.finish()?;
    Ok(outcomes)
}

/// Rebuild and write the manifest from what is on disk.
pub fn build_manifest(
    config: &PipelineConfig,
    events: Option<&Sender<PipelineEvent>>,
) -> Result<(Manifest, WrittenManifest), ManifestError> {
    let built = manifest::build(
        &config.output.asset_root,
        &config.output.public_prefix,
        chrono::Utc::now(),
    )?;
    let written = manifest::write(
        &built,
        &config.output.manifest_root,
        config.output.module_format,
    )?;
    if !built.diagnostics.is_empty() {
        tracing::warn!("{} alias collisions skipped", built.diagnostics.len());
    }
    emit(
        events,
        PipelineEvent::ManifestWritten {
            path: written.mapping.clone(),
            assets: built.counts.total,
        },
    );
    Ok((built, written))
}

/// Whether a path looks like something [`collect_inputs`] would read.
pub fn is_json_input(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
}
