//! Manifest Builder: publishes what is on disk.
//!
//! Reads the final state of the asset directories (never the run's outcomes,
//! so `sitepress manifest` works on its own) and writes two files into the
//! manifest root:
//!
//! - `asset-mapping.json`: every stored asset keyed by its public path, with
//!   per-category lists and counts.
//! - `asset-urls.<js|ts|json>`: the alias table the site's templates import
//!   to turn a CMS reference into a public URL.
//!
//! ## Aliases
//!
//! Each stored file is bound under several names, all resolving to the same
//! public path:
//!
//! | Alias | Example |
//! |---|---|
//! | public path | `/assets/banner/L3Vw.jpg` |
//! | `banner/<key>` (Banner only) | `banner/L3Vw` |
//! | stored file name | `L3Vw.jpg` |
//! | bare key | `L3Vw` |
//! | original file name | `hero.jpg` |
//!
//! Every visible file in the two directories is published, including files
//! placed there by hand: a file whose stem is not a storage key still gets
//! its public path, its file name and its stem.
//!
//! Banner files register first. An alias already bound to another file is
//! not overwritten; it is reported in [`Manifest::diagnostics`]. The public
//! path is unique per file, so every file keeps at least one alias.
//!
//! A reference served by another file (a Mobile slot falling back to its
//! Desktop asset) has no file of its own. Its bare key and original file name
//! are bound to the serving file's public path, after all real files.
//!
//! Output is deterministic apart from `generated_at`.

use crate::config::ModuleFormat;
use crate::index::{StoreIndex, write_atomic};
use crate::keys::resolve_key;
use crate::store::{BANNER_DIR, relative_path};
use crate::types::{Category, StorageKey, StoredAsset};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub const MAPPING_FILENAME: &str = "asset-mapping.json";
pub const MODULE_STEM: &str = "asset-urls";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot list {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub generic: usize,
    pub banner: usize,
    pub converted: usize,
    pub total: usize,
}

/// An alias that could not be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasCollision {
    pub alias: String,
    /// Public path the alias already resolves to.
    pub bound_to: String,
    /// Public path that was refused.
    pub rejected: String,
}

/// Snapshot of the asset directories.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub generated_at: String,
    pub counts: Counts,
    pub generic: Vec<String>,
    pub banner: Vec<String>,
    pub converted: Vec<String>,
    pub assets: BTreeMap<String, StoredAsset>,
    /// Locator → public path of the file serving it in its place.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fallbacks: BTreeMap<String, String>,
    #[serde(skip)]
    pub aliases: BTreeMap<String, String>,
    #[serde(skip)]
    pub diagnostics: Vec<AliasCollision>,
}

/// Paths written by [`write`].
#[derive(Debug, Clone)]
pub struct WrittenManifest {
    pub mapping: PathBuf,
    pub module: PathBuf,
}

/// Stored assets in one category directory, sorted by file name.
fn scan_category(dir: &Path, category: Category, index: &StoreIndex) -> Result<Vec<StoredAsset>, ManifestError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut assets = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ManifestError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let (stem, extension) = name.split_once('.').unwrap_or((&*name, ""));
        let indexed = index.get(&relative_path(category, &name));
        assets.push(StoredAsset {
            key: StorageKey::from_raw(stem.to_string()),
            category,
            extension: extension.to_string(),
            original_locator: indexed.map(|e| e.locator.clone()).filter(|l| !l.is_empty()),
            converted: indexed
                .map(|e| e.converted)
                .unwrap_or(extension == crate::convert::NORMALIZED_EXTENSION),
        });
    }
    Ok(assets)
}

fn scan_with(asset_root: &Path, index: &StoreIndex) -> Result<Vec<StoredAsset>, ManifestError> {
    let mut assets = scan_category(&asset_root.join(BANNER_DIR), Category::Banner, index)?;
    assets.extend(scan_category(asset_root, Category::Generic, index)?);
    Ok(assets)
}

/// Every stored asset under the asset root, Banner first.
pub fn scan_assets(asset_root: &Path) -> Result<Vec<StoredAsset>, ManifestError> {
    scan_with(asset_root, &StoreIndex::load(asset_root))
}

fn public_url(public_prefix: &str, relative: &str) -> String {
    format!("{}/{}", public_prefix.trim_end_matches('/'), relative)
}

/// URL path a stored asset is served under.
pub fn public_path(public_prefix: &str, asset: &StoredAsset) -> String {
    public_url(public_prefix, &relative_path(asset.category, &asset.file_name()))
}

/// Last path segment of a locator, without query or fragment.
fn original_file_name(locator: &str) -> Option<&str> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

fn aliases_for(asset: &StoredAsset, public: &str) -> Vec<String> {
    let mut aliases = vec![public.to_string()];
    if asset.category == Category::Banner {
        aliases.push(format!("{BANNER_DIR}/{}", asset.key));
    }
    aliases.push(asset.file_name());
    aliases.push(asset.key.to_string());
    if let Some(name) = asset.original_locator.as_deref().and_then(original_file_name) {
        aliases.push(name.to_string());
    }
    aliases
}

/// Aliases of a reference that has no file of its own.
fn fallback_aliases(locator: &str, category: Category) -> Vec<String> {
    let key = resolve_key(locator);
    let mut aliases = Vec::new();
    if category == Category::Banner {
        aliases.push(format!("{BANNER_DIR}/{key}"));
    }
    aliases.push(key.to_string());
    if let Some(name) = original_file_name(locator) {
        aliases.push(name.to_string());
    }
    aliases
}

impl Manifest {
    /// Bind `alias` to `public` unless it already resolves elsewhere.
    fn bind(&mut self, alias: String, public: &str) {
        match self.aliases.get(&alias) {
            None => {
                self.aliases.insert(alias, public.to_string());
            }
            Some(bound) if bound == public => {}
            Some(bound) => {
                tracing::warn!("alias {alias:?} already resolves to {bound}; not binding it to {public}");
                self.diagnostics.push(AliasCollision {
                    alias,
                    bound_to: bound.clone(),
                    rejected: public.to_string(),
                });
            }
        }
    }
}

/// Build the manifest from disk.
pub fn build(asset_root: &Path, public_prefix: &str, generated_at: DateTime<Utc>) -> Result<Manifest, ManifestError> {
    let index = StoreIndex::load(asset_root);
    let assets = scan_with(asset_root, &index)?;

    let mut manifest = Manifest {
        generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        counts: Counts::default(),
        generic: Vec::new(),
        banner: Vec::new(),
        converted: Vec::new(),
        assets: BTreeMap::new(),
        fallbacks: BTreeMap::new(),
        aliases: BTreeMap::new(),
        diagnostics: Vec::new(),
    };

    for asset in assets {
        let public = public_path(public_prefix, &asset);
        for alias in aliases_for(&asset, &public) {
            manifest.bind(alias, &public);
        }

        match asset.category {
            Category::Generic => manifest.generic.push(public.clone()),
            Category::Banner => manifest.banner.push(public.clone()),
        }
        if asset.converted {
            manifest.converted.push(public.clone());
        }
        manifest.assets.insert(public, asset);
    }

    for (locator, link) in &index.fallbacks {
        let public = public_url(public_prefix, &link.target);
        if !manifest.assets.contains_key(&public) {
            tracing::debug!("fallback for {locator} points at missing {}", link.target);
            continue;
        }
        for alias in fallback_aliases(locator, link.category) {
            manifest.bind(alias, &public);
        }
        manifest.fallbacks.insert(locator.clone(), public);
    }

    manifest.generic.sort();
    manifest.banner.sort();
    manifest.converted.sort();
    manifest.counts = Counts {
        generic: manifest.generic.len(),
        banner: manifest.banner.len(),
        converted: manifest.converted.len(),
        total: manifest.assets.len(),
    };
    Ok(manifest)
}

fn object_body(aliases: &BTreeMap<String, String>) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for (alias, target) in aliases {
        body.push_str(&format!(
            "  {}: {},\n",
            serde_json::to_string(alias)?,
            serde_json::to_string(target)?
        ));
    }
    Ok(body)
}

const HEADER: &str = "// Generated by sitepress. Do not edit.\n";

const JS_RESOLVER: &str = r#"export function resolveAsset(ref) {
  if (ref == null) return undefined;
  const key = String(ref);
  if (Object.prototype.hasOwnProperty.call(assetUrls, key)) return assetUrls[key];
  const name = key.split(/[?#]/)[0].split("/").pop();
  return Object.prototype.hasOwnProperty.call(assetUrls, name) ? assetUrls[name] : undefined;
}
"#;

const TS_RESOLVER: &str = r#"export function resolveAsset(ref: string | null | undefined): string | undefined {
  if (ref == null) return undefined;
  if (Object.prototype.hasOwnProperty.call(assetUrls, ref)) return assetUrls[ref];
  const name = ref.split(/[?#]/)[0].split("/").pop() ?? "";
  return Object.prototype.hasOwnProperty.call(assetUrls, name) ? assetUrls[name] : undefined;
}
"#;

/// Render the alias table as a module the site can import.
pub fn render_module(manifest: &Manifest, format: ModuleFormat) -> Result<String, ManifestError> {
    let out = match format {
        ModuleFormat::Json => {
            let mut json = serde_json::to_string_pretty(&manifest.aliases)?;
            json.push('\n');
            json
        }
        ModuleFormat::Js => format!(
            "{HEADER}\nexport const assetUrls = Object.freeze({{\n{}}});\n\n{JS_RESOLVER}\nexport default assetUrls;\n",
            object_body(&manifest.aliases)?
        ),
        ModuleFormat::Ts => format!(
            "{HEADER}\nexport const assetUrls: Readonly<Record<string, string>> = Object.freeze({{\n{}}});\n\n{TS_RESOLVER}\nexport default assetUrls;\n",
            object_body(&manifest.aliases)?
        ),
    };
    Ok(out)
}

/// Write `asset-mapping.json` and the alias module into `manifest_root`.
pub fn write(manifest: &Manifest, manifest_root: &Path, format: ModuleFormat) -> Result<WrittenManifest, ManifestError> {
    std::fs::create_dir_all(manifest_root)?;

    let mapping = manifest_root.join(MAPPING_FILENAME);
    let mut json = serde_json::to_string_pretty(manifest)?;
    json.push('\n');
    write_atomic(&mapping, json.as_bytes())?;

    let module = manifest_root.join(format!("{MODULE_STEM}.{}", format.extension()));
    write_atomic(&module, render_module(manifest, format)?.as_bytes())?;

    Ok(WrittenManifest { mapping, module })
}
