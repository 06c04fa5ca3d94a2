//! Pipeline configuration.
//!
//! Loaded from an optional `sitepress.toml` in the project directory. The file
//! is sparse: user values are merged over the stock defaults, unknown keys are
//! rejected, and the merged result is validated. CLI flags override whatever
//! the file says (see `main.rs`).
//!
//! ```toml
//! [cms]
//! base_url = "https://cms.example.com"   # resolves /uploads/... locators
//! token = "..."                          # bearer token (prefer SITEPRESS_CMS_TOKEN)
//! timeout_secs = 30                      # per-asset fetch timeout
//! upload_prefixes = ["/uploads/"]
//!
//! [output]
//! asset_root = "public/assets"
//! manifest_root = "src/generated"
//! public_prefix = "/assets"
//! module_format = "js"                   # js | ts | json
//!
//! [images]
//! quality = 82                           # external converter quality
//! external_converter = "magick"
//!
//! [classify]
//! banner_keys = ["banner"]
//!
//! [processing]
//! max_workers = 8                        # omit for auto = CPU cores
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file looked up in the project directory.
pub const CONFIG_FILENAME: &str = "sitepress.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Full pipeline configuration. Every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub cms: CmsConfig,
    pub output: OutputConfig,
    pub images: ImagesConfig,
    pub classify: ClassifyConfig,
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.quality == 0 || self.images.quality > 100 {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.cms.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "cms.timeout_secs must be non-zero".into(),
            ));
        }
        if let Some(base) = &self.cms.base_url
            && url::Url::parse(base).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "cms.base_url is not an absolute URL: {base}"
            )));
        }
        if self
            .cms
            .upload_prefixes
            .iter()
            .any(|p| !p.starts_with('/'))
        {
            return Err(ConfigError::Validation(
                "cms.upload_prefixes must be root-relative (start with '/')".into(),
            ));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Directory for Banner assets.
    pub fn banner_root(&self) -> PathBuf {
        self.output.asset_root.join(crate::store::BANNER_DIR)
    }
}

/// Where content comes from and how to fetch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CmsConfig {
    /// Origin used to resolve root-relative locators like `/uploads/a.jpg`.
    pub base_url: Option<String>,
    /// Bearer token sent with every fetch.
    pub token: Option<String>,
    /// Per-asset fetch timeout in seconds. A timeout fails only that asset.
    pub timeout_secs: u64,
    /// Root-relative prefixes that identify CMS uploads.
    pub upload_prefixes: Vec<String>,
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: 30,
            upload_prefixes: vec!["/uploads/".to_string()],
        }
    }
}

/// Format of the alias lookup module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    #[default]
    Js,
    Ts,
    Json,
}

impl ModuleFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ModuleFormat::Js => "js",
            ModuleFormat::Ts => "ts",
            ModuleFormat::Json => "json",
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Generic assets land here; Banner assets in `<asset_root>/banner`.
    pub asset_root: PathBuf,
    /// Where `asset-mapping.json` and `asset-urls.<module>` are written.
    pub manifest_root: PathBuf,
    /// URL path the asset root is served under.
    pub public_prefix: String,
    pub module_format: ModuleFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("public/assets"),
            manifest_root: PathBuf::from("src/generated"),
            public_prefix: "/assets".to_string(),
            module_format: ModuleFormat::Js,
        }
    }
}

/// Conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Lossy quality passed to the external converter (1-100).
    pub quality: u32,
    /// Program used as the independent conversion path.
    pub external_converter: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            quality: 82,
            external_converter: "magick".to_string(),
        }
    }
}

/// Category classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifyConfig {
    /// Object keys containing any of these (case-insensitive) mark a Banner subtree.
    pub banner_keys: Vec<String>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            banner_keys: vec!["banner".to_string()],
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of concurrent asset pipelines.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PipelineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `sitepress.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<PipelineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `sitepress.toml` in the given directory.
pub fn load_config(dir: &Path) -> Result<PipelineConfig, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(dir)?)
}

/// Returns a fully-commented stock `sitepress.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sitepress configuration
# =======================
# All options are optional. Values shown are the defaults.

[cms]
# Origin used to resolve root-relative locators such as /uploads/a.jpg.
# base_url = "https://cms.example.com"

# Bearer token sent with every asset fetch. Prefer the
# SITEPRESS_CMS_TOKEN environment variable over committing it here.
# token = ""

# Per-asset fetch timeout. A timeout fails that one asset only.
timeout_secs = 30

# Root-relative prefixes that mark a string as a CMS upload.
upload_prefixes = ["/uploads/"]

[output]
# Generic assets: <asset_root>/<key>.webp
# Banner assets:  <asset_root>/banner/<key>.<original extension>
asset_root = "public/assets"

# asset-mapping.json and asset-urls.<module_format> go here.
manifest_root = "src/generated"

# URL path under which asset_root is served.
public_prefix = "/assets"

# Alias table format: "js" (ES module), "ts", or "json".
module_format = "js"

[images]
# Quality for the external converter (1-100). The built-in
# encoder writes lossless WebP.
quality = 82

# Program used as the second conversion path (ImageMagick 7).
external_converter = "magick"

[classify]
# Object keys containing any of these words (case-insensitive)
# mark everything beneath them as Banner assets: delivered
# unmodified and re-fetched on every run.
banner_keys = ["banner"]

[processing]
# Max concurrent asset pipelines. Omit for auto (= CPU cores).
# max_workers = 8
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.cms.timeout_secs, 30);
        assert_eq!(config.cms.upload_prefixes, vec!["/uploads/"]);
        assert_eq!(config.output.asset_root, PathBuf::from("public/assets"));
        assert_eq!(config.output.module_format, ModuleFormat::Js);
        assert_eq!(config.classify.banner_keys, vec!["banner"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn banner_root_is_under_asset_root() {
        let config = PipelineConfig::default();
        assert_eq!(config.banner_root(), PathBuf::from("public/assets/banner"));
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.images.quality, 82);
    }

    #[test]
    fn load_config_merges_partial_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            r#"
[cms]
base_url = "https://cms.example.com"

[output]
module_format = "ts"
"#,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(
            config.cms.base_url.as_deref(),
            Some("https://cms.example.com")
        );
        assert_eq!(config.cms.timeout_secs, 30);
        assert_eq!(config.output.module_format, ModuleFormat::Ts);
        assert_eq!(config.output.public_prefix, "/assets");
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[cms]\nbase = \"x\"\n").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[cms\n").unwrap();
        assert!(load_config(tmp.path()).is_err());
    }

    #[test]
    fn validate_rejects_relative_base_url() {
        let mut config = PipelineConfig::default();
        config.cms.base_url = Some("cms.example.com".into());
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_bad_quality_and_workers() {
        let mut config = PipelineConfig::default();
        config.images.quality = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.processing.max_workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_upload_prefix() {
        let mut config = PipelineConfig::default();
        config.cms.upload_prefixes = vec!["uploads/".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_toml_deep_nested() {
        let base: toml::Value = toml::from_str("[a.b]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a.b]\ny = 3\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"]["b"]["x"].as_integer(), Some(1));
        assert_eq!(merged["a"]["b"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn stock_config_parses_to_defaults() {
        let value: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        let config = resolve_config(stock_defaults_value(), Some(value)).unwrap();
        assert_eq!(config.cms.timeout_secs, 30);
        assert_eq!(config.images.external_converter, "magick");
        assert!(config.processing.max_workers.is_none());
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_workers: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_workers: Some(cores + 64),
        };
        assert_eq!(effective_threads(&config), cores);
    }
}
