//! End-to-end runs through the public API with an in-memory CMS.

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use sitepress::config::{ModuleFormat, PipelineConfig};
use sitepress::convert::FormatConverter;
use sitepress::fetch::{FetchError, FetchedFile, Fetcher, staging_file};
use sitepress::imaging::{ImageBackend, MediaKind, Quality, RustBackend, sniff};
use sitepress::keys::resolve_key;
use sitepress::pipeline;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

const BASE: &str = "https://cms.example.com";

/// Serves fixed bodies by URL and counts requests.
#[derive(Default)]
struct FakeCms {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl FakeCms {
    fn with(mut self, path: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(format!("{BASE}{path}"), body);
        self
    }

    fn requests_for(&self, path: &str) -> usize {
        let url = format!("{BASE}{path}");
        self.requests.lock().unwrap().iter().filter(|u| **u == url).count()
    }
}

impl Fetcher for FakeCms {
    fn fetch(&self, url: &str, staging_dir: &Path) -> Result<FetchedFile, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        let body = self.bodies.get(url).ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        let mut staged = staging_file(staging_dir)?;
        staged.write_all(body)?;
        Ok(FetchedFile::new(staged, None)?)
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 9) as u8, (y * 7) as u8, 90]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

fn project(tmp: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.cms.base_url = Some(BASE.into());
    config.output.asset_root = tmp.join("public/assets");
    config.output.manifest_root = tmp.join("src/generated");
    config.output.module_format = ModuleFormat::Json;
    config
}

fn rust_only() -> FormatConverter {
    FormatConverter::new(
        vec![Box::new(RustBackend::new()) as Box<dyn ImageBackend>],
        Quality::default(),
    )
}

fn aliases(config: &PipelineConfig) -> serde_json::Map<String, serde_json::Value> {
    let text = std::fs::read_to_string(config.output.manifest_root.join("asset-urls.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn page_content_is_ingested_and_published() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    let banner_bytes = png(40, 10);
    let cms = FakeCms::default()
        .with("/uploads/team.png", png(16, 16))
        .with("/uploads/wide.png", banner_bytes.clone());

    let page = json!({
        "data": {
            "attributes": {
                "title": "About us",
                "team": { "photo": { "media": { "url": "/uploads/team.png" } } },
                "pageBanner": { "desktop": { "url": "/uploads/wide.png" } }
            }
        }
    });
    let refs = pipeline::extract_references(&[page], &config);
    assert_eq!(refs.len(), 2);

    let report = pipeline::run(&refs, &config, &cms, &rust_only(), None).unwrap();
    assert_eq!(report.summary.stored, 2);
    assert_eq!(report.summary.failed, 0);

    // Generic: converted to real WebP.
    let team_key = resolve_key("/uploads/team.png");
    let team = config.output.asset_root.join(format!("{team_key}.webp"));
    assert_eq!(sniff(&std::fs::read(&team).unwrap()), Some(MediaKind::WebP));

    // Banner: byte-for-byte copy.
    let wide_key = resolve_key("/uploads/wide.png");
    let wide = config.banner_root().join(format!("{wide_key}.png"));
    assert_eq!(std::fs::read(&wide).unwrap(), banner_bytes);

    let aliases = aliases(&config);
    assert_eq!(aliases["team.png"], format!("/assets/{team_key}.webp"));
    let banner_public = format!("/assets/banner/{wide_key}.png");
    for alias in [
        "wide.png".to_string(),
        wide_key.to_string(),
        format!("banner/{wide_key}"),
        banner_public.clone(),
    ] {
        assert_eq!(aliases[&alias], banner_public, "alias {alias}");
    }
}

#[test]
fn rerun_only_touches_banners() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    let cms = FakeCms::default()
        .with("/uploads/a.png", png(8, 8))
        .with("/uploads/b.png", png(8, 8));
    let doc = json!({ "topBanner": "/uploads/b.png", "body": ["/uploads/a.png"] });
    let refs = pipeline::extract_references(&[doc], &config);

    pipeline::run(&refs, &config, &cms, &rust_only(), None).unwrap();
    let first_mapping =
        std::fs::read_to_string(config.output.manifest_root.join("asset-urls.json")).unwrap();
    let second = pipeline::run(&refs, &config, &cms, &rust_only(), None).unwrap();
    let second_mapping =
        std::fs::read_to_string(config.output.manifest_root.join("asset-urls.json")).unwrap();

    assert_eq!(cms.requests_for("/uploads/a.png"), 1);
    assert_eq!(cms.requests_for("/uploads/b.png"), 2);
    assert_eq!(second.summary.reused, 1);
    assert_eq!(first_mapping, second_mapping);
}

#[test]
fn manifest_only_run_matches_disk() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    let cms = FakeCms::default().with("/uploads/a.png", png(8, 8));
    let refs = pipeline::extract_references(&[json!({ "img": "/uploads/a.png" })], &config);
    pipeline::run(&refs, &config, &cms, &rust_only(), None).unwrap();

    // A file removed out of band disappears from the next manifest.
    let key = resolve_key("/uploads/a.png");
    std::fs::remove_file(config.output.asset_root.join(format!("{key}.webp"))).unwrap();
    let (manifest, _) = pipeline::build_manifest(&config, None).unwrap();

    assert_eq!(manifest.counts.total, 0);
    assert!(aliases(&config).is_empty());
}
