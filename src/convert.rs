//! Format Converter: turns one staged download into its final file.
//!
//! Banner assets are delivered exactly as fetched. Generic assets are
//! normalized to WebP through an ordered chain of strategies, each tried only
//! when the previous one failed:
//!
//! ```text
//! validate ─► animated (every backend) ─► first frame (every backend) ─► degraded copy
//! ```
//!
//! Validation failures stop the asset with nothing written. Once the bytes
//! are known to be media, the asset always ends up on disk: if no backend
//! can produce WebP, the original bytes are kept under their original
//! extension and the outcome is marked [`Conversion::Degraded`].
//!
//! Every final file is written to a scratch file in the target directory and
//! renamed into place, so a reader never observes a partial `<key>.<ext>`.

use crate::config::ImagesConfig;
use crate::imaging::{
    BackendError, CommandBackend, ConvertParams, ImageBackend, MediaKind, Quality, RustBackend,
    is_animated, sniff,
};
use crate::types::{Category, StorageKey, StoredAsset};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Extension of every successfully converted Generic asset.
pub const NORMALIZED_EXTENSION: &str = "webp";

/// Extension used when nothing better is known.
const UNKNOWN_EXTENSION: &str = "bin";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("downloaded file is empty")]
    Empty,
    #[error("content does not match any known media signature")]
    UnknownSignature,
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How the final file was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Banner: bytes delivered verbatim.
    Copied,
    /// Video or vector: valid media that is not re-encoded.
    Passthrough,
    /// All frames kept.
    Animated { backend: &'static str },
    /// Still WebP from the first frame.
    FirstFrame { backend: &'static str },
    /// Every strategy failed; original bytes kept.
    Degraded,
}

impl Conversion {
    pub fn is_converted(self) -> bool {
        matches!(self, Conversion::Animated { .. } | Conversion::FirstFrame { .. })
    }

    pub fn is_degraded(self) -> bool {
        self == Conversion::Degraded
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::Copied => f.write_str("copied"),
            Conversion::Passthrough => f.write_str("passthrough"),
            Conversion::Animated { backend } => write!(f, "animated webp via {backend}"),
            Conversion::FirstFrame { backend } => write!(f, "webp via {backend}"),
            Conversion::Degraded => f.write_str("degraded (original kept)"),
        }
    }
}

/// Everything the converter needs to know about one staged download.
#[derive(Debug, Clone, Copy)]
pub struct ConvertRequest<'a> {
    pub key: &'a StorageKey,
    pub category: Category,
    pub target_dir: &'a Path,
    pub locator: &'a str,
    pub content_type: Option<&'a str>,
}

/// A file that now exists at its final path.
#[derive(Debug, Clone)]
pub struct Converted {
    pub path: PathBuf,
    pub asset: StoredAsset,
    pub conversion: Conversion,
}

/// Ordered conversion chain over a list of backends.
pub struct FormatConverter {
    backends: Vec<Box<dyn ImageBackend>>,
    quality: Quality,
}

impl FormatConverter {
    /// Backends are tried in the given order for each strategy.
    pub fn new(backends: Vec<Box<dyn ImageBackend>>, quality: Quality) -> Self {
        Self { backends, quality }
    }

    /// In-process `image` backend first, then the external converter.
    pub fn from_config(config: &ImagesConfig) -> Self {
        let quality = Quality::new(config.quality);
        Self::new(
            vec![
                Box::new(RustBackend::new()),
                Box::new(CommandBackend::new(
                    config.external_converter.clone(),
                    quality,
                )),
            ],
            quality,
        )
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Place the staged file at `<target_dir>/<key>.<ext>`.
    ///
    /// On a validation failure nothing is written.
    pub fn convert(&self, source: &Path, request: &ConvertRequest) -> Result<Converted, ConvertError> {
        let bytes = std::fs::read(source)?;
        if bytes.is_empty() {
            return Err(ValidationError::Empty.into());
        }
        let kind = sniff(&bytes[..bytes.len().min(crate::imaging::signature::HEADER_LEN)]);

        if request.category == Category::Banner {
            let ext = original_extension(request.locator, request.content_type, kind);
            let path = copy_verbatim(source, request, &ext)?;
            return Ok(finish(path, request, ext, Conversion::Copied));
        }

        let kind = kind.ok_or(ValidationError::UnknownSignature)?;
        if !kind.is_raster() {
            let ext = original_extension(request.locator, request.content_type, Some(kind));
            let path = copy_verbatim(source, request, &ext)?;
            return Ok(finish(path, request, ext, Conversion::Passthrough));
        }

        let dest = request
            .target_dir
            .join(format!("{}.{}", request.key, NORMALIZED_EXTENSION));

        if is_animated(&bytes, kind) {
            for backend in &self.backends {
                match self.attempt(source, &dest, |p| backend.convert_animated(p)) {
                    Ok(()) => {
                        let conversion = Conversion::Animated {
                            backend: backend.name(),
                        };
                        return Ok(finish(dest, request, NORMALIZED_EXTENSION.into(), conversion));
                    }
                    Err(e) => tracing::debug!(
                        key = %request.key,
                        backend = backend.name(),
                        "animated conversion failed: {e}"
                    ),
                }
            }
        }

        for backend in &self.backends {
            match self.attempt(source, &dest, |p| backend.convert_first_frame(p)) {
                Ok(()) => {
                    let conversion = Conversion::FirstFrame {
                        backend: backend.name(),
                    };
                    return Ok(finish(dest, request, NORMALIZED_EXTENSION.into(), conversion));
                }
                Err(e) => tracing::debug!(
                    key = %request.key,
                    backend = backend.name(),
                    "first-frame conversion failed: {e}"
                ),
            }
        }

        let ext = original_extension(request.locator, request.content_type, Some(kind));
        tracing::warn!(
            locator = request.locator,
            "no backend could convert {} to WebP; keeping original .{ext}",
            kind.extension()
        );
        let path = copy_verbatim(source, request, &ext)?;
        Ok(finish(path, request, ext, Conversion::Degraded))
    }

    /// Run one strategy into a scratch file and rename it over `dest` only
    /// if it produced a non-empty file.
    fn attempt<F>(&self, source: &Path, dest: &Path, run: F) -> Result<(), BackendError>
    where
        F: FnOnce(&ConvertParams) -> Result<(), BackendError>,
    {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let scratch = scratch_file(dir, NORMALIZED_EXTENSION)?;
        let params = ConvertParams {
            source: source.to_path_buf(),
            output: scratch.path().to_path_buf(),
            quality: self.quality,
        };
        run(&params)?;

        let written = std::fs::metadata(scratch.path())?.len();
        if written == 0 {
            return Err(BackendError::ProcessingFailed(
                "backend reported success but wrote nothing".into(),
            ));
        }
        scratch.persist(dest).map_err(|e| BackendError::Io(e.error))?;
        Ok(())
    }
}

fn finish(path: PathBuf, request: &ConvertRequest, extension: String, conversion: Conversion) -> Converted {
    Converted {
        path,
        asset: StoredAsset {
            key: request.key.clone(),
            category: request.category,
            extension,
            original_locator: Some(request.locator.to_string()),
            converted: conversion.is_converted(),
        },
        conversion,
    }
}

fn scratch_file(dir: &Path, ext: &str) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(".convert-")
        .suffix(&format!(".{ext}"))
        .tempfile_in(dir)
}

/// Copy `source` to `<target_dir>/<key>.<ext>` through a scratch file.
fn copy_verbatim(source: &Path, request: &ConvertRequest, ext: &str) -> io::Result<PathBuf> {
    let dest = request.target_dir.join(format!("{}.{}", request.key, ext));
    let mut scratch = scratch_file(request.target_dir, ext)?;
    let mut reader = std::fs::File::open(source)?;
    io::copy(&mut reader, &mut scratch)?;
    scratch.persist(&dest).map_err(|e| e.error)?;
    Ok(dest)
}

/// Extension for a file kept in its original format.
///
/// Prefers what the locator says, then the detected format, then the HTTP
/// `Content-Type`.
pub fn original_extension(
    locator: &str,
    content_type: Option<&str>,
    kind: Option<MediaKind>,
) -> String {
    locator_extension(locator)
        .or_else(|| kind.map(|k| k.extension().to_string()))
        .or_else(|| content_type.and_then(content_type_extension).map(String::from))
        .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string())
}

/// Extension of the last path segment, lowercased, ignoring query and fragment.
///
/// Returns `None` for anything that is not 1-5 ASCII alphanumerics.
pub fn locator_extension(locator: &str) -> Option<String> {
    let path = locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn content_type_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    Some(match mime.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/avif" => "avif",
        "image/heic" | "image/heif" => "heic",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, MockBehavior, RecordedOp};
    use crate::keys::resolve_key;
    use image::codecs::gif::GifEncoder;
    use image::{Frame, RgbaImage};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Forwards to a shared mock so tests can inspect it after the converter
    /// takes ownership of its backends.
    struct Shared(Arc<MockBackend>);

    impl ImageBackend for Shared {
        fn name(&self) -> &'static str {
            self.0.name
        }
        fn convert_animated(&self, params: &ConvertParams) -> Result<(), BackendError> {
            self.0.convert_animated(params)
        }
        fn convert_first_frame(&self, params: &ConvertParams) -> Result<(), BackendError> {
            self.0.convert_first_frame(params)
        }
    }

    fn converter(mocks: &[Arc<MockBackend>]) -> FormatConverter {
        let backends = mocks
            .iter()
            .map(|m| Box::new(Shared(Arc::clone(m))) as Box<dyn ImageBackend>)
            .collect();
        FormatConverter::new(backends, Quality::default())
    }

    struct Fixture {
        _tmp: TempDir,
        staging: PathBuf,
        target: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        let target = tmp.path().join("target");
        fs::create_dir_all(&staging).unwrap();
        fs::create_dir_all(&target).unwrap();
        Fixture {
            _tmp: tmp,
            staging,
            target,
        }
    }

    fn stage(fx: &Fixture, bytes: &[u8]) -> PathBuf {
        let path = fx.staging.join("download");
        fs::write(&path, bytes).unwrap();
        path
    }

    /// JPEG signature followed by garbage: passes validation, decodes nowhere.
    fn jpeg_header() -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend_from_slice(&[0u8; 60]);
        bytes
    }

    fn animated_gif() -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            let frames = (0..3u8).map(|i| {
                Frame::new(RgbaImage::from_pixel(8, 8, image::Rgba([i * 70, 0, 0, 255])))
            });
            encoder.encode_frames(frames).unwrap();
        }
        bytes
    }

    fn request<'a>(key: &'a StorageKey, category: Category, target: &'a Path, locator: &'a str) -> ConvertRequest<'a> {
        ConvertRequest {
            key,
            category,
            target_dir: target,
            locator,
            content_type: None,
        }
    }

    fn target_files(fx: &Fixture) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&fx.target)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn first_backend_wins_when_it_succeeds() {
        let fx = fixture();
        let a = Arc::new(MockBackend::succeeding("a"));
        let b = Arc::new(MockBackend::succeeding("b"));
        let key = resolve_key("/uploads/a.jpg");
        let source = stage(&fx, &jpeg_header());

        let out = converter(&[a.clone(), b.clone()])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/a.jpg"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::FirstFrame { backend: "a" });
        assert_eq!(out.path, fx.target.join(format!("{key}.webp")));
        assert_eq!(fs::read_to_string(&out.path).unwrap(), "webp from a");
        assert!(out.asset.converted);
        assert!(b.get_operations().is_empty());
        assert_eq!(target_files(&fx), vec![format!("{key}.webp")]);
    }

    #[test]
    fn falls_through_to_second_backend() {
        let fx = fixture();
        let a = Arc::new(MockBackend::failing("a"));
        let b = Arc::new(MockBackend::succeeding("b"));
        let key = resolve_key("/uploads/a.jpg");
        let source = stage(&fx, &jpeg_header());

        let out = converter(&[a.clone(), b.clone()])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/a.jpg"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::FirstFrame { backend: "b" });
        assert_eq!(a.get_operations().len(), 1);
        assert_eq!(target_files(&fx), vec![format!("{key}.webp")]);
    }

    #[test]
    fn empty_output_counts_as_failure() {
        let fx = fixture();
        let a = Arc::new(MockBackend::new("a", MockBehavior::Fail, MockBehavior::SucceedEmpty));
        let b = Arc::new(MockBackend::succeeding("b"));
        let key = resolve_key("/uploads/a.jpg");
        let source = stage(&fx, &jpeg_header());

        let out = converter(&[a, b])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/a.jpg"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::FirstFrame { backend: "b" });
    }

    #[test]
    fn animated_source_tries_animation_on_every_backend_first() {
        let fx = fixture();
        let a = Arc::new(MockBackend::new("a", MockBehavior::Fail, MockBehavior::Succeed));
        let b = Arc::new(MockBackend::succeeding("b"));
        let key = resolve_key("/uploads/spinner.gif");
        let source = stage(&fx, &animated_gif());

        let out = converter(&[a.clone(), b.clone()])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/spinner.gif"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::Animated { backend: "b" });
        assert!(matches!(a.get_operations()[..], [RecordedOp::Animated { .. }]));
        assert!(matches!(b.get_operations()[..], [RecordedOp::Animated { .. }]));
    }

    #[test]
    fn still_source_skips_animation_strategy() {
        let fx = fixture();
        let a = Arc::new(MockBackend::succeeding("a"));
        let key = resolve_key("/uploads/a.jpg");
        let source = stage(&fx, &jpeg_header());

        converter(&[a.clone()])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/a.jpg"))
            .unwrap();

        assert!(matches!(a.get_operations()[..], [RecordedOp::FirstFrame { .. }]));
    }

    #[test]
    fn exhausted_chain_keeps_original_bytes() {
        let fx = fixture();
        let a = Arc::new(MockBackend::failing("a"));
        let b = Arc::new(MockBackend::failing("b"));
        let key = resolve_key("/uploads/photo.JPG");
        let bytes = jpeg_header();
        let source = stage(&fx, &bytes);

        let out = converter(&[a, b])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/photo.JPG"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::Degraded);
        assert!(!out.asset.converted);
        assert_eq!(out.asset.extension, "jpg");
        assert_eq!(fs::read(&out.path).unwrap(), bytes);
        assert_eq!(target_files(&fx), vec![format!("{key}.jpg")]);
    }

    #[test]
    fn empty_download_is_rejected_without_output() {
        let fx = fixture();
        let a = Arc::new(MockBackend::succeeding("a"));
        let key = resolve_key("/uploads/a.jpg");
        let source = stage(&fx, b"");

        for category in [Category::Generic, Category::Banner] {
            let err = converter(&[a.clone()])
                .convert(&source, &request(&key, category, &fx.target, "/uploads/a.jpg"))
                .unwrap_err();
            assert!(matches!(err, ConvertError::Validation(ValidationError::Empty)));
        }
        assert!(target_files(&fx).is_empty());
        assert!(a.get_operations().is_empty());
    }

    #[test]
    fn unknown_signature_is_rejected_without_output() {
        let fx = fixture();
        let a = Arc::new(MockBackend::succeeding("a"));
        let key = resolve_key("/uploads/a.jpg");
        let source = stage(&fx, b"<html>404 not found</html>");

        let err = converter(&[a.clone()])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/a.jpg"))
            .unwrap_err();

        assert!(matches!(
            err,
            ConvertError::Validation(ValidationError::UnknownSignature)
        ));
        assert!(target_files(&fx).is_empty());
        assert!(a.get_operations().is_empty());
    }

    #[test]
    fn banner_is_copied_verbatim() {
        let fx = fixture();
        let a = Arc::new(MockBackend::succeeding("a"));
        let key = resolve_key("/uploads/hero.png");
        let bytes = b"\x89PNG\r\n\x1a\nnot-really-a-png".to_vec();
        let source = stage(&fx, &bytes);

        let out = converter(&[a.clone()])
            .convert(&source, &request(&key, Category::Banner, &fx.target, "/uploads/hero.png"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::Copied);
        assert_eq!(out.asset.extension, "png");
        assert_eq!(out.asset.category, Category::Banner);
        assert_eq!(fs::read(&out.path).unwrap(), bytes);
        assert!(a.get_operations().is_empty());
    }

    #[test]
    fn video_passes_through_unconverted() {
        let fx = fixture();
        let a = Arc::new(MockBackend::succeeding("a"));
        let key = resolve_key("https://cdn.test/clip");
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypmp42");
        bytes.extend_from_slice(&[0u8; 16]);
        let source = stage(&fx, &bytes);

        let out = converter(&[a.clone()])
            .convert(&source, &request(&key, Category::Generic, &fx.target, "https://cdn.test/clip"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::Passthrough);
        assert_eq!(out.asset.extension, "mp4");
        assert!(!out.conversion.is_degraded());
        assert!(a.get_operations().is_empty());
    }

    #[test]
    fn real_backend_produces_webp() {
        let fx = fixture();
        let source = fx.staging.join("download");
        image::RgbImage::from_pixel(12, 10, image::Rgb([10, 200, 30]))
            .save_with_format(&source, image::ImageFormat::Png)
            .unwrap();
        let key = resolve_key("/uploads/green.png");
        let converter = FormatConverter::new(vec![Box::new(RustBackend::new())], Quality::default());

        let out = converter
            .convert(&source, &request(&key, Category::Generic, &fx.target, "/uploads/green.png"))
            .unwrap();

        assert_eq!(out.conversion, Conversion::FirstFrame { backend: "image-rs" });
        let bytes = fs::read(&out.path).unwrap();
        assert_eq!(sniff(&bytes), Some(MediaKind::WebP));
    }

    #[test]
    fn locator_extension_rules() {
        assert_eq!(locator_extension("/uploads/a.JPG").as_deref(), Some("jpg"));
        assert_eq!(locator_extension("https://x.test/b.png?w=100#top").as_deref(), Some("png"));
        assert_eq!(locator_extension("https://x.test/dir.v2/file"), None);
        assert_eq!(locator_extension("/uploads/.hidden"), None);
        assert_eq!(locator_extension("/uploads/archive.tar-gz"), None);
        assert_eq!(locator_extension("/uploads/a.toolong"), None);
    }

    #[test]
    fn original_extension_precedence() {
        assert_eq!(original_extension("/u/a.jpeg", Some("image/png"), Some(MediaKind::Png)), "jpeg");
        assert_eq!(original_extension("/u/a", Some("image/png"), Some(MediaKind::Gif)), "gif");
        assert_eq!(original_extension("/u/a", Some("image/svg+xml; charset=utf-8"), None), "svg");
        assert_eq!(original_extension("/u/a", None, None), "bin");
    }
}
