//! Pure Rust conversion backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP, BMP) | `image` crate, format guessed from content |
//! | Frame decode (GIF, WebP, APNG) | `image::AnimationDecoder` |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//!
//! The `image` WebP encoder writes still images only, so
//! [`convert_animated`](ImageBackend::convert_animated) succeeds here only when
//! the container turns out to hold a single frame. Real animations fall
//! through to the next backend.

use super::backend::{BackendError, ImageBackend};
use super::params::ConvertParams;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::{WebPDecoder, WebPEncoder};
use image::{AnimationDecoder, DynamicImage, Frame, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const NAME: &str = "image-rs";

/// Pure Rust backend using the `image` crate ecosystem.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_failed(path: &Path, e: impl std::fmt::Display) -> BackendError {
    BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
}

/// Load and decode the first frame of an image, guessing the format from
/// its content (staged files carry no extension).
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| decode_failed(path, e))
}

fn guess_format(path: &Path) -> Result<Option<ImageFormat>, BackendError> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.format())
}

/// Decode every frame of an animated container.
fn decode_frames(path: &Path) -> Result<Vec<Frame>, BackendError> {
    let reader = BufReader::new(File::open(path)?);
    let frames = match guess_format(path)? {
        Some(ImageFormat::Gif) => GifDecoder::new(reader)
            .map_err(|e| decode_failed(path, e))?
            .into_frames()
            .collect_frames(),
        Some(ImageFormat::WebP) => WebPDecoder::new(reader)
            .map_err(|e| decode_failed(path, e))?
            .into_frames()
            .collect_frames(),
        Some(ImageFormat::Png) => PngDecoder::new(reader)
            .and_then(|d| d.apng())
            .map_err(|e| decode_failed(path, e))?
            .into_frames()
            .collect_frames(),
        other => {
            return Err(BackendError::Unsupported {
                backend: NAME,
                reason: format!("no frame decoder for {other:?}"),
            });
        }
    };
    frames.map_err(|e| decode_failed(path, e))
}

/// Encode and save as lossless WebP.
fn save_webp(img: &DynamicImage, path: &Path) -> Result<(), BackendError> {
    let file = File::create(path).map_err(BackendError::Io)?;
    let writer = BufWriter::new(file);
    let encoder = WebPEncoder::new_lossless(writer);
    let pixels = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };
    pixels
        .write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("WebP encode failed: {}", e)))
}

impl ImageBackend for RustBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn convert_animated(&self, params: &ConvertParams) -> Result<(), BackendError> {
        let mut frames = decode_frames(&params.source)?.into_iter();
        match (frames.next(), frames.next()) {
            (Some(only), None) => save_webp(&DynamicImage::ImageRgba8(only.into_buffer()), &params.output),
            (Some(_), Some(_)) => Err(BackendError::Unsupported {
                backend: NAME,
                reason: "animated WebP encoding".into(),
            }),
            (None, _) => Err(BackendError::ProcessingFailed(format!(
                "{} has no frames",
                params.source.display()
            ))),
        }
    }

    fn convert_first_frame(&self, params: &ConvertParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        save_webp(&img, &params.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::Quality;
    use crate::imaging::signature::{MediaKind, sniff};
    use image::codecs::gif::GifEncoder;
    use image::{ImageEncoder, RgbImage, RgbaImage};

    /// Create a small valid JPEG file with the given dimensions.
    fn create_test_jpeg(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let file = File::create(path).unwrap();
        let writer = BufWriter::new(file);
        image::codecs::jpeg::JpegEncoder::new(writer)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
    }

    fn create_test_gif(path: &Path, frames: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        let frames = (0..frames).map(|i| {
            Frame::new(RgbaImage::from_pixel(16, 16, image::Rgba([i as u8 * 60, 0, 0, 255])))
        });
        encoder.encode_frames(frames).unwrap();
    }

    fn params(dir: &Path, source: &Path) -> ConvertParams {
        ConvertParams {
            source: source.to_path_buf(),
            output: dir.join("out.webp"),
            quality: Quality::new(80),
        }
    }

    fn assert_webp(path: &Path) {
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(sniff(&bytes), Some(MediaKind::WebP));
    }

    #[test]
    fn first_frame_converts_extensionless_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("staged");
        create_test_jpeg(&source, 64, 48);

        let p = params(tmp.path(), &source);
        RustBackend::new().convert_first_frame(&p).unwrap();

        assert_webp(&p.output);
        assert_eq!(image::image_dimensions(&p.output).unwrap(), (64, 48));
    }

    #[test]
    fn first_frame_of_animated_gif() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("anim");
        create_test_gif(&source, 3);

        let p = params(tmp.path(), &source);
        RustBackend::new().convert_first_frame(&p).unwrap();
        assert_webp(&p.output);
    }

    #[test]
    fn animated_refuses_multi_frame() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("anim");
        create_test_gif(&source, 3);

        let p = params(tmp.path(), &source);
        let result = RustBackend::new().convert_animated(&p);
        assert!(matches!(result, Err(BackendError::Unsupported { .. })));
    }

    #[test]
    fn animated_accepts_single_frame_container() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("still.gif");
        create_test_gif(&source, 1);

        let p = params(tmp.path(), &source);
        RustBackend::new().convert_animated(&p).unwrap();
        assert_webp(&p.output);
    }

    #[test]
    fn animated_rejects_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("photo");
        create_test_jpeg(&source, 8, 8);

        let p = params(tmp.path(), &source);
        assert!(RustBackend::new().convert_animated(&p).is_err());
    }

    #[test]
    fn corrupt_source_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("broken");
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend_from_slice(&[0u8; 64]);
        std::fs::write(&source, bytes).unwrap();

        let p = params(tmp.path(), &source);
        assert!(RustBackend::new().convert_first_frame(&p).is_err());
    }

    #[test]
    fn missing_source_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let p = params(tmp.path(), &tmp.path().join("nope"));
        assert!(matches!(
            RustBackend::new().convert_first_frame(&p),
            Err(BackendError::Io(_))
        ));
    }
}
