//! Conversion backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two strategies the Format Converter
//! can ask of a backend: keep every frame of an animation, or take the first
//! frame only. The two implementations share no code:
//!
//! | Backend | Animated | First frame |
//! |---|---|---|
//! | [`RustBackend`](super::rust_backend::RustBackend) | single-frame containers only | `image` crate decode → lossless WebP |
//! | [`CommandBackend`](super::command_backend::CommandBackend) | ImageMagick, all frames | ImageMagick `[0]` selector |

use super::params::ConvertParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported by {backend}: {reason}")]
    Unsupported {
        backend: &'static str,
        reason: String,
    },
}

/// A conversion implementation. Must be shareable across rayon workers.
pub trait ImageBackend: Send + Sync {
    /// Short name used in logs and outcome reports.
    fn name(&self) -> &'static str;

    /// Convert keeping all frames of an animated source.
    fn convert_animated(&self, params: &ConvertParams) -> Result<(), BackendError>;

    /// Convert the first (or only) frame to a still WebP.
    fn convert_first_frame(&self, params: &ConvertParams) -> Result<(), BackendError>;
}
