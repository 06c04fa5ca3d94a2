//! Image conversion backends and format detection.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | header-byte signatures ([`signature::sniff`]) |
//! | **Animation check** | GIF frame count, WebP `VP8X` flag, APNG `acTL` |
//! | **Convert → WebP** | `image` crate ([`RustBackend`]) or ImageMagick ([`CommandBackend`]) |
//!
//! The module is split into:
//! - **Signature**: pure byte inspection (unit testable, no decoding)
//! - **Parameters**: data structures describing a conversion
//! - **Backend**: [`ImageBackend`] trait + the two implementations

pub mod backend;
pub mod command_backend;
mod params;
pub mod rust_backend;
pub mod signature;

pub use backend::{BackendError, ImageBackend};
pub use command_backend::CommandBackend;
pub use params::{ConvertParams, Quality};
pub use rust_backend::RustBackend;
pub use signature::{MediaKind, is_animated, sniff};
