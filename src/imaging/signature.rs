//! Header-byte detection of media formats.
//!
//! The Format Converter refuses anything whose first bytes do not match one
//! of these signatures. Detection never trusts the file name or the HTTP
//! `Content-Type`; CMS uploads are frequently misnamed.

use std::io::Cursor;

/// Number of leading bytes needed for [`sniff`].
pub const HEADER_LEN: usize = 512;

/// Media formats recognised by header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Jpeg,
    Png,
    Gif,
    WebP,
    Bmp,
    Tiff,
    Ico,
    Avif,
    Heif,
    Svg,
    Mp4,
    Mov,
    WebM,
}

impl MediaKind {
    /// Canonical file extension.
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Jpeg => "jpg",
            MediaKind::Png => "png",
            MediaKind::Gif => "gif",
            MediaKind::WebP => "webp",
            MediaKind::Bmp => "bmp",
            MediaKind::Tiff => "tiff",
            MediaKind::Ico => "ico",
            MediaKind::Avif => "avif",
            MediaKind::Heif => "heic",
            MediaKind::Svg => "svg",
            MediaKind::Mp4 => "mp4",
            MediaKind::Mov => "mov",
            MediaKind::WebM => "webm",
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, MediaKind::Mp4 | MediaKind::Mov | MediaKind::WebM)
    }

    /// Raster images are the only kind the converter re-encodes.
    /// Vectors and video are delivered as-is.
    pub fn is_raster(self) -> bool {
        !self.is_video() && self != MediaKind::Svg
    }
}

/// Identify a format from the leading bytes of a file.
pub fn sniff(header: &[u8]) -> Option<MediaKind> {
    let h = header;
    if h.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(MediaKind::Jpeg);
    }
    if h.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(MediaKind::Png);
    }
    if h.starts_with(b"GIF87a") || h.starts_with(b"GIF89a") {
        return Some(MediaKind::Gif);
    }
    if h.len() >= 12 && &h[0..4] == b"RIFF" && &h[8..12] == b"WEBP" {
        return Some(MediaKind::WebP);
    }
    if h.starts_with(b"BM") && h.len() >= 14 {
        return Some(MediaKind::Bmp);
    }
    if h.starts_with(b"II*\0") || h.starts_with(b"MM\0*") {
        return Some(MediaKind::Tiff);
    }
    if h.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(MediaKind::WebM);
    }
    if h.len() >= 12 && &h[4..8] == b"ftyp" {
        return Some(match &h[8..12] {
            b"avif" | b"avis" => MediaKind::Avif,
            b"heic" | b"heix" | b"heim" | b"heis" | b"hevc" | b"mif1" | b"msf1" => MediaKind::Heif,
            b"qt  " => MediaKind::Mov,
            _ => MediaKind::Mp4,
        });
    }
    if h.starts_with(&[0x00, 0x00, 0x01, 0x00]) && h.len() >= 6 {
        return Some(MediaKind::Ico);
    }
    if is_svg(h) {
        return Some(MediaKind::Svg);
    }
    None
}

fn is_svg(header: &[u8]) -> bool {
    let text = String::from_utf8_lossy(header);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    (text.starts_with("<svg") || text.starts_with("<?xml") || text.starts_with("<!--"))
        && text.contains("<svg")
}

/// Whether the file holds more than one frame.
///
/// Covers multi-frame GIF, animated WebP (VP8X animation flag) and APNG
/// (`acTL` chunk before the first `IDAT`). Anything undecodable counts as
/// still.
pub fn is_animated(bytes: &[u8], kind: MediaKind) -> bool {
    match kind {
        MediaKind::Gif => gif_frame_count(bytes, 2) > 1,
        MediaKind::WebP => {
            bytes.len() > 20 && &bytes[12..16] == b"VP8X" && bytes[20] & 0x02 != 0
        }
        MediaKind::Png => png_has_actl(bytes),
        _ => false,
    }
}

fn gif_frame_count(bytes: &[u8], limit: usize) -> usize {
    use image::AnimationDecoder;
    use image::codecs::gif::GifDecoder;

    match GifDecoder::new(Cursor::new(bytes)) {
        Ok(decoder) => decoder
            .into_frames()
            .take(limit)
            .take_while(Result::is_ok)
            .count(),
        Err(_) => 0,
    }
}

fn png_has_actl(bytes: &[u8]) -> bool {
    let mut pos = 8;
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        match &bytes[pos + 4..pos + 8] {
            b"acTL" => return true,
            b"IDAT" | b"IEND" => return false,
            _ => {}
        }
        // length + type + data + crc
        pos = match pos.checked_add(12 + len) {
            Some(next) => next,
            None => return false,
        };
    }
    false
}
