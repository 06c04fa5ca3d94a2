//! External converter backend (ImageMagick).
//!
//! The second, independent conversion path. It shells out to an ImageMagick 7
//! style program (`magick` by default) so a decoder gap or bug in the `image`
//! crate does not leave an asset unconverted. ImageMagick also keeps every
//! frame when writing WebP, which makes it the only backend that can preserve
//! animations.
//!
//! A missing program is reported as [`BackendError::Unsupported`] rather than
//! an I/O failure; the converter chain treats both the same way and moves on.

use super::backend::{BackendError, ImageBackend};
use super::params::{ConvertParams, Quality};
use std::ffi::OsString;
use std::io;
use std::process::Command;

const NAME: &str = "imagemagick";

/// Runs an external ImageMagick-compatible program.
pub struct CommandBackend {
    program: String,
    quality: Quality,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, quality: Quality) -> Self {
        Self {
            program: program.into(),
            quality,
        }
    }

    fn run(&self, args: Vec<OsString>, params: &ConvertParams) -> Result<(), BackendError> {
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => BackendError::Unsupported {
                    backend: NAME,
                    reason: format!("`{}` not found on PATH", self.program),
                },
                _ => BackendError::Io(e),
            })?;

        if !output.status.success() {
            return Err(BackendError::ProcessingFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let written = std::fs::metadata(&params.output)
            .map(|m| m.len())
            .unwrap_or(0);
        if written == 0 {
            return Err(BackendError::ProcessingFailed(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(())
    }

    fn quality_args(&self) -> [OsString; 2] {
        ["-quality".into(), self.quality.value().to_string().into()]
    }
}

impl ImageBackend for CommandBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn convert_animated(&self, params: &ConvertParams) -> Result<(), BackendError> {
        let mut args: Vec<OsString> = vec![params.source.clone().into_os_string(), "-coalesce".into()];
        args.extend(self.quality_args());
        args.push(params.output.clone().into_os_string());
        self.run(args, params)
    }

    fn convert_first_frame(&self, params: &ConvertParams) -> Result<(), BackendError> {
        let mut first_frame = params.source.clone().into_os_string();
        first_frame.push("[0]");
        let mut args: Vec<OsString> = vec![first_frame];
        args.extend(self.quality_args());
        args.push(params.output.clone().into_os_string());
        self.run(args, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn params(dir: &Path) -> ConvertParams {
        let source = dir.join("in");
        std::fs::write(&source, b"GIF89a").unwrap();
        ConvertParams {
            source,
            output: dir.join("out.webp"),
            quality: Quality::default(),
        }
    }

    #[test]
    fn missing_program_is_unsupported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = CommandBackend::new("sitepress-no-such-converter", Quality::default());

        let result = backend.convert_first_frame(&params(tmp.path()));
        assert!(matches!(result, Err(BackendError::Unsupported { .. })));
        let result = backend.convert_animated(&params(tmp.path()));
        assert!(matches!(result, Err(BackendError::Unsupported { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_processing_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = CommandBackend::new("false", Quality::default());
        let result = backend.convert_first_frame(&params(tmp.path()));
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn succeeding_program_without_output_is_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = CommandBackend::new("true", Quality::default());
        let result = backend.convert_first_frame(&params(tmp.path()));
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
    }
}
