//! Fetch Client: one network attempt per locator, straight into a temp file.
//!
//! There is no retry here. A failure is returned to the caller (the Storage
//! Manager), which decides whether the Fallback Resolver gets a chance. The
//! body is staged in a [`NamedTempFile`] inside the destination directory,
//! so the final placement is an atomic rename on the same filesystem and the
//! staged bytes are deleted on every exit path when the [`FetchedFile`] is
//! dropped.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no CMS base URL configured to resolve {0}")]
    Unresolvable(String),
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("IO error while staging download: {0}")]
    Io(#[from] io::Error),
}

/// Bytes of one successful fetch, staged on disk.
#[derive(Debug)]
pub struct FetchedFile {
    file: NamedTempFile,
    pub content_type: Option<String>,
    pub len: u64,
}

impl FetchedFile {
    pub fn new(file: NamedTempFile, content_type: Option<String>) -> io::Result<Self> {
        let len = file.as_file().metadata()?.len();
        Ok(Self {
            file,
            content_type,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Create the scoped staging file a fetch writes into.
pub fn staging_file(dir: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix(".fetch-").tempfile_in(dir)
}

/// Something that can retrieve one absolute URL.
///
/// Implementations make exactly one attempt.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, staging_dir: &Path) -> Result<FetchedFile, FetchError>;
}

/// Turns locators into absolute URLs.
#[derive(Debug, Clone, Default)]
pub struct UrlResolver {
    base: Option<Url>,
}

impl UrlResolver {
    pub fn new(base: Option<&str>) -> Result<Self, FetchError> {
        let base = base
            .map(|b| {
                Url::parse(b).map_err(|e| FetchError::InvalidUrl {
                    url: b.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self { base })
    }

    /// Resolve a locator: absolute URLs pass through, protocol-relative ones
    /// get `https:`, root-relative ones are joined onto the CMS base URL.
    pub fn resolve(&self, locator: &str) -> Result<String, FetchError> {
        let invalid = |e: url::ParseError| FetchError::InvalidUrl {
            url: locator.to_string(),
            reason: e.to_string(),
        };
        if locator.starts_with("//") {
            return Url::parse(&format!("https:{locator}"))
                .map(String::from)
                .map_err(invalid);
        }
        match Url::parse(locator) {
            Ok(url) => Ok(url.into()),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base
                    .as_ref()
                    .ok_or_else(|| FetchError::Unresolvable(locator.to_string()))?;
                base.join(locator).map(String::from).map_err(invalid)
            }
            Err(e) => Err(invalid(e)),
        }
    }
}

/// Blocking HTTP fetcher on `ureq`.
pub struct HttpFetcher {
    agent: ureq::Agent,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, token: Option<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

fn classify_io(url: &str, e: io::Error) -> FetchError {
    match e.kind() {
        io::ErrorKind::TimedOut => FetchError::Timeout(url.to_string()),
        _ => FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        },
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, staging_dir: &Path) -> Result<FetchedFile, FetchError> {
        let mut request = self.agent.get(url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.call().map_err(|e| match e {
            ureq::Error::StatusCode(status) => FetchError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Timeout(_) => FetchError::Timeout(url.to_string()),
            ureq::Error::Io(io) => classify_io(url, io),
            other => FetchError::Transport {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut staged = staging_file(staging_dir)?;
        let mut reader = response.into_body().into_reader();
        io::copy(&mut reader, &mut staged).map_err(|e| classify_io(url, e))?;
        staged.flush()?;

        tracing::debug!(url, bytes = staged.as_file().metadata()?.len(), "fetched");
        Ok(FetchedFile::new(staged, content_type)?)
    }
}
