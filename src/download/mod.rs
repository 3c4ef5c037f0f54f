//! Blocking, single-attempt content retrieval.
//!
//! Two downloaders share the [`DownloadTarget`] handling:
//! - [`UrlDownloader`] streams one HTTP response into the target
//! - [`JenkinsDownloader`] locates a build artifact on a CI server first
//!
//! Neither retries. Whether a failure is fatal is up to the caller.

pub mod archive;
pub mod jenkins;
pub mod url;

pub use archive::extract_zip;
pub use jenkins::{BuildSelector, JenkinsDownloader, JenkinsSource};
pub use url::{RequestType, UrlDownloader, UrlSource};

use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Settings;
use crate::error::{ConductorError, Result};

/// Result of a retrieval that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Content was written to the target
    Complete { bytes: u64 },
    /// The server had nothing matching the request
    NotFound { reason: String },
}

/// Where downloaded content ends up.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    destination: PathBuf,
}

impl DownloadTarget {
    /// Prepare a destination.
    ///
    /// With `overwrite`, an existing file or directory at `destination` is
    /// removed right away; failing to remove it is an error.
    pub fn new(destination: impl Into<PathBuf>, overwrite: bool) -> Result<Self> {
        let destination = destination.into();
        if overwrite && destination.symlink_metadata().is_ok() {
            debug!("Removing existing download target {}", destination.display());
            remove_path(&destination)
                .map_err(|e| ConductorError::filesystem(&destination, e))?;
        }
        Ok(Self { destination })
    }

    /// The destination path.
    pub fn path(&self) -> &Path {
        &self.destination
    }

    /// Stream `reader`, the body fetched from `url`, into the destination,
    /// creating parent directories.
    ///
    /// A failed read is a [`ConductorError::Retrieval`]; a failed write is a
    /// [`ConductorError::Filesystem`].
    pub fn write_from(&self, reader: &mut dyn Read, url: &str) -> Result<u64> {
        if let Some(parent) = self.destination.parent() {
            fs::create_dir_all(parent).map_err(|e| ConductorError::filesystem(parent, e))?;
        }
        let mut file = File::create(&self.destination)
            .map_err(|e| ConductorError::filesystem(&self.destination, e))?;

        let mut source = SourceReader {
            inner: reader,
            failed: false,
        };
        let bytes = match io::copy(&mut source, &mut file) {
            Ok(bytes) => bytes,
            Err(e) if source.failed => {
                return Err(ConductorError::Retrieval {
                    url: url.to_string(),
                    message: format!("body transfer failed: {}", io_message(e)),
                })
            }
            Err(e) => return Err(ConductorError::filesystem(&self.destination, e)),
        };
        debug!("Wrote {} bytes to {}", bytes, self.destination.display());
        Ok(bytes)
    }
}

/// Remembers whether the read side of a copy failed.
struct SourceReader<'r> {
    inner: &'r mut dyn Read,
    failed: bool,
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.read(buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

/// Text of a transport error with the request URL left out.
///
/// Query credentials travel in the URL, so it must never reach a log line.
pub(crate) fn transport_message(err: reqwest::Error) -> String {
    let err = err.without_url();
    match std::error::Error::source(&err) {
        Some(source) => format!("{err}: {source}"),
        None => err.to_string(),
    }
}

fn io_message(err: io::Error) -> String {
    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<reqwest::Error>() {
            Ok(reqwest_err) => transport_message(*reqwest_err),
            Err(other) => other.to_string(),
        },
        None => kind.to_string(),
    }
}

/// Build the HTTP client shared by every retrieval of a run.
pub fn build_client(settings: &Settings) -> Result<Client> {
    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.timeout())
        .build()
        .map_err(|e| ConductorError::Other(anyhow::Error::new(e).context("building HTTP client")))
}

/// Check a file against a hex-encoded SHA-256 digest.
pub fn verify_sha256(path: &Path, expected: &str, url: &str) -> Result<()> {
    let mut file = File::open(path).map_err(|e| ConductorError::filesystem(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| ConductorError::filesystem(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = hex::encode(hasher.finalize());
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ConductorError::ChecksumMismatch {
            url: url.to_string(),
            expected: expected.trim().to_lowercase(),
            actual,
        })
    }
}

/// Remove a file, symlink or directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Last non-empty path segment of a URL, without query or fragment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .find(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
}
