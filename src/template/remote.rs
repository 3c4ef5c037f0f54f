//! Descriptor locations and fetching.
//!
//! A descriptor (root or include) lives either behind an `http(s)://` URL
//! or on the local filesystem. Relative include locations resolve against
//! the descriptor that names them.

use reqwest::blocking::Client;
use reqwest::Url;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::download::transport_message;
use crate::error::{ConductorError, Result};

/// Where a descriptor is read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorLocation {
    /// An absolute HTTP(S) URL
    Remote(String),
    /// A filesystem path
    Local(PathBuf),
}

impl DescriptorLocation {
    /// Interpret `raw`, resolving relative locations against `base`.
    pub fn parse(raw: &str, base: Option<&DescriptorLocation>) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConductorError::config("descriptor location is empty"));
        }
        if is_remote(raw) {
            return Ok(DescriptorLocation::Remote(raw.to_string()));
        }

        match base {
            Some(DescriptorLocation::Remote(base_url)) => {
                let joined = Url::parse(base_url)
                    .and_then(|url| url.join(raw))
                    .map_err(|e| {
                        ConductorError::config(format!(
                            "cannot resolve '{raw}' against '{base_url}': {e}"
                        ))
                    })?;
                Ok(DescriptorLocation::Remote(joined.to_string()))
            }
            Some(DescriptorLocation::Local(base_path)) if Path::new(raw).is_relative() => {
                let dir = base_path.parent().unwrap_or(Path::new(""));
                Ok(DescriptorLocation::Local(dir.join(raw)))
            }
            _ => Ok(DescriptorLocation::Local(PathBuf::from(raw))),
        }
    }

    /// Identity used for include-cycle detection.
    pub fn key(&self) -> String {
        match self {
            DescriptorLocation::Remote(url) => url.clone(),
            DescriptorLocation::Local(path) => std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
        }
    }

    /// Whether the descriptor is YAML rather than JSON.
    pub fn is_yaml(&self) -> bool {
        let name = match self {
            DescriptorLocation::Remote(url) => url.split(['?', '#']).next().unwrap_or(url),
            DescriptorLocation::Local(path) => path.to_str().unwrap_or_default(),
        };
        let name = name.to_ascii_lowercase();
        name.ends_with(".yml") || name.ends_with(".yaml")
    }
}

impl fmt::Display for DescriptorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorLocation::Remote(url) => write!(f, "{url}"),
            DescriptorLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

fn is_remote(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Reads descriptor text from a [`DescriptorLocation`].
#[derive(Debug, Clone)]
pub struct DescriptorFetcher {
    client: Client,
}

impl DescriptorFetcher {
    /// Create a fetcher sharing the run's HTTP client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch the descriptor text.
    pub fn fetch(&self, location: &DescriptorLocation) -> Result<String> {
        match location {
            DescriptorLocation::Remote(url) => self.fetch_remote(url),
            DescriptorLocation::Local(path) => {
                debug!("Reading descriptor {}", path.display());
                std::fs::read_to_string(path).map_err(|e| ConductorError::Retrieval {
                    url: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn fetch_remote(&self, url: &str) -> Result<String> {
        debug!("Fetching descriptor {}", url);
        let retrieval_error = |message: String| ConductorError::Retrieval {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| retrieval_error(transport_message(e)))?;

        if !response.status().is_success() {
            return Err(retrieval_error(format!("HTTP {}", response.status())));
        }

        response.text().map_err(|e| {
            retrieval_error(format!("failed to read response: {}", transport_message(e)))
        })
    }
}
