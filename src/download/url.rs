//! Plain URL downloads.

use reqwest::blocking::Client;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{transport_message, verify_sha256, DownloadTarget};
use crate::error::{ConductorError, Result};
use crate::plugins::Credentials;

/// HTTP method used for a retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestType {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

impl RequestType {
    fn method(self) -> Method {
        match self {
            RequestType::Get => Method::GET,
            RequestType::Post => Method::POST,
        }
    }
}

/// Where and how to fetch one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlSource {
    /// Absolute HTTP(S) URL
    pub url: String,
    /// Request method
    #[serde(default)]
    pub request_type: RequestType,
    /// Expected hex SHA-256 of the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// File name to use when the target is a directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl UrlSource {
    /// A GET of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_type: RequestType::Get,
            sha256: None,
            file_name: None,
        }
    }
}

/// Streams one HTTP response body into a [`DownloadTarget`].
pub struct UrlDownloader<'a> {
    client: &'a Client,
    target: DownloadTarget,
}

impl<'a> UrlDownloader<'a> {
    /// Create a downloader writing to `target`.
    pub fn new(client: &'a Client, target: DownloadTarget) -> Self {
        Self { client, target }
    }

    /// The download target.
    pub fn target(&self) -> &DownloadTarget {
        &self.target
    }

    /// Perform the request and write the body.
    ///
    /// Any non-success status is a [`ConductorError::Retrieval`].
    pub fn download(&self, source: &UrlSource, credentials: Option<&Credentials>) -> Result<u64> {
        let retrieval_error = |message: String| ConductorError::Retrieval {
            url: source.url.clone(),
            message,
        };

        let mut url = Url::parse(&source.url).map_err(|e| retrieval_error(e.to_string()))?;
        if let Some(credentials) = credentials {
            credentials.apply_query(&mut url);
        }

        debug!("{:?} {}", source.request_type, source.url);
        let mut request = self.client.request(source.request_type.method(), url);
        if let Some(credentials) = credentials {
            request = credentials.apply(request);
        }

        let mut response = request
            .send()
            .map_err(|e| retrieval_error(transport_message(e)))?;
        if !response.status().is_success() {
            return Err(retrieval_error(format!("HTTP {}", response.status())));
        }

        let bytes = self.target.write_from(&mut response, &source.url)?;
        if let Some(expected) = &source.sha256 {
            verify_sha256(self.target.path(), expected, &source.url)?;
        }

        info!("Downloaded {} ({} bytes)", source.url, bytes);
        Ok(bytes)
    }
}
