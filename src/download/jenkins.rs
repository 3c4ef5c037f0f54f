//! Build-artifact downloads from a Jenkins server.
//!
//! Uses the JSON API:
//! 1. `GET {server}/job/{job}/api/json` to confirm the job exists
//! 2. `GET {server}/job/{job}/{build}/api/json` for the build and its artifacts
//! 3. `GET {server}/job/{job}/{number}/artifact/{relativePath}` for the bytes
//!
//! A 404 at any lookup step is a [`FetchOutcome::NotFound`], not an error.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info};

use super::{transport_message, DownloadTarget, FetchOutcome};
use crate::error::{ConductorError, Result};
use crate::plugins::Credentials;

/// Which build of a job to take the artifact from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawBuild")]
pub enum BuildSelector {
    /// The most recent successful build
    #[default]
    LastSuccessful,
    /// A specific build number
    Number(u64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Number(u64),
    Text(String),
}

impl TryFrom<RawBuild> for BuildSelector {
    type Error = String;

    fn try_from(raw: RawBuild) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawBuild::Number(n) => Ok(BuildSelector::Number(n)),
            RawBuild::Text(text) => {
                let text = text.trim();
                match text.to_ascii_lowercase().as_str() {
                    "" | "latest" | "lastsuccessful" | "lastsuccessfulbuild" => {
                        Ok(BuildSelector::LastSuccessful)
                    }
                    _ => text
                        .parse()
                        .map(BuildSelector::Number)
                        .map_err(|_| format!("invalid build selector '{text}'")),
                }
            }
        }
    }
}

impl fmt::Display for BuildSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildSelector::LastSuccessful => write!(f, "lastSuccessfulBuild"),
            BuildSelector::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Which artifact to fetch from which job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsSource {
    /// Server base URL
    pub server: String,
    /// Job name; `folder/job` for jobs inside folders
    pub job: String,
    /// Build to use
    #[serde(default)]
    pub build: BuildSelector,
    /// Artifact file name, matched case-insensitively
    pub artifact: String,
}

impl JenkinsSource {
    /// URL of the job, with folder segments expanded.
    pub fn job_url(&self) -> String {
        let mut url = self.server.trim_end_matches('/').to_string();
        for segment in self.job.split('/').filter(|s| !s.is_empty()) {
            url.push_str("/job/");
            url.push_str(segment);
        }
        url
    }
}

#[derive(Debug, Deserialize)]
struct BuildInfo {
    number: u64,
    #[serde(default)]
    artifacts: Vec<ArtifactInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactInfo {
    file_name: String,
    relative_path: String,
}

/// Resolves a job, build and artifact, then streams the artifact.
pub struct JenkinsDownloader<'a> {
    client: &'a Client,
    credentials: Option<&'a Credentials>,
    target: DownloadTarget,
}

impl<'a> JenkinsDownloader<'a> {
    /// Create a downloader; without credentials requests are anonymous.
    pub fn new(
        client: &'a Client,
        credentials: Option<&'a Credentials>,
        target: DownloadTarget,
    ) -> Self {
        Self {
            client,
            credentials,
            target,
        }
    }

    /// The download target.
    pub fn target(&self) -> &DownloadTarget {
        &self.target
    }

    /// Locate and download the artifact.
    pub fn download(&self, source: &JenkinsSource) -> Result<FetchOutcome> {
        let job_url = source.job_url();

        if self
            .get_json::<serde_json::Value>(&format!("{job_url}/api/json"))?
            .is_none()
        {
            return Ok(FetchOutcome::NotFound {
                reason: format!("job '{}' does not exist", source.job),
            });
        }

        let build_url = format!("{job_url}/{}/api/json", source.build);
        let Some(build) = self.get_json::<BuildInfo>(&build_url)? else {
            return Ok(FetchOutcome::NotFound {
                reason: format!("build '{}' does not exist", source.build),
            });
        };

        let Some(artifact) = build
            .artifacts
            .iter()
            .find(|a| a.file_name.eq_ignore_ascii_case(&source.artifact))
        else {
            return Ok(FetchOutcome::NotFound {
                reason: format!("build #{} has no matching artifact", build.number),
            });
        };

        let url = format!(
            "{job_url}/{}/artifact/{}",
            build.number, artifact.relative_path
        );
        debug!("Resolved artifact {} to {}", source.artifact, url);

        let mut response = self.send(&url)?;
        if !response.status().is_success() {
            return Err(ConductorError::Retrieval {
                url,
                message: format!("HTTP {}", response.status()),
            });
        }
        let bytes = self.target.write_from(&mut response, &url)?;

        info!(
            "Downloaded {} from {} build #{} ({} bytes)",
            artifact.file_name, source.job, build.number, bytes
        );
        Ok(FetchOutcome::Complete { bytes })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match self.credentials {
            Some(credentials) => credentials.apply(request),
            None => request,
        }
    }

    fn send(&self, url: &str) -> Result<Response> {
        self.request(url)
            .send()
            .map_err(|e| ConductorError::Retrieval {
                url: url.to_string(),
                message: transport_message(e),
            })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.send(url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ConductorError::Retrieval {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }
        response
            .json()
            .map(Some)
            .map_err(|e| ConductorError::Retrieval {
                url: url.to_string(),
                message: format!("unexpected response: {}", transport_message(e)),
            })
    }
}
