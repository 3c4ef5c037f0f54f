//! Whole-folder retrieval.
//!
//! A folder declaring `retrieval: {retrieve: true, ...}` is filled by one
//! download instead of by child declarations:
//!
//! ```json
//! "retrieval": {
//!   "retrieve": true,
//!   "method": "url",
//!   "url": "https://repo.example.com/app-{{version}}.zip",
//!   "unzipRequired": true,
//!   "secret": "repo"
//! }
//! ```
//!
//! `method` is `url` (the default) or `jenkins`; Jenkins retrievals take
//! `server`, `job`, `build` and `artifact` instead of `url`.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::download::{
    extract_zip, file_name_from_url, remove_path, DownloadTarget, FetchOutcome,
    JenkinsDownloader, JenkinsSource, UrlDownloader, UrlSource,
};
use crate::error::{ConductorError, Result};
use crate::plugins::{resolve_secret, Secret};
use crate::template::Template;

/// A decoded folder retrieval.
#[derive(Debug, Clone)]
pub enum Retrieval {
    Url {
        source: UrlSource,
        unzip: bool,
        secret: Option<Arc<Secret>>,
    },
    Jenkins {
        source: JenkinsSource,
        unzip: bool,
        secret: Option<Arc<Secret>>,
    },
}

impl Retrieval {
    /// Decode a `retrieval` block. Returns `None` unless `retrieve` is true.
    pub fn from_declaration(declaration: &Value, template: &Template) -> Result<Option<Self>> {
        if !is_enabled(declaration) {
            return Ok(None);
        }

        let method = declaration
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("url")
            .trim()
            .to_ascii_lowercase();
        let unzip = declaration
            .get("unzipRequired")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let resolved = template.resolve_value(declaration);

        let retrieval = match method.as_str() {
            "url" | "http" => {
                let source: UrlSource = serde_json::from_value(resolved).map_err(|e| {
                    ConductorError::config(format!("invalid url retrieval: {e}"))
                })?;
                let factory = template.plugins().get("http")?;
                Retrieval::Url {
                    source,
                    unzip,
                    secret: resolve_secret(declaration, factory, template)?,
                }
            }
            "jenkins" => {
                let source: JenkinsSource = serde_json::from_value(resolved).map_err(|e| {
                    ConductorError::config(format!("invalid jenkins retrieval: {e}"))
                })?;
                let factory = template.plugins().get("jenkins")?;
                Retrieval::Jenkins {
                    source,
                    unzip,
                    secret: resolve_secret(declaration, factory, template)?,
                }
            }
            _ => return Err(ConductorError::UnknownPluginType { name: method }),
        };
        Ok(Some(retrieval))
    }

    /// Whether the download is an archive to unpack.
    pub fn unzip(&self) -> bool {
        match self {
            Retrieval::Url { unzip, .. } | Retrieval::Jenkins { unzip, .. } => *unzip,
        }
    }

    /// Fill the staging directory of the folder at `relative_path`.
    ///
    /// Archives go under the template's download dir, outside the staged
    /// tree.
    pub fn fetch(&self, relative_path: &Path, template: &Template) -> Result<()> {
        let staging_dir = template.staging_dir().join(relative_path);
        let download_path = if self.unzip() {
            template.download_dir().join(relative_path)
        } else {
            staging_dir.join(self.file_name()?)
        };
        let target = DownloadTarget::new(&download_path, true)?;

        match self {
            Retrieval::Url { source, secret, .. } => {
                UrlDownloader::new(template.http_client(), target)
                    .download(source, secret.as_deref().map(Secret::credentials))?;
            }
            Retrieval::Jenkins { source, secret, .. } => {
                let downloader = JenkinsDownloader::new(
                    template.http_client(),
                    secret.as_deref().map(Secret::credentials),
                    target,
                );
                if let FetchOutcome::NotFound { reason } = downloader.download(source)? {
                    return Err(ConductorError::ArtifactNotFound {
                        job: source.job.clone(),
                        artifact: source.artifact.clone(),
                        reason,
                    });
                }
            }
        }

        if self.unzip() {
            let count = extract_zip(&download_path, &staging_dir)?;
            remove_path(&download_path)
                .map_err(|e| ConductorError::filesystem(&download_path, e))?;
            info!("Unpacked {} files into {}", count, staging_dir.display());
        } else {
            debug!("Retrieved {}", download_path.display());
        }
        Ok(())
    }

    fn file_name(&self) -> Result<String> {
        match self {
            Retrieval::Url { source, .. } => source
                .file_name
                .clone()
                .or_else(|| file_name_from_url(&source.url))
                .ok_or_else(|| {
                    ConductorError::config(format!(
                        "cannot derive a file name from '{}'; set 'fileName'",
                        source.url
                    ))
                }),
            Retrieval::Jenkins { source, .. } => Ok(source.artifact.clone()),
        }
    }
}

fn is_enabled(declaration: &Value) -> bool {
    match declaration.get("retrieve") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Whether a `retrieval` block asks for a download.
pub fn retrieval_enabled(declaration: Option<&Value>) -> bool {
    declaration.is_some_and(is_enabled)
}
