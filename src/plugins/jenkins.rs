//! The `jenkins` plugin: fill a node from a CI build artifact.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{plugin_fields, resolve_secret, Plugin, PluginFactory, Secret};
use crate::download::{DownloadTarget, FetchOutcome, JenkinsDownloader, JenkinsSource};
use crate::error::{ConductorError, Result};
use crate::template::Template;

/// Factory for [`JenkinsPlugin`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JenkinsPluginFactory;

impl PluginFactory for JenkinsPluginFactory {
    fn name(&self) -> &str {
        "jenkins"
    }

    fn create(&self, declaration: &Value, template: &Template) -> Result<Box<dyn Plugin>> {
        let fields = plugin_fields(declaration, self.name());
        let source: JenkinsSource = serde_json::from_value(template.resolve_value(fields))
            .map_err(|e| ConductorError::config(format!("invalid jenkins plugin fields: {e}")))?;
        let secret = resolve_secret(fields, self, template)?;
        Ok(Box::new(JenkinsPlugin::new(source, secret)))
    }
}

/// Downloads one build artifact into the node.
#[derive(Debug, Clone)]
pub struct JenkinsPlugin {
    source: JenkinsSource,
    secret: Option<Arc<Secret>>,
}

impl JenkinsPlugin {
    pub fn new(source: JenkinsSource, secret: Option<Arc<Secret>>) -> Self {
        Self { source, secret }
    }

    pub fn source(&self) -> &JenkinsSource {
        &self.source
    }

    fn destination(&self, target: &Path) -> PathBuf {
        if target.is_dir() {
            target.join(&self.source.artifact)
        } else {
            target.to_path_buf()
        }
    }
}

impl Plugin for JenkinsPlugin {
    fn name(&self) -> &str {
        "jenkins"
    }

    fn prepare(&self, target: &Path, template: &Template) -> Result<()> {
        let downloader = JenkinsDownloader::new(
            template.http_client(),
            self.secret.as_deref().map(Secret::credentials),
            DownloadTarget::new(self.destination(target), true)?,
        );
        match downloader.download(&self.source)? {
            FetchOutcome::Complete { .. } => Ok(()),
            FetchOutcome::NotFound { reason } => Err(ConductorError::ArtifactNotFound {
                job: self.source.job.clone(),
                artifact: self.source.artifact.clone(),
                reason,
            }),
        }
    }
}
