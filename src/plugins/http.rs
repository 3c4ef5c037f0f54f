//! The `http` plugin: fill a node from a URL.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{plugin_fields, resolve_secret, Plugin, PluginFactory, Secret};
use crate::download::{file_name_from_url, DownloadTarget, UrlDownloader, UrlSource};
use crate::error::{ConductorError, Result};
use crate::template::Template;

/// Factory for [`HttpPlugin`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpPluginFactory;

impl PluginFactory for HttpPluginFactory {
    fn name(&self) -> &str {
        "http"
    }

    fn create(&self, declaration: &Value, template: &Template) -> Result<Box<dyn Plugin>> {
        let fields = plugin_fields(declaration, self.name());
        let resolved = template.resolve_value(fields);
        let source: UrlSource = serde_json::from_value(resolved)
            .map_err(|e| ConductorError::config(format!("invalid http plugin fields: {e}")))?;
        let secret = resolve_secret(fields, self, template)?;
        Ok(Box::new(HttpPlugin::new(source, secret)))
    }
}

/// Downloads one URL into the node.
#[derive(Debug, Clone)]
pub struct HttpPlugin {
    source: UrlSource,
    secret: Option<Arc<Secret>>,
}

impl HttpPlugin {
    pub fn new(source: UrlSource, secret: Option<Arc<Secret>>) -> Self {
        Self { source, secret }
    }

    pub fn source(&self) -> &UrlSource {
        &self.source
    }

    fn destination(&self, target: &Path) -> Result<PathBuf> {
        if !target.is_dir() {
            return Ok(target.to_path_buf());
        }
        self.source
            .file_name
            .clone()
            .or_else(|| file_name_from_url(&self.source.url))
            .map(|name| target.join(name))
            .ok_or_else(|| {
                ConductorError::config(format!(
                    "cannot derive a file name from '{}'; set 'fileName'",
                    self.source.url
                ))
            })
    }
}

impl Plugin for HttpPlugin {
    fn name(&self) -> &str {
        "http"
    }

    fn prepare(&self, target: &Path, template: &Template) -> Result<()> {
        let destination = self.destination(target)?;
        debug!("http: {} -> {}", self.source.url, destination.display());
        let downloader =
            UrlDownloader::new(template.http_client(), DownloadTarget::new(destination, true)?);
        downloader.download(&self.source, self.secret.as_deref().map(Secret::credentials))?;
        Ok(())
    }
}
