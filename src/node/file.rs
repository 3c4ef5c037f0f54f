//! File nodes.

use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::{move_into_place, NodeHeader, NodeKind};
use crate::error::{ConductorError, Result};
use crate::template::{line_separator, Template};

/// A file whose content is inline text, plugin output, or both.
///
/// Inline `content` is a string or an array of lines. It may be omitted
/// when a plugin supplies the file.
pub struct FileNode {
    pub(crate) header: NodeHeader,
    content: Option<String>,
}

impl std::fmt::Debug for FileNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plugins: Vec<&str> = self.header.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("FileNode")
            .field("path", &self.header.path)
            .field("plugins", &plugins)
            .finish()
    }
}

impl FileNode {
    /// Validate a `type: file` declaration.
    pub fn new(name: &str, parent: &Path, declaration: &Value) -> Result<Self> {
        let header = NodeHeader::new(name, parent, declaration, NodeKind::File)?;
        match header.declaration.get("content") {
            Some(Value::String(_)) => {}
            Some(Value::Array(lines)) if lines.iter().all(Value::is_string) => {}
            Some(_) => {
                return Err(ConductorError::config(format!(
                    "content of file '{}' must be a string or an array of strings",
                    header.display()
                )))
            }
            None if header.declares_plugins() => {}
            None => {
                return Err(ConductorError::config(format!(
                    "file '{}' has no 'content'",
                    header.display()
                )))
            }
        }
        Ok(Self {
            header,
            content: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Rendered inline content, available after `parse`.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub(crate) fn parse(&mut self, template: &Template) -> Result<()> {
        self.content = match self.header.declaration.get("content") {
            Some(Value::String(text)) => Some(template.resolve_variables(text)),
            Some(Value::Array(lines)) => {
                let joined = lines
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(line_separator());
                Some(template.resolve_variables(&joined))
            }
            _ => None,
        };
        self.header.attach_plugins(template)
    }

    pub(crate) fn prepare(&self, template: &Template) -> Result<()> {
        let staged = template.staging_dir().join(&self.header.path);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).map_err(|e| ConductorError::filesystem(parent, e))?;
        }
        if let Some(content) = &self.content {
            debug!("Rendering {}", self.header.display());
            fs::write(&staged, content).map_err(|e| ConductorError::filesystem(&staged, e))?;
        }
        self.header.prepare_plugins(&staged, template)
    }

    pub(crate) fn apply(&self, template: &Template) -> Result<()> {
        let staged = template.staging_dir().join(&self.header.path);
        let destination = template.work_dir().join(&self.header.path);
        if staged.symlink_metadata().is_ok() {
            move_into_place(&staged, &destination)?;
            debug!("Placed {}", destination.display());
        } else {
            warn!("Nothing was staged for {}", self.header.display());
        }
        self.header.execute_plugins(&destination, template)
    }
}
