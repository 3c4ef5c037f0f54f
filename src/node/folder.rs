//! Folder nodes.

use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::retrieval::{retrieval_enabled, Retrieval};
use super::{move_into_place, remove_best_effort, Node, NodeHeader, NodeKind};
use crate::error::{ConductorError, Result};
use crate::template::Template;

/// A directory filled either from child declarations or by one retrieval.
pub struct FolderNode {
    pub(crate) header: NodeHeader,
    children: Vec<Node>,
    retrieval: Option<Retrieval>,
}

impl FolderNode {
    /// Validate a `type: folder` declaration.
    ///
    /// `content` must be an object of child declarations. It may be omitted
    /// when `retrieval.retrieve` is true.
    pub fn new(name: &str, parent: &Path, declaration: &Value) -> Result<Self> {
        let header = NodeHeader::new(name, parent, declaration, NodeKind::Folder)?;
        let retrieves = retrieval_enabled(header.declaration.get("retrieval"));
        match header.declaration.get("content") {
            Some(Value::Object(_)) => {}
            Some(_) => {
                return Err(ConductorError::config(format!(
                    "content of folder '{}' must be an object",
                    header.display()
                )))
            }
            None if retrieves => {}
            None => {
                return Err(ConductorError::config(format!(
                    "folder '{}' has no 'content'",
                    header.display()
                )))
            }
        }
        if let Some(retrieval) = header.declaration.get("retrieval") {
            if !retrieval.is_object() {
                return Err(ConductorError::config(format!(
                    "retrieval of folder '{}' must be an object",
                    header.display()
                )));
            }
        }
        Ok(Self {
            header,
            children: Vec::new(),
            retrieval: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Child nodes, available after `parse`.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// The decoded retrieval, if this folder is filled by a download.
    pub fn retrieval(&self) -> Option<&Retrieval> {
        self.retrieval.as_ref()
    }

    pub(crate) fn parse(&mut self, template: &Template) -> Result<()> {
        self.retrieval = match self.header.declaration.get("retrieval") {
            Some(declaration) => Retrieval::from_declaration(declaration, template)?,
            None => None,
        };

        self.children.clear();
        if self.retrieval.is_none() {
            if let Some(Value::Object(content)) = self.header.declaration.get("content") {
                for (name, declaration) in content {
                    let mut child = Node::from_declaration(name, &self.header.path, declaration)?;
                    child.parse(template)?;
                    self.children.push(child);
                }
            }
        } else if self
            .header
            .declaration
            .get("content")
            .and_then(Value::as_object)
            .is_some_and(|content| !content.is_empty())
        {
            return Err(ConductorError::config(format!(
                "folder '{}' declares both children and a retrieval",
                self.header.display()
            )));
        }

        self.header.attach_plugins(template)
    }

    pub(crate) fn prepare(&self, template: &Template) -> Result<()> {
        let staged = template.staging_dir().join(&self.header.path);
        fs::create_dir_all(&staged).map_err(|e| ConductorError::filesystem(&staged, e))?;

        match &self.retrieval {
            Some(retrieval) => retrieval.fetch(&self.header.path, template)?,
            None => {
                for child in &self.children {
                    child.prepare(template)?;
                }
            }
        }

        self.header.prepare_plugins(&staged, template)
    }

    /// The folder exists before any child is applied.
    pub(crate) fn apply(&self, template: &Template) -> Result<()> {
        let destination = template.work_dir().join(&self.header.path);
        fs::create_dir_all(&destination)
            .map_err(|e| ConductorError::filesystem(&destination, e))?;

        for child in &self.children {
            child.apply(template)?;
        }

        // Whatever is still staged came from a retrieval or a plugin.
        let staged = template.staging_dir().join(&self.header.path);
        if staged.is_dir() {
            let entries =
                fs::read_dir(&staged).map_err(|e| ConductorError::filesystem(&staged, e))?;
            for entry in entries {
                let entry = entry?;
                let target = destination.join(entry.file_name());
                if entry.path().is_dir() && self.is_child(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                move_into_place(&entry.path(), &target)?;
                debug!("Placed {}", target.display());
            }
            remove_best_effort(&staged);
        }

        self.header.execute_plugins(&destination, template)
    }

    fn is_child(&self, name: &str) -> bool {
        self.children
            .iter()
            .any(|child| child.kind() == NodeKind::Folder && child.name() == name)
    }
}
