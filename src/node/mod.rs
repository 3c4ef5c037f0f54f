//! The filesystem model built from a merged descriptor.
//!
//! Each entry of the `filesystem` tree becomes a [`Node`]: a [`FileNode`]
//! or a [`FolderNode`]. Nodes carry their path relative to the working
//! directory and look up variables, secrets and plugins through the
//! [`Template`] passed to every phase.
//!
//! # Lifecycle
//!
//! 1. `parse` - build children, resolve content, attach plugins
//! 2. `prepare` - write content into the staging directory
//! 3. `delete` - remove what currently sits at the destination
//! 4. `apply` - move staged content into place, then run plugin hooks
//!
//! Each phase runs over the whole forest before the next one starts.

pub mod file;
pub mod folder;
pub mod retrieval;

pub use file::FileNode;
pub use folder::FolderNode;
pub use retrieval::Retrieval;

use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::download::remove_path;
use crate::error::{ConductorError, Result};
use crate::plugins::{plugin_names, Plugin};
use crate::template::Template;

/// The two node variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    /// The `type` value that declares this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Folder => "folder",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file or folder of the target tree.
pub enum Node {
    File(FileNode),
    Folder(FolderNode),
}

impl Node {
    /// Validate a declaration and build the matching node.
    ///
    /// `parent` is the parent's path relative to the working directory.
    pub fn from_declaration(name: &str, parent: &Path, declaration: &Value) -> Result<Self> {
        let kind = declared_kind(name, declaration)?;
        match kind {
            NodeKind::File => FileNode::new(name, parent, declaration).map(Node::File),
            NodeKind::Folder => FolderNode::new(name, parent, declaration).map(Node::Folder),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Folder(_) => NodeKind::Folder,
        }
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    /// Path relative to the working directory.
    pub fn relative_path(&self) -> &Path {
        &self.header().path
    }

    /// Where the node ends up.
    pub fn destination(&self, template: &Template) -> PathBuf {
        template.work_dir().join(self.relative_path())
    }

    /// Where `prepare` writes the node.
    pub fn staging_path(&self, template: &Template) -> PathBuf {
        template.staging_dir().join(self.relative_path())
    }

    /// Plugins attached during `parse`.
    pub fn plugins(&self) -> &[Box<dyn Plugin>] {
        &self.header().plugins
    }

    /// Build children, resolve content and attach plugins.
    pub fn parse(&mut self, template: &Template) -> Result<()> {
        match self {
            Node::File(file) => file.parse(template),
            Node::Folder(folder) => folder.parse(template),
        }
    }

    /// Produce content into the staging directory.
    pub fn prepare(&self, template: &Template) -> Result<()> {
        match self {
            Node::File(file) => file.prepare(template),
            Node::Folder(folder) => folder.prepare(template),
        }
    }

    /// Remove the current destination, children before their folder.
    /// Failures only warn.
    pub fn delete(&self, template: &Template) {
        for path in self.deletion_order() {
            remove_best_effort(&template.work_dir().join(path));
        }
    }

    /// Paths `delete` removes, relative to the work dir, in post-order.
    pub fn deletion_order(&self) -> Vec<&Path> {
        let mut paths = Vec::new();
        self.collect_post_order(&mut paths);
        paths
    }

    fn collect_post_order<'a>(&'a self, paths: &mut Vec<&'a Path>) {
        if let Node::Folder(folder) = self {
            for child in folder.children() {
                child.collect_post_order(paths);
            }
        }
        paths.push(self.relative_path());
    }

    /// Move staged content to the destination and run plugin hooks.
    pub fn apply(&self, template: &Template) -> Result<()> {
        match self {
            Node::File(file) => file.apply(template),
            Node::Folder(folder) => folder.apply(template),
        }
    }

    /// Visit this node and its descendants, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node)) {
        visit(self);
        if let Node::Folder(folder) = self {
            for child in folder.children() {
                child.walk(visit);
            }
        }
    }

    fn header(&self) -> &NodeHeader {
        match self {
            Node::File(file) => &file.header,
            Node::Folder(folder) => &folder.header,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<&str> = self.plugins().iter().map(|p| p.name()).collect();
        f.debug_struct("Node")
            .field("kind", &self.kind())
            .field("path", &self.relative_path())
            .field("plugins", &plugins)
            .finish()
    }
}

/// State shared by both node variants.
pub(crate) struct NodeHeader {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) declaration: Map<String, Value>,
    pub(crate) plugins: Vec<Box<dyn Plugin>>,
}

impl NodeHeader {
    /// Validate the parts every node shares.
    fn new(name: &str, parent: &Path, declaration: &Value, kind: NodeKind) -> Result<Self> {
        validate_name(name)?;
        let found = declared_kind(name, declaration)?;
        if found != kind {
            return Err(ConductorError::config(format!(
                "'{name}' is declared as {found} but built as {kind}"
            )));
        }
        let declaration = declaration.as_object().cloned().unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            path: parent.join(name),
            declaration,
            plugins: Vec::new(),
        })
    }

    /// Display form of the node path.
    fn display(&self) -> String {
        self.path.display().to_string()
    }

    fn attach_plugins(&mut self, template: &Template) -> Result<()> {
        let declaration = Value::Object(self.declaration.clone());
        for name in plugin_names(&declaration)? {
            let factory = template.plugins().get(&name)?;
            debug!("Attaching plugin '{}' to {}", factory.name(), self.display());
            self.plugins.push(factory.create(&declaration, template)?);
        }
        Ok(())
    }

    fn declares_plugins(&self) -> bool {
        match self.declaration.get("plugins") {
            Some(Value::String(name)) => !name.trim().is_empty(),
            Some(Value::Array(names)) => !names.is_empty(),
            _ => false,
        }
    }

    fn prepare_plugins(&self, target: &Path, template: &Template) -> Result<()> {
        for plugin in &self.plugins {
            debug!("Running plugin '{}' for {}", plugin.name(), self.display());
            plugin.prepare(target, template)?;
        }
        Ok(())
    }

    fn execute_plugins(&self, destination: &Path, template: &Template) -> Result<()> {
        for plugin in &self.plugins {
            plugin.execute(destination, template)?;
        }
        Ok(())
    }
}

fn declared_kind(name: &str, declaration: &Value) -> Result<NodeKind> {
    let object = declaration
        .as_object()
        .ok_or_else(|| ConductorError::config(format!("'{name}' must be an object")))?;
    match object.get("type").and_then(Value::as_str) {
        Some(kind) if kind.eq_ignore_ascii_case("file") => Ok(NodeKind::File),
        Some(kind) if kind.eq_ignore_ascii_case("folder") => Ok(NodeKind::Folder),
        Some(other) => Err(ConductorError::config(format!(
            "'{name}' has unknown type '{other}'"
        ))),
        None => Err(ConductorError::config(format!("'{name}' has no 'type'"))),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ConductorError::config(format!(
            "'{name}' is not a valid file or folder name"
        )));
    }
    Ok(())
}

/// Remove `path` if it exists, warning on failure.
fn remove_best_effort(path: &Path) {
    if path.symlink_metadata().is_err() {
        return;
    }
    match remove_path(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// Move `from` to `to`, replacing whatever is at `to`.
///
/// Falls back to copy and remove when a rename is not possible.
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if to.symlink_metadata().is_ok() {
        remove_path(to).map_err(|e| ConductorError::filesystem(to, e))?;
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| ConductorError::filesystem(parent, e))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_recursive(from, to)?;
    remove_best_effort(from);
    Ok(())
}

fn copy_recursive(from: &Path, to: &Path) -> Result<()> {
    let metadata = from
        .symlink_metadata()
        .map_err(|e| ConductorError::filesystem(from, e))?;
    if !metadata.is_dir() {
        fs::copy(from, to).map_err(|e| ConductorError::filesystem(to, e))?;
        return Ok(());
    }
    fs::create_dir_all(to).map_err(|e| ConductorError::filesystem(to, e))?;
    for entry in fs::read_dir(from).map_err(|e| ConductorError::filesystem(from, e))? {
        let entry = entry?;
        copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}
