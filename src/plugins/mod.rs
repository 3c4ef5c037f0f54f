//! Content-acquisition plugins.
//!
//! A node names its plugins in a `plugins` field (a string or an array of
//! strings). Each name is looked up, case-insensitively, in the
//! [`PluginFactoryRepository`]; the factory decodes the node's declaration
//! into a [`Plugin`] and resolves its [`Secret`].
//!
//! # Plugin fields
//!
//! A plugin reads its fields from an object stored under its own name on
//! the node, falling back to the node declaration itself:
//!
//! ```json
//! {
//!   "type": "file",
//!   "plugins": "http",
//!   "http": { "url": "https://repo.example.com/app.jar", "secret": "repo" }
//! }
//! ```
//!
//! # Secrets
//!
//! `secret` (or `authDetails`) is either the name of an entry under
//! `_conductor.secrets`, shared by every node that names it, or an inline
//! object owned by this one plugin.

pub mod http;
pub mod jenkins;
pub mod secret;

pub use http::{HttpPlugin, HttpPluginFactory};
pub use jenkins::{JenkinsPlugin, JenkinsPluginFactory};
pub use secret::{CredentialKind, Credentials, Secret};

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::error::{ConductorError, Result};
use crate::template::Template;

/// Fields that may carry a plugin's secret.
const SECRET_FIELDS: [&str; 2] = ["secret", "authDetails"];

/// A content-acquisition strategy bound to one node.
pub trait Plugin {
    /// The factory name that produced this plugin.
    fn name(&self) -> &str;

    /// Produce content into the node's staging path.
    ///
    /// For folders `target` is an existing directory; for files it is the
    /// staged file itself.
    fn prepare(&self, target: &Path, template: &Template) -> Result<()>;

    /// Finalize hook run after the node is moved to `destination`.
    fn execute(&self, _destination: &Path, _template: &Template) -> Result<()> {
        Ok(())
    }
}

/// Builds plugins and secrets for one plugin type.
pub trait PluginFactory: Send + Sync {
    /// Registry key, matched case-insensitively.
    fn name(&self) -> &str;

    /// Decode a node declaration into a plugin.
    fn create(&self, declaration: &Value, template: &Template) -> Result<Box<dyn Plugin>>;

    /// Decode a variable-resolved secret declaration.
    fn parse_secret(&self, declaration: &Value) -> Result<Secret> {
        Ok(Secret::new(
            self.name(),
            Credentials::from_declaration(declaration)?,
        ))
    }
}

/// Registry of plugin factories keyed by lowercase name.
#[derive(Clone, Default)]
pub struct PluginFactoryRepository {
    factories: BTreeMap<String, Arc<dyn PluginFactory>>,
}

impl PluginFactoryRepository {
    /// A registry holding the built-in `http` and `jenkins` factories.
    pub fn new() -> Self {
        let mut repository = Self::empty();
        repository.register(HttpPluginFactory);
        repository.register(JenkinsPluginFactory);
        repository
    }

    /// A registry with no factories.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any factory of the same name.
    pub fn register(&mut self, factory: impl PluginFactory + 'static) {
        self.factories
            .insert(factory.name().to_lowercase(), Arc::new(factory));
    }

    /// Look up a factory by name.
    pub fn get(&self, name: &str) -> Result<&dyn PluginFactory> {
        self.factories
            .get(&name.trim().to_lowercase())
            .map(|factory| &**factory)
            .ok_or_else(|| ConductorError::UnknownPluginType {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for PluginFactoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginFactoryRepository")
            .field("factories", &self.names())
            .finish()
    }
}

/// The plugin names declared on a node.
pub fn plugin_names(declaration: &Value) -> Result<Vec<String>> {
    match declaration.get("plugins") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(name)) => Ok(vec![name.clone()]),
        Some(Value::Array(names)) => names
            .iter()
            .map(|name| {
                name.as_str().map(str::to_string).ok_or_else(|| {
                    ConductorError::config("'plugins' entries must be strings")
                })
            })
            .collect(),
        Some(_) => Err(ConductorError::config(
            "'plugins' must be a string or an array of strings",
        )),
    }
}

/// The fields a plugin should read from a node declaration.
pub fn plugin_fields<'a>(declaration: &'a Value, plugin: &str) -> &'a Value {
    declaration
        .as_object()
        .and_then(|object| {
            object
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(plugin))
                .map(|(_, value)| value)
        })
        .filter(|value| value.is_object())
        .unwrap_or(declaration)
}

/// Resolve the secret referenced or declared in `fields`.
///
/// Returns `None` for anonymous access.
pub fn resolve_secret(
    fields: &Value,
    factory: &dyn PluginFactory,
    template: &Template,
) -> Result<Option<Arc<Secret>>> {
    let Some(declared) = SECRET_FIELDS.iter().find_map(|field| fields.get(*field)) else {
        return Ok(None);
    };

    match declared {
        Value::Null => Ok(None),
        Value::String(name) => {
            let name = template.resolve_variables(name);
            let secret = template
                .secret(&name)
                .ok_or_else(|| ConductorError::config(format!("unknown secret '{name}'")))?;
            if !secret.plugin().eq_ignore_ascii_case(factory.name()) {
                warn!(
                    "Secret '{}' was declared for '{}' but is used by '{}'",
                    name,
                    secret.plugin(),
                    factory.name()
                );
            }
            Ok(Some(secret))
        }
        Value::Object(_) => {
            let resolved = template.resolve_value(declared);
            Ok(Some(Arc::new(factory.parse_secret(&resolved)?)))
        }
        _ => Err(ConductorError::config(
            "'secret' must be a secret name or an inline secret object",
        )),
    }
}
