//! Descriptor loading, include merging and variable resolution.
//!
//! A [`Template`] is the resolved form of a descriptor: its `_conductor`
//! metadata, variables, secrets and included descriptors, plus the
//! filesystem tree produced by merging every include into the root.
//!
//! # Descriptor layout
//!
//! ```json
//! {
//!   "_conductor": {
//!     "version": 1,
//!     "name": "app-server",
//!     "variables": { "port": "8080" },
//!     "secrets": { "repo": { "type": "http", "headers": { "X-Token": "{{$TOKEN$}}" } } },
//!     "includes": ["shared/logging.json"]
//!   },
//!   "filesystem": {
//!     "app.properties": { "type": "file", "content": "port={{port}}" }
//!   }
//! }
//! ```
//!
//! Templates are built by a [`TemplateLoader`] and are read-only afterwards.

pub mod interpolation;
pub mod merger;
pub mod remote;

pub use interpolation::{line_separator, Placeholder, VariableScope, NEWLINE_TOKEN};
pub use merger::{merge_tree, MergeOutcome, TreeMerger, FINAL_MARKER};
pub use remote::{DescriptorFetcher, DescriptorLocation};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::download::build_client;
use crate::error::{ConductorError, Result};
use crate::node::Node;
use crate::plugins::{PluginFactory, PluginFactoryRepository, Secret};

/// Top-level key holding the metadata block.
pub const METADATA_KEY: &str = "_conductor";

/// Top-level key holding the filesystem tree.
pub const FILESYSTEM_KEY: &str = "filesystem";

/// Description used when a descriptor does not provide one.
pub const DEFAULT_DESCRIPTION: &str = "No description provided";

/// Descriptor identity from the `_conductor` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: i64,
    pub name: String,
    #[serde(default = "default_description")]
    pub description: String,
}

fn default_description() -> String {
    DEFAULT_DESCRIPTION.to_string()
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(flatten)]
    metadata: Metadata,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
    #[serde(default)]
    secrets: Map<String, Value>,
    #[serde(default)]
    includes: Vec<String>,
}

/// A resolved descriptor.
pub struct Template {
    metadata: Metadata,
    location: Option<DescriptorLocation>,
    scope: VariableScope,
    secrets: HashMap<String, Arc<Secret>>,
    includes: Vec<Template>,
    own_filesystem: Map<String, Value>,
    filesystem: Map<String, Value>,
    settings: Settings,
    plugins: Arc<PluginFactoryRepository>,
    client: Client,
}

impl Template {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Where this descriptor was read from, if anywhere.
    pub fn location(&self) -> Option<&DescriptorLocation> {
        self.location.as_ref()
    }

    /// Template-local variables.
    pub fn variables(&self) -> &HashMap<String, String> {
        self.scope.locals()
    }

    pub fn scope(&self) -> &VariableScope {
        &self.scope
    }

    /// Included templates, in declaration order.
    pub fn includes(&self) -> &[Template] {
        &self.includes
    }

    /// The filesystem tree declared by this descriptor alone.
    pub fn own_filesystem(&self) -> &Map<String, Value> {
        &self.own_filesystem
    }

    /// The filesystem tree after merging every include.
    pub fn filesystem(&self) -> &Map<String, Value> {
        &self.filesystem
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Root under which nodes are materialized.
    pub fn work_dir(&self) -> &Path {
        self.settings.work_dir()
    }

    /// Scratch area for `prepare`.
    pub fn staging_dir(&self) -> PathBuf {
        self.settings.staging_dir()
    }

    /// Scratch area for archives awaiting extraction.
    pub fn download_dir(&self) -> PathBuf {
        self.settings.download_dir()
    }

    /// HTTP client shared by every retrieval of the run.
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    pub fn plugins(&self) -> &PluginFactoryRepository {
        &self.plugins
    }

    /// Look up a named secret, searching includes after this template.
    pub fn secret(&self, name: &str) -> Option<Arc<Secret>> {
        self.secrets
            .get(name)
            .cloned()
            .or_else(|| self.includes.iter().find_map(|include| include.secret(name)))
    }

    /// Names of the secrets declared by this template.
    pub fn secret_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.secrets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Substitute placeholders in `text`.
    pub fn resolve_variables(&self, text: &str) -> String {
        let resolved = self.scope.resolve(text);
        for placeholder in self.scope.unresolved(&resolved) {
            warn!("Unresolved placeholder {} left as-is", placeholder);
        }
        resolved
    }

    /// Substitute placeholders in every string inside `value`.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.resolve_variables(text)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, v)| (key.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Build the root nodes of the merged filesystem tree.
    ///
    /// Every root declaration is validated here; nothing touches the disk.
    pub fn build_filesystem_model(&self) -> Result<Vec<Node>> {
        self.filesystem
            .iter()
            .map(|(name, declaration)| Node::from_declaration(name, Path::new(""), declaration))
            .collect()
    }

    /// The merged descriptor, with secrets omitted.
    pub fn merged_descriptor(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("version".into(), self.metadata.version.into());
        metadata.insert("name".into(), self.metadata.name.clone().into());
        metadata.insert(
            "description".into(),
            self.metadata.description.clone().into(),
        );
        let variables: BTreeMap<&String, &String> = self.variables().iter().collect();
        metadata.insert(
            "variables".into(),
            serde_json::to_value(variables).unwrap_or_default(),
        );
        metadata.insert(
            "secrets".into(),
            Value::Array(
                self.secret_names()
                    .into_iter()
                    .map(|name| Value::String(name.to_string()))
                    .collect(),
            ),
        );
        metadata.insert(
            "includes".into(),
            Value::Array(
                self.includes
                    .iter()
                    .filter_map(Template::location)
                    .map(|location| Value::String(location.to_string()))
                    .collect(),
            ),
        );

        let mut document = Map::new();
        document.insert(METADATA_KEY.into(), Value::Object(metadata));
        document.insert(FILESYSTEM_KEY.into(), Value::Object(self.filesystem.clone()));
        Value::Object(document)
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("metadata", &self.metadata)
            .field("location", &self.location)
            .field("variables", self.scope.locals())
            .field("secrets", &self.secret_names())
            .field("includes", &self.includes)
            .finish_non_exhaustive()
    }
}

/// Builds [`Template`]s from descriptor text or locations.
///
/// # Example
///
/// ```
/// use conductor::config::Settings;
/// use conductor::template::TemplateLoader;
///
/// let loader = TemplateLoader::new(Settings::new("/srv/app"));
/// let template = loader
///     .parse_str(r#"{
///         "_conductor": {"version": 1, "name": "demo", "variables": {"who": "world"}},
///         "filesystem": {}
///     }"#)
///     .unwrap();
///
/// assert_eq!(template.resolve_variables("hello {{who}}"), "hello world");
/// ```
pub struct TemplateLoader {
    settings: Settings,
    env: Option<HashMap<String, String>>,
    plugins: PluginFactoryRepository,
}

struct LoadContext<'a> {
    client: &'a Client,
    fetcher: DescriptorFetcher,
    plugins: Arc<PluginFactoryRepository>,
    env: HashMap<String, String>,
    chain: Vec<String>,
}

impl TemplateLoader {
    /// A loader with the built-in plugins.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            env: None,
            plugins: PluginFactoryRepository::new(),
        }
    }

    /// Use `env` instead of the process environment for `{{$K$}}`.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Register an additional plugin factory.
    pub fn with_factory(mut self, factory: impl PluginFactory + 'static) -> Self {
        self.plugins.register(factory);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Load the descriptor at `location` (URL or path) and its includes.
    pub fn load(&self, location: &str) -> Result<Template> {
        let location = DescriptorLocation::parse(location, None)?;
        let client = build_client(&self.settings)?;
        let mut ctx = self.context(&client);

        let text = ctx.fetcher.fetch(&location)?;
        let document = parse_document(&text, &location)?;
        ctx.chain.push(location.key());
        let template = self.build(&mut ctx, &document, Some(location), 0)?;

        info!(
            "Loaded descriptor '{}' v{} with {} include(s)",
            template.metadata.name,
            template.metadata.version,
            template.includes.len()
        );
        Ok(template)
    }

    /// Build a template from JSON text. Relative includes resolve against
    /// the current directory.
    pub fn parse_str(&self, text: &str) -> Result<Template> {
        let document: Value =
            serde_json::from_str(text).map_err(|e| ConductorError::DescriptorParse {
                origin: "<inline>".to_string(),
                message: e.to_string(),
            })?;
        let client = build_client(&self.settings)?;
        let mut ctx = self.context(&client);
        self.build(&mut ctx, &document, None, 0)
    }

    fn context<'a>(&self, client: &'a Client) -> LoadContext<'a> {
        LoadContext {
            client,
            fetcher: DescriptorFetcher::new(client.clone()),
            plugins: Arc::new(self.plugins.clone()),
            env: self
                .env
                .clone()
                .unwrap_or_else(|| std::env::vars().collect()),
            chain: Vec::new(),
        }
    }

    fn build(
        &self,
        ctx: &mut LoadContext<'_>,
        document: &Value,
        location: Option<DescriptorLocation>,
        depth: usize,
    ) -> Result<Template> {
        let origin = location
            .as_ref()
            .map_or_else(|| "<inline>".to_string(), ToString::to_string);
        let object = document.as_object().ok_or_else(|| {
            ConductorError::config(format!("descriptor {origin} must be an object"))
        })?;

        let raw_metadata = object.get(METADATA_KEY).ok_or_else(|| {
            ConductorError::config(format!(
                "descriptor {origin} has no '{METADATA_KEY}' block"
            ))
        })?;
        let raw: RawMetadata = serde_json::from_value(raw_metadata.clone()).map_err(|e| {
            ConductorError::config(format!("invalid '{METADATA_KEY}' in {origin}: {e}"))
        })?;

        let scope = VariableScope::new(ctx.env.clone(), literal_variables(&raw.variables)?);
        let secrets = parse_secrets(&raw.secrets, &scope, &ctx.plugins)?;

        let own_filesystem = match object.get(FILESYSTEM_KEY) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(tree)) => tree.clone(),
            Some(_) => {
                return Err(ConductorError::config(format!(
                    "'{FILESYSTEM_KEY}' in {origin} must be an object"
                )))
            }
        };

        let mut includes = Vec::with_capacity(raw.includes.len());
        for raw_include in &raw.includes {
            let resolved = scope.resolve(raw_include);
            let include_location = DescriptorLocation::parse(&resolved, location.as_ref())?;
            includes.push(self.load_include(ctx, include_location, depth + 1)?);
        }

        let merger = if self.settings.strict_merge {
            TreeMerger::strict()
        } else {
            TreeMerger::lenient()
        };
        let mut filesystem = own_filesystem.clone();
        for include in &includes {
            let outcome = merger.merge(&mut filesystem, &include.filesystem)?;
            debug!(
                "Merged include '{}' into '{}': {} added, {} replaced, {} skipped",
                include.metadata.name,
                raw.metadata.name,
                outcome.added.len(),
                outcome.replaced.len(),
                outcome.skipped.len()
            );
        }

        Ok(Template {
            metadata: raw.metadata,
            location,
            scope,
            secrets,
            includes,
            own_filesystem,
            filesystem,
            settings: self.settings.clone(),
            plugins: Arc::clone(&ctx.plugins),
            client: ctx.client.clone(),
        })
    }

    fn load_include(
        &self,
        ctx: &mut LoadContext<'_>,
        location: DescriptorLocation,
        depth: usize,
    ) -> Result<Template> {
        let key = location.key();
        if ctx.chain.contains(&key) {
            let mut chain = ctx.chain.clone();
            chain.push(key);
            return Err(ConductorError::CyclicInclude {
                chain: chain.join(" -> "),
            });
        }
        if depth > self.settings.max_include_depth {
            return Err(ConductorError::config(format!(
                "include depth exceeds maximum of {} at {}",
                self.settings.max_include_depth, location
            )));
        }

        debug!("Resolving include {}", location);
        let text = ctx.fetcher.fetch(&location)?;
        let document = parse_document(&text, &location)?;

        ctx.chain.push(key);
        let result = self.build(ctx, &document, Some(location), depth);
        ctx.chain.pop();
        result
    }
}

/// Parse descriptor text as YAML or JSON, depending on the location.
fn parse_document(text: &str, location: &DescriptorLocation) -> Result<Value> {
    let parsed = if location.is_yaml() {
        serde_yaml::from_str::<Value>(text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Value>(text).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| ConductorError::DescriptorParse {
        origin: location.to_string(),
        message,
    })
}

/// Variable values are taken literally; scalars are stringified.
fn literal_variables(raw: &BTreeMap<String, Value>) -> Result<HashMap<String, String>> {
    raw.iter()
        .map(|(name, value)| {
            let literal = match value {
                Value::String(text) => text.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => {
                    return Err(ConductorError::config(format!(
                        "variable '{name}' must be a scalar"
                    )))
                }
            };
            Ok((name.clone(), literal))
        })
        .collect()
}

fn parse_secrets(
    raw: &Map<String, Value>,
    scope: &VariableScope,
    plugins: &PluginFactoryRepository,
) -> Result<HashMap<String, Arc<Secret>>> {
    let mut secrets = HashMap::with_capacity(raw.len());
    for (name, declaration) in raw {
        let plugin_type = declaration
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ConductorError::config(format!("secret '{name}' has no 'type'")))?;
        let factory = plugins.get(plugin_type)?;
        let secret = factory.parse_secret(&resolve_strings(declaration, scope))?;
        debug!("Declared secret '{}' for {}", name, factory.name());
        secrets.insert(name.clone(), Arc::new(secret));
    }
    Ok(secrets)
}

fn resolve_strings(value: &Value, scope: &VariableScope) -> Value {
    match value {
        Value::String(text) => Value::String(scope.resolve(text)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_strings(v, scope)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, v)| (key.clone(), resolve_strings(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::CredentialKind;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn loader() -> TemplateLoader {
        TemplateLoader::new(Settings::new("/tmp/conductor-test"))
            .with_env(HashMap::from([("HOME_DIR".to_string(), "/home/ci".to_string())]))
    }

    #[test]
    fn missing_metadata_is_configuration_error() {
        let err = loader().parse_str(r#"{"filesystem": {}}"#).unwrap_err();
        assert!(matches!(err, ConductorError::Configuration { .. }));
    }

    #[test]
    fn metadata_requires_version_and_name() {
        let err = loader()
            .parse_str(r#"{"_conductor": {"name": "x"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConductorError::Configuration { .. }));
    }

    #[test]
    fn description_defaults() {
        let template = loader()
            .parse_str(r#"{"_conductor": {"version": 2, "name": "app"}}"#)
            .unwrap();
        assert_eq!(template.metadata().version, 2);
        assert_eq!(template.metadata().description, DEFAULT_DESCRIPTION);
        assert!(template.filesystem().is_empty());
    }

    #[test]
    fn invalid_json_is_parse_error() {
        let err = loader().parse_str("{not json").unwrap_err();
        assert!(matches!(err, ConductorError::DescriptorParse { .. }));
    }

    #[test]
    fn variables_are_literal() {
        let template = loader()
            .parse_str(
                r#"{"_conductor": {"version": 1, "name": "app",
                    "variables": {"a": "{{b}}", "b": "x", "port": 8080}}}"#,
            )
            .unwrap();

        assert_eq!(template.resolve_variables("{{a}}"), "{{b}}");
        assert_eq!(template.resolve_variables("{{port}}"), "8080");
        assert_eq!(template.resolve_variables("{{$HOME_DIR$}}"), "/home/ci");
    }

    #[test]
    fn resolve_value_walks_nested_strings() {
        let template = loader()
            .parse_str(r#"{"_conductor": {"version": 1, "name": "app", "variables": {"v": "1.2"}}}"#)
            .unwrap();

        let resolved = template.resolve_value(&json!({
            "url": "https://host/app-{{v}}.zip",
            "list": ["{{v}}", 3],
            "flag": true
        }));

        assert_eq!(
            resolved,
            json!({"url": "https://host/app-1.2.zip", "list": ["1.2", 3], "flag": true})
        );
    }

    #[test]
    fn secrets_are_parsed_by_type() {
        let template = loader()
            .parse_str(
                r#"{"_conductor": {"version": 1, "name": "app",
                    "secrets": {"repo": {"type": "HTTP", "headers": {"X-Home": "{{$HOME_DIR$}}"}}}}}"#,
            )
            .unwrap();

        let secret = template.secret("repo").unwrap();
        assert_eq!(secret.plugin(), "http");
        assert_eq!(
            secret.credentials().get(CredentialKind::Header),
            &[("X-Home".to_string(), "/home/ci".to_string())]
        );
        assert!(template.secret("other").is_none());
    }

    #[test]
    fn secret_with_unknown_type_fails() {
        let err = loader()
            .parse_str(
                r#"{"_conductor": {"version": 1, "name": "app",
                    "secrets": {"repo": {"type": "ftp"}}}}"#,
            )
            .unwrap_err();
        assert!(matches!(err, ConductorError::UnknownPluginType { .. }));
    }

    #[test]
    fn includes_merge_into_root() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("base.json"),
            r#"{"_conductor": {"version": 1, "name": "base"},
                "filesystem": {
                  "logs": {"type": "folder", "content": {}},
                  "app.cfg": {"type": "file", "content": "from base"}
                }}"#,
        )
        .unwrap();
        let root = temp.path().join("root.json");
        fs::write(
            &root,
            r#"{"_conductor": {"version": 1, "name": "root", "includes": ["base.json"]},
                "filesystem": {"app.cfg": {"type": "file", "content": "from root"}}}"#,
        )
        .unwrap();

        let template = loader().load(root.to_str().unwrap()).unwrap();

        assert_eq!(template.includes().len(), 1);
        assert_eq!(template.filesystem()["app.cfg"]["content"], "from root");
        assert!(template.filesystem().contains_key("logs"));
        assert_eq!(template.own_filesystem().len(), 1);
    }

    #[test]
    fn include_cycle_is_detected() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("a.json"),
            r#"{"_conductor": {"version": 1, "name": "a", "includes": ["b.json"]}}"#,
        )
        .unwrap();
        fs::write(
            temp.path().join("b.json"),
            r#"{"_conductor": {"version": 1, "name": "b", "includes": ["a.json"]}}"#,
        )
        .unwrap();

        let err = loader()
            .load(temp.path().join("a.json").to_str().unwrap())
            .unwrap_err();

        match err {
            ConductorError::CyclicInclude { chain } => {
                assert!(chain.contains("a.json"));
                assert!(chain.contains("b.json"));
            }
            other => panic!("expected CyclicInclude, got {other:?}"),
        }
    }

    #[test]
    fn yaml_descriptor_is_accepted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("d.yml");
        fs::write(
            &path,
            "_conductor:\n  version: 1\n  name: yaml\nfilesystem:\n  a.txt:\n    type: file\n    content: hi\n",
        )
        .unwrap();

        let template = loader().load(path.to_str().unwrap()).unwrap();

        assert_eq!(template.name(), "yaml");
        assert_eq!(template.filesystem()["a.txt"]["content"], "hi");
    }

    #[test]
    fn merged_descriptor_omits_secret_values() {
        let template = loader()
            .parse_str(
                r#"{"_conductor": {"version": 1, "name": "app",
                    "secrets": {"repo": {"type": "http", "headers": {"X-Token": "s3cr3t"}}}}}"#,
            )
            .unwrap();

        let rendered = template.merged_descriptor().to_string();

        assert!(rendered.contains("repo"));
        assert!(!rendered.contains("s3cr3t"));
    }
}
