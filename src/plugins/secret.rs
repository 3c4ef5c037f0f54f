//! Credential bundles consumed by plugins.
//!
//! A [`Secret`] is either declared once under `_conductor.secrets` and shared
//! by name, or declared inline on a node. Either way its [`Credentials`] are
//! frozen once parsing finishes.
//!
//! # Declaration
//!
//! ```json
//! {
//!   "type": "http",
//!   "headers": { "X-Api-Key": "{{$API_KEY$}}" },
//!   "query": { "channel": "stable" },
//!   "username": "deploy",
//!   "password": "{{$DEPLOY_PASSWORD$}}"
//! }
//! ```
//!
//! `token` is accepted in place of `password`.

use reqwest::blocking::RequestBuilder;
use reqwest::Url;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConductorError, Result};

/// How a credential entry is attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CredentialKind {
    /// Request header
    Header,
    /// Query-string parameter
    Query,
    /// HTTP basic authentication (key is the user, value the password)
    Basic,
}

/// Credential entries grouped by kind.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    entries: BTreeMap<CredentialKind, Vec<(String, String)>>,
}

impl Credentials {
    /// An empty credential set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn insert(
        &mut self,
        kind: CredentialKind,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.entries
            .entry(kind)
            .or_default()
            .push((key.into(), value.into()));
    }

    /// Entries of one kind, in declaration order.
    pub fn get(&self, kind: CredentialKind) -> &[(String, String)] {
        self.entries.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The basic-auth pair, if any.
    pub fn basic(&self) -> Option<(&str, &str)> {
        self.get(CredentialKind::Basic)
            .first()
            .map(|(user, pass)| (user.as_str(), pass.as_str()))
    }

    /// Whether no entry is present.
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }

    /// Append query-string entries to a URL.
    pub fn apply_query(&self, url: &mut Url) {
        let query = self.get(CredentialKind::Query);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
    }

    /// Attach header and basic-auth entries to an outgoing request.
    pub fn apply(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (name, value) in self.get(CredentialKind::Header) {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some((user, pass)) = self.basic() {
            request = request.basic_auth(user, Some(pass));
        }
        request
    }

    /// Parse the credential fields of a secret declaration.
    ///
    /// String values are expected to be variable-resolved already.
    pub fn from_declaration(declaration: &Value) -> Result<Self> {
        let object = declaration
            .as_object()
            .ok_or_else(|| ConductorError::config("secret declaration must be an object"))?;

        let mut credentials = Self::new();

        for (field, kind) in [
            ("headers", CredentialKind::Header),
            ("query", CredentialKind::Query),
        ] {
            let Some(entries) = object.get(field) else {
                continue;
            };
            let entries = entries.as_object().ok_or_else(|| {
                ConductorError::config(format!("secret field '{field}' must be an object"))
            })?;
            for (key, value) in entries {
                credentials.insert(kind, key.clone(), string_field(value, field)?);
            }
        }

        if let Some(user) = object.get("username") {
            let user = string_field(user, "username")?;
            let pass = match object.get("password").or_else(|| object.get("token")) {
                Some(value) => string_field(value, "password")?,
                None => String::new(),
            };
            credentials.insert(CredentialKind::Basic, user, pass);
        }

        Ok(credentials)
    }
}

fn string_field(value: &Value, field: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConductorError::config(format!(
            "secret field '{field}' must hold plain values"
        ))),
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, entries) in &self.entries {
            for (key, _) in entries {
                map.entry(&format_args!("{kind:?}:{key}"), &"[REDACTED]");
            }
        }
        map.finish()
    }
}

/// A named credential bundle bound to one plugin type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    plugin: String,
    credentials: Credentials,
}

impl Secret {
    /// Create a secret for the given plugin type.
    pub fn new(plugin: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            plugin: plugin.into(),
            credentials,
        }
    }

    /// The plugin type this secret was parsed for.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// The credential entries.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}
