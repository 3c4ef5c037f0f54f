//! Variable substitution for descriptor text.
//!
//! Every text surface of a descriptor (inline file content, plugin URLs and
//! parameters, include locations) goes through [`VariableScope::resolve`].
//!
//! # Syntax
//!
//! - `{NEWLINE}` - the platform line separator
//! - `{{$name$}}` - environment variable only
//! - `{{!name!}}` - template variable only
//! - `{{name}}` - template variable, falling back to the environment
//!
//! Unknown placeholders are left verbatim. Variable values are literal:
//! a value that itself contains `{{...}}` is inserted as-is and never
//! expanded a second time.
//!
//! # Example
//!
//! ```
//! use conductor::template::VariableScope;
//! use std::collections::HashMap;
//!
//! let env = HashMap::from([("a".to_string(), "2".to_string())]);
//! let vars = HashMap::from([("a".to_string(), "1".to_string())]);
//! let scope = VariableScope::new(env, vars);
//!
//! assert_eq!(scope.resolve("{{a}} {{!a!}} {{$a$}}"), "1 1 2");
//! ```

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Literal token replaced by the platform line separator.
pub const NEWLINE_TOKEN: &str = "{NEWLINE}";

/// Matches `{{...}}` placeholders without nested braces.
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("PLACEHOLDER_REGEX must compile"));

/// The platform line separator.
pub fn line_separator() -> &'static str {
    if cfg!(windows) {
        "\r\n"
    } else {
        "\n"
    }
}

/// A parsed placeholder body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder<'a> {
    /// `{{$name$}}`
    Env(&'a str),
    /// `{{!name!}}`
    Local(&'a str),
    /// `{{name}}`
    Any(&'a str),
}

impl<'a> Placeholder<'a> {
    /// Classify the text between `{{` and `}}`.
    pub fn parse(body: &'a str) -> Self {
        if let Some(name) = strip_delimiters(body, '$') {
            Placeholder::Env(name)
        } else if let Some(name) = strip_delimiters(body, '!') {
            Placeholder::Local(name)
        } else {
            Placeholder::Any(body)
        }
    }
}

fn strip_delimiters(body: &str, delimiter: char) -> Option<&str> {
    body.strip_prefix(delimiter)?
        .strip_suffix(delimiter)
        .filter(|name| !name.is_empty())
}

/// The two variable maps a descriptor can see.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    /// Snapshot of the process environment
    env: HashMap<String, String>,
    /// Variables declared under `_conductor.variables`
    locals: HashMap<String, String>,
}

impl VariableScope {
    /// Build a scope from explicit maps.
    pub fn new(env: HashMap<String, String>, locals: HashMap<String, String>) -> Self {
        Self { env, locals }
    }

    /// Template-local variables.
    pub fn locals(&self) -> &HashMap<String, String> {
        &self.locals
    }

    /// Look up a single placeholder.
    pub fn lookup(&self, placeholder: &Placeholder<'_>) -> Option<&str> {
        match placeholder {
            Placeholder::Env(name) => self.env.get(*name),
            Placeholder::Local(name) => self.locals.get(*name),
            Placeholder::Any(name) => self.locals.get(*name).or_else(|| self.env.get(*name)),
        }
        .map(String::as_str)
    }

    /// Resolve every placeholder in `text`.
    pub fn resolve(&self, text: &str) -> String {
        let text = text.replace(NEWLINE_TOKEN, line_separator());
        PLACEHOLDER_REGEX
            .replace_all(&text, |caps: &Captures<'_>| {
                match self.lookup(&Placeholder::parse(&caps[1])) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Placeholders in `text` that this scope cannot resolve.
    pub fn unresolved(&self, text: &str) -> Vec<String> {
        PLACEHOLDER_REGEX
            .captures_iter(text)
            .filter(|caps| self.lookup(&Placeholder::parse(&caps[1])).is_none())
            .map(|caps| caps[0].to_string())
            .collect()
    }
}
