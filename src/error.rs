//! Error types for Conductor operations.
//!
//! This module defines [`ConductorError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Descriptor problems surface as [`ConductorError::Configuration`] before
//!   any filesystem work starts
//! - Retrieval problems are kept apart from "nothing matched" outcomes so
//!   callers can tell a dead server from a missing artifact
//! - Use `anyhow::Error` (via `ConductorError::Other`) for unexpected errors

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for Conductor operations.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Malformed or missing descriptor fields.
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    /// Descriptor text could not be parsed.
    #[error("Failed to parse descriptor at {origin}: {message}")]
    DescriptorParse { origin: String, message: String },

    /// Incompatible entries met during an include merge in strict mode.
    #[error("Merge conflict at '{path}': {message}")]
    MergeConflict { path: String, message: String },

    /// An include chain refers back to itself.
    #[error("Cyclic include detected: {chain}")]
    CyclicInclude { chain: String },

    /// No plugin factory is registered under the given name.
    #[error("Unknown plugin type: {name}")]
    UnknownPluginType { name: String },

    /// Transport or HTTP status failure while retrieving content.
    #[error("Retrieval of {url} failed: {message}")]
    Retrieval { url: String, message: String },

    /// The CI server answered but had nothing matching the request.
    #[error("Artifact '{artifact}' of job '{job}' not found: {reason}")]
    ArtifactNotFound {
        job: String,
        artifact: String,
        reason: String,
    },

    /// Downloaded content does not match the declared digest.
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// An essential filesystem operation failed.
    #[error("Filesystem operation on {path} failed: {message}")]
    Filesystem { path: PathBuf, message: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConductorError {
    /// Shorthand for a [`ConductorError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap an IO failure on a specific path.
    pub fn filesystem(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retrieval { .. })
    }
}

/// Result type alias for Conductor operations.
pub type Result<T> = std::result::Result<T, ConductorError>;
