//! Conductor - materialize a directory tree from a declarative descriptor.
//!
//! A descriptor names files and folders, each filled from inline text or
//! from a remote source (an HTTP URL or a Jenkins build artifact). Shared
//! fragments are pulled in as includes and merged into the root tree.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Run settings
//! - [`download`] - URL and CI-artifact downloaders
//! - [`error`] - Error types and result aliases
//! - [`node`] - File and folder nodes and their lifecycle phases
//! - [`plugins`] - Content-acquisition plugins, factories and secrets
//! - [`runner`] - Phase orchestration over a node forest
//! - [`template`] - Descriptor loading, include merging and variables
//!
//! # Example
//!
//! ```no_run
//! use conductor::config::Settings;
//! use conductor::runner::LifecycleRunner;
//! use conductor::template::TemplateLoader;
//!
//! let template = TemplateLoader::new(Settings::new("/srv/app"))
//!     .load("https://config.example.com/app-server.json")
//!     .unwrap();
//! let summary = LifecycleRunner::new(&template).run().unwrap();
//! println!("{} files placed", summary.files);
//! ```

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod node;
pub mod plugins;
pub mod runner;
pub mod template;

pub use error::{ConductorError, Result};
