//! CLI argument definitions.
//!
//! This module defines all CLI arguments using clap's derive macros.
//! The main entry point is the [`Cli`] struct.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Settings;

/// Conductor - materialize a directory tree from a descriptor.
#[derive(Debug, Parser)]
#[command(name = "conductor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory to materialize into (defaults to the current directory)
    #[arg(short, long, global = true, env = "CONDUCTOR_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Staging directory (defaults to <work-dir>/.conductor-staging)
    #[arg(long, global = true, env = "CONDUCTOR_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Deadline for a single retrieval, in seconds
    #[arg(long, global = true, env = "CONDUCTOR_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fail on include merge conflicts instead of skipping them
    #[arg(long, global = true, env = "CONDUCTOR_STRICT")]
    pub strict: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Settings derived from the global flags.
    pub fn settings(&self) -> Settings {
        let work_dir = self
            .work_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        let mut settings = Settings::new(work_dir).with_strict_merge(self.strict);
        if let Some(staging_dir) = &self.staging_dir {
            settings = settings.with_staging_dir(staging_dir);
        }
        if let Some(secs) = self.timeout {
            settings = settings.with_timeout(Duration::from_secs(secs));
        }
        settings
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Materialize a descriptor into the working directory
    Apply(DescriptorArgs),

    /// Validate a descriptor and list the planned paths
    Check(DescriptorArgs),

    /// Print the merged descriptor
    Show(DescriptorArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for commands that read a descriptor.
#[derive(Debug, Clone, clap::Args)]
pub struct DescriptorArgs {
    /// Descriptor location: an http(s) URL or a local path
    pub descriptor: String,
}

/// Arguments for the `completions` command.
#[derive(Debug, Clone, clap::Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
