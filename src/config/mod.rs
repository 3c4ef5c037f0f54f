//! Run settings for Conductor.
//!
//! [`Settings`] carries everything the engine needs that does not come from
//! a descriptor: where to materialize, where to stage, how long a single
//! retrieval may take and whether merge conflicts are fatal.
//!
//! # Example
//!
//! ```
//! use conductor::config::Settings;
//! use std::path::Path;
//!
//! let settings = Settings::new("/srv/app").with_strict_merge(true);
//! assert_eq!(settings.staging_dir(), Path::new("/srv/app/.conductor-staging"));
//! assert!(settings.strict_merge);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the staging directory created beneath the working directory.
pub const DEFAULT_STAGING_DIR: &str = ".conductor-staging";

const DOWNLOAD_DIR_SUFFIX: &str = ".downloads";

/// Settings that apply to one run of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root under which every descriptor path is materialized
    pub work_dir: PathBuf,

    /// Scratch area for `prepare`; defaults to `<work_dir>/.conductor-staging`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,

    /// Deadline for a single retrieval, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Turn skipped merge conflicts into errors
    pub strict_merge: bool,

    /// Maximum nesting of includes
    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            staging_dir: None,
            timeout_secs: default_timeout_secs(),
            strict_merge: false,
            max_include_depth: default_max_include_depth(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_include_depth() -> usize {
    16
}

fn default_user_agent() -> String {
    format!("conductor/{}", env!("CARGO_PKG_VERSION"))
}

impl Settings {
    /// Settings rooted at the given working directory.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    /// Use an explicit staging directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Set the per-retrieval deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Enable or disable strict merging.
    pub fn with_strict_merge(mut self, strict: bool) -> Self {
        self.strict_merge = strict;
        self
    }

    /// The effective staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join(DEFAULT_STAGING_DIR))
    }

    /// Where archives wait before unpacking: `<staging_dir>.downloads`,
    /// outside the staged tree.
    pub fn download_dir(&self) -> PathBuf {
        let mut dir = self.staging_dir().into_os_string();
        dir.push(DOWNLOAD_DIR_SUFFIX);
        PathBuf::from(dir)
    }

    /// The working directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// The per-retrieval deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_staging_dir_lives_under_work_dir() {
        let settings = Settings::new("/opt/server");
        assert_eq!(
            settings.staging_dir(),
            PathBuf::from("/opt/server").join(DEFAULT_STAGING_DIR)
        );
    }

    #[test]
    fn explicit_staging_dir_wins() {
        let settings = Settings::new("/opt/server").with_staging_dir("/tmp/stage");
        assert_eq!(settings.staging_dir(), PathBuf::from("/tmp/stage"));
        assert_eq!(settings.download_dir(), PathBuf::from("/tmp/stage.downloads"));
    }

    #[test]
    fn timeout_defaults_to_five_minutes() {
        assert_eq!(Settings::default().timeout(), Duration::from_secs(300));
    }

    #[test]
    fn timeout_never_drops_to_zero() {
        let settings = Settings::default().with_timeout(Duration::from_millis(10));
        assert_eq!(settings.timeout_secs, 1);
    }

    #[test]
    fn deserializes_with_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"work_dir": "/srv"}"#).unwrap();
        assert_eq!(settings.work_dir, PathBuf::from("/srv"));
        assert!(!settings.strict_merge);
        assert_eq!(settings.max_include_depth, 16);
        assert!(settings.user_agent.starts_with("conductor/"));
    }
}
