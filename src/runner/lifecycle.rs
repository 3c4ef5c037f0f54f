//! Drives the four node phases over a forest.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::download::remove_path;
use crate::error::{ConductorError, Result};
use crate::node::{Node, NodeKind};
use crate::template::Template;

/// One lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Prepare,
    Delete,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parse => "parse",
            Phase::Prepare => "prepare",
            Phase::Delete => "delete",
            Phase::Apply => "apply",
        };
        f.write_str(name)
    }
}

/// Progress events emitted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleProgress {
    /// A phase is starting over `nodes` root nodes.
    PhaseStarted { phase: Phase, nodes: usize },
    /// A phase completed over the whole forest.
    PhaseFinished { phase: Phase },
}

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// File nodes placed
    pub files: usize,
    /// Folder nodes placed
    pub folders: usize,
    /// Plugins attached across the tree
    pub plugins: usize,
    /// Wall time of the run
    pub duration: Duration,
}

impl RunSummary {
    fn count(nodes: &[Node]) -> Self {
        let mut summary = Self::default();
        for root in nodes {
            root.walk(&mut |node| {
                match node.kind() {
                    NodeKind::File => summary.files += 1,
                    NodeKind::Folder => summary.folders += 1,
                }
                summary.plugins += node.plugins().len();
            });
        }
        summary
    }
}

/// Runs parse, prepare, delete and apply over the template's nodes.
///
/// Each phase completes across every root node before the next one
/// starts, so a failure during `prepare` leaves the destination untouched.
pub struct LifecycleRunner<'a> {
    template: &'a Template,
}

impl<'a> LifecycleRunner<'a> {
    pub fn new(template: &'a Template) -> Self {
        Self { template }
    }

    /// Build the model and run every phase.
    pub fn run(&self) -> Result<RunSummary> {
        self.run_with_progress(|_| {})
    }

    /// Build the model and run every phase with a progress callback.
    pub fn run_with_progress(
        &self,
        mut on_progress: impl FnMut(LifecycleProgress),
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let mut nodes = self.template.build_filesystem_model()?;
        let roots = nodes.len();
        let mut emit = |phase, finished| {
            on_progress(if finished {
                LifecycleProgress::PhaseFinished { phase }
            } else {
                LifecycleProgress::PhaseStarted {
                    phase,
                    nodes: roots,
                }
            })
        };

        emit(Phase::Parse, false);
        self.parse_all(&mut nodes)?;
        emit(Phase::Parse, true);

        emit(Phase::Prepare, false);
        self.prepare_all(&nodes)?;
        emit(Phase::Prepare, true);

        emit(Phase::Delete, false);
        self.delete_all(&nodes);
        emit(Phase::Delete, true);

        emit(Phase::Apply, false);
        self.apply_all(&nodes)?;
        emit(Phase::Apply, true);

        self.clean_staging();

        let summary = RunSummary {
            duration: start.elapsed(),
            ..RunSummary::count(&nodes)
        };
        info!(
            "Materialized {} files and {} folders in {:.2?}",
            summary.files, summary.folders, summary.duration
        );
        Ok(summary)
    }

    /// Build children and attach plugins everywhere. Touches no files.
    pub fn parse_all(&self, nodes: &mut [Node]) -> Result<()> {
        debug!("Phase {} over {} root nodes", Phase::Parse, nodes.len());
        for node in nodes.iter_mut() {
            node.parse(self.template)?;
        }
        Ok(())
    }

    /// Stage every node. On failure the staging area is discarded.
    pub fn prepare_all(&self, nodes: &[Node]) -> Result<()> {
        debug!("Phase {} over {} root nodes", Phase::Prepare, nodes.len());
        self.reset_staging()?;
        for node in nodes {
            if let Err(e) = node.prepare(self.template) {
                warn!(
                    "Preparing {} failed; leaving {} untouched",
                    node.relative_path().display(),
                    self.template.work_dir().display()
                );
                self.clean_staging();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove current destinations. Failures only warn.
    pub fn delete_all(&self, nodes: &[Node]) {
        debug!("Phase {} over {} root nodes", Phase::Delete, nodes.len());
        for node in nodes {
            node.delete(self.template);
        }
    }

    /// Move staged content into place.
    pub fn apply_all(&self, nodes: &[Node]) -> Result<()> {
        debug!("Phase {} over {} root nodes", Phase::Apply, nodes.len());
        let work_dir = self.template.work_dir();
        fs::create_dir_all(work_dir).map_err(|e| ConductorError::filesystem(work_dir, e))?;
        for node in nodes {
            node.apply(self.template)?;
        }
        Ok(())
    }

    fn reset_staging(&self) -> Result<()> {
        let staging = self.template.staging_dir();
        for dir in [&staging, &self.template.download_dir()] {
            remove_if_present(dir).map_err(|e| ConductorError::filesystem(dir, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| ConductorError::filesystem(&staging, e))?;
        Ok(())
    }

    fn clean_staging(&self) {
        for dir in [self.template.staging_dir(), self.template.download_dir()] {
            if let Err(e) = remove_if_present(&dir) {
                warn!("Could not clean staging directory {}: {}", dir.display(), e);
            }
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match remove_path(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
