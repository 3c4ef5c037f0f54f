//! Lifecycle orchestration.

pub mod lifecycle;

pub use lifecycle::{LifecycleProgress, LifecycleRunner, Phase, RunSummary};
