//! Result finalization
//!
//! After the last tool exits successfully the finalizer locates the newest
//! output of the run, copies the artifacts worth keeping into the job's
//! result directory and extracts summary statistics for the job record.

pub mod fields;
pub mod mesh;
pub mod simulation;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use ventus_core::domain::summary::{FieldStatistics, ForceCoefficients, MeshStats};

use crate::config::ToolCommands;
use crate::supervisor::{ExecutionError, ExitOutcome, ExternalCommand, ProcessSupervisor};
use crate::workspace::Workspace;

pub use mesh::MeshFinalizer;
pub use simulation::SimulationFinalizer;

/// Finalization failures
#[derive(Debug, thiserror::Error)]
pub enum FinalizationError {
    #[error("no output produced")]
    NoOutput,

    #[error("Mesh statistics unavailable")]
    StatsUnavailable,

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("cancelled during post-processing")]
    Cancelled,

    #[error("post-processing exceeded the time limit")]
    TimedOut,
}

impl FinalizationError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| FinalizationError::Io { context, source }
    }
}

/// Summary statistics attached to the job record on completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSummary {
    pub mesh_stats: Option<MeshStats>,
    pub force_coefficients: Option<ForceCoefficients>,
    pub field_statistics: Option<FieldStatistics>,
}

/// Everything a finalizer may touch
pub struct FinalizeContext<'a> {
    pub workspace: &'a Workspace,
    pub supervisor: &'a ProcessSupervisor,
    pub tools: &'a ToolCommands,
    pub cancel: &'a CancellationToken,
    pub deadline: Option<Instant>,
}

impl FinalizeContext<'_> {
    /// Runs a post-processing utility inside the workspace
    pub async fn run_tool(
        &self,
        command: &ExternalCommand,
        log_name: &str,
    ) -> Result<ExitOutcome, FinalizationError> {
        let outcome = self
            .supervisor
            .run(
                command,
                self.workspace.root(),
                &self.workspace.log_path(log_name),
                self.deadline,
                self.cancel,
                |_| async {},
            )
            .await?;

        match outcome {
            ExitOutcome::Cancelled => Err(FinalizationError::Cancelled),
            ExitOutcome::TimedOut => Err(FinalizationError::TimedOut),
            other => Ok(other),
        }
    }
}

/// Kind-specific collection of output artifacts
#[async_trait]
pub trait ResultFinalizer: Send + Sync {
    async fn finalize(&self, ctx: &FinalizeContext<'_>) -> Result<JobSummary, FinalizationError>;
}

/// Highest-numbered time directory greater than zero, with its name
///
/// Names are returned as written (`1000`, `0.5`) since the tools do not
/// normalise them.
pub fn latest_time_dir(root: &Path) -> Option<(String, PathBuf)> {
    let entries = std::fs::read_dir(root).ok()?;

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let time = name.parse::<f64>().ok().filter(|t| t.is_finite() && *t > 0.0)?;
            Some((time, name, entry.path()))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, name, path)| (name, path))
}

pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<(), FinalizationError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .map_err(FinalizationError::io(format!("Failed to create {}", parent.display())))?;
    }
    std::fs::copy(src, dst)
        .map(|_| ())
        .map_err(FinalizationError::io(format!("Failed to copy {}", src.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_time_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0", "100", "1000", "250.5", "constant", "system"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("5000"), "a file, not a time").unwrap();

        let (name, path) = latest_time_dir(dir.path()).unwrap();
        assert_eq!(name, "1000");
        assert_eq!(path, dir.path().join("1000"));
    }

    #[test]
    fn test_only_initial_time_means_no_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("0")).unwrap();
        assert!(latest_time_dir(dir.path()).is_none());
        assert!(latest_time_dir(&dir.path().join("missing")).is_none());
    }

    #[test]
    fn test_copy_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("U");
        std::fs::write(&src, "field").unwrap();

        let dst = dir.path().join("result/1000/U");
        copy_file(&src, &dst).unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "field");
    }
}
