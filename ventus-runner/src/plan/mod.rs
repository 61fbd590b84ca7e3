//! Job plans
//!
//! A plan is everything kind-specific about running a job: which inputs go
//! into the workspace, which external tools run in which order with which
//! slice of the progress scale, and how results are finalized. The runner
//! drives any plan through the same state machine.

pub mod mesh;
pub mod simulation;

use std::sync::Arc;
use std::time::Duration;
use ventus_core::domain::job::{JobKind, JobRecord};
use ventus_core::domain::params::{MeshParams, SimulationParams};

use crate::config::{RunnerConfig, ToolCommands};
use crate::finalizer::ResultFinalizer;
use crate::monitor::{ProgressBand, ProgressEstimator};
use crate::supervisor::ExternalCommand;
use crate::workspace::{CaseWriter, SetupError, Workspace};

pub use mesh::MeshPlan;
pub use simulation::SimulationPlan;

/// One external tool run while the job is `running`
pub struct ProcessStep {
    /// Tool name; the output goes to `log.<name>`
    pub name: &'static str,
    pub command: ExternalCommand,
    pub progress: ProgressBand,
    pub estimator: Option<Arc<dyn ProgressEstimator>>,
    /// Error recorded on the job when the tool exits non-zero
    pub failure_message: &'static str,
}

impl ProcessStep {
    pub fn new(
        name: &'static str,
        command: ExternalCommand,
        progress: ProgressBand,
        failure_message: &'static str,
    ) -> Self {
        Self {
            name,
            command,
            progress,
            estimator: None,
            failure_message,
        }
    }

    pub fn with_estimator(mut self, estimator: impl ProgressEstimator + 'static) -> Self {
        self.estimator = Some(Arc::new(estimator));
        self
    }
}

impl std::fmt::Debug for ProcessStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStep")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("progress", &self.progress)
            .field("estimated", &self.estimator.is_some())
            .finish()
    }
}

/// Kind-specific half of a job
pub trait JobPlan: CaseWriter + ResultFinalizer {
    fn kind(&self) -> JobKind;

    /// Tools to run, in order
    fn steps(&self, workspace: &Workspace, tools: &ToolCommands) -> Vec<ProcessStep>;

    /// Ceiling on the tool runs, counted from the first step's launch
    fn time_limit(&self) -> Option<Duration> {
        None
    }

    /// Error recorded when `time_limit` is exceeded
    fn timeout_message(&self, limit: Duration) -> String {
        format!("{} timed out after {}", self.kind(), format_limit(limit))
    }
}

/// `3600s` for whole seconds, `0.5s` otherwise
pub fn format_limit(limit: Duration) -> String {
    if limit.subsec_nanos() == 0 {
        format!("{}s", limit.as_secs())
    } else {
        format!("{:.1}s", limit.as_secs_f64())
    }
}

/// Builds the plan for a job from its config
pub fn plan_for(job: &JobRecord, config: &RunnerConfig) -> Result<Arc<dyn JobPlan>, SetupError> {
    match job.kind {
        JobKind::Simulation => {
            let params = SimulationParams::from_config(&job.config)?;
            let mesh_result = config.result_path(params.mesh_id);
            Ok(Arc::new(SimulationPlan::new(params, mesh_result)))
        }
        JobKind::Mesh => {
            let params = MeshParams::from_config(&job.config)?;
            let geometry = config.geometry_path(&params.geometry_file);
            Ok(Arc::new(MeshPlan::new(
                params,
                geometry,
                config.mesh_progress_budget,
                config.mesh_timeout,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record(kind: JobKind, config: serde_json::Value) -> JobRecord {
        let id = Uuid::new_v4();
        JobRecord::new(
            id,
            kind,
            serde_json::from_value(config).unwrap(),
            format!("/data/workspaces/{id}").into(),
            format!("/data/results/{id}").into(),
        )
    }

    #[test]
    fn test_format_limit() {
        assert_eq!(format_limit(Duration::from_secs(3600)), "3600s");
        assert_eq!(format_limit(Duration::from_millis(500)), "0.5s");
        assert_eq!(format_limit(Duration::from_millis(1500)), "1.5s");
    }

    #[test]
    fn test_plan_matches_kind() {
        let config = RunnerConfig::new("/data");

        let mesh = plan_for(&record(JobKind::Mesh, json!({ "geometry_file": "box.stl" })), &config)
            .unwrap();
        assert_eq!(mesh.kind(), JobKind::Mesh);
        assert_eq!(mesh.time_limit(), Some(config.mesh_timeout));

        let sim = plan_for(
            &record(
                JobKind::Simulation,
                json!({ "wind_speed": 8, "mesh_id": Uuid::new_v4().to_string() }),
            ),
            &config,
        )
        .unwrap();
        assert_eq!(sim.kind(), JobKind::Simulation);
        assert_eq!(sim.time_limit(), None);
    }

    #[test]
    fn test_bad_config_is_setup_error() {
        let config = RunnerConfig::new("/data");
        let err = plan_for(&record(JobKind::Mesh, json!({})), &config).err().unwrap();
        assert!(matches!(err, SetupError::InvalidParameters(_)));
    }
}
