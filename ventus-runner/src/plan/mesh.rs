//! Mesh generation plan: background mesh, feature edges, snapping

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use ventus_core::domain::job::JobKind;
use ventus_core::domain::params::MeshParams;

use crate::config::{Tool, ToolCommands};
use crate::finalizer::{
    FinalizationError, FinalizeContext, JobSummary, MeshFinalizer, ResultFinalizer,
};
use crate::monitor::{ProgressBand, WallClockEstimator};
use crate::plan::{JobPlan, ProcessStep, format_limit};
use crate::supervisor::ExternalCommand;
use crate::workspace::{self, CaseWriter, SetupError, Workspace};

#[derive(Debug, Clone)]
pub struct MeshPlan {
    params: MeshParams,
    geometry: PathBuf,
    progress_budget: Duration,
    time_limit: Duration,
}

impl MeshPlan {
    pub fn new(
        params: MeshParams,
        geometry: PathBuf,
        progress_budget: Duration,
        time_limit: Duration,
    ) -> Self {
        Self {
            params,
            geometry,
            progress_budget,
            time_limit,
        }
    }
}

impl CaseWriter for MeshPlan {
    fn write_inputs(&self, workspace: &Workspace) -> Result<(), SetupError> {
        // Checked at submission too, but the file may have gone since
        if !self.geometry.is_file() {
            return Err(SetupError::InputNotFound(
                "Geometry file not found".to_string(),
            ));
        }
        workspace::mesh::write_case(workspace, &self.params, &self.geometry).map(|_| ())
    }
}

#[async_trait]
impl ResultFinalizer for MeshPlan {
    async fn finalize(&self, ctx: &FinalizeContext<'_>) -> Result<JobSummary, FinalizationError> {
        MeshFinalizer.finalize(ctx).await
    }
}

impl JobPlan for MeshPlan {
    fn kind(&self) -> JobKind {
        JobKind::Mesh
    }

    fn steps(&self, _workspace: &Workspace, tools: &ToolCommands) -> Vec<ProcessStep> {
        vec![
            ProcessStep::new(
                "blockMesh",
                ExternalCommand::new(tools.program(Tool::BlockMesh)),
                ProgressBand::fixed(30),
                "blockMesh failed",
            ),
            ProcessStep::new(
                "surfaceFeatureExtract",
                ExternalCommand::new(tools.program(Tool::SurfaceFeatureExtract)),
                ProgressBand::fixed(40),
                "surfaceFeatureExtract failed",
            ),
            ProcessStep::new(
                "snappyHexMesh",
                ExternalCommand::new(tools.program(Tool::SnappyHexMesh)).arg("-overwrite"),
                ProgressBand::new(50, 85),
                "snappyHexMesh failed",
            )
            .with_estimator(WallClockEstimator::new(self.progress_budget)),
        ]
    }

    fn time_limit(&self) -> Option<Duration> {
        Some(self.time_limit)
    }

    fn timeout_message(&self, limit: Duration) -> String {
        format!("Mesh generation timed out after {}", format_limit(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(geometry: PathBuf) -> MeshPlan {
        MeshPlan::new(
            MeshParams {
                geometry_file: "box.stl".to_string(),
                refinement_level: 3,
                cell_size: 1.0,
                domain_factor: 5.0,
            },
            geometry,
            Duration::from_secs(70),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_steps_and_timeout_message() {
        let plan = plan(PathBuf::from("/data/geometries/box.stl"));
        let workspace = Workspace::new("/data/workspaces/m", "/data/results/m");

        let steps = plan.steps(&workspace, &ToolCommands::default());
        let commands: Vec<String> = steps.iter().map(|s| s.command.to_string()).collect();
        assert_eq!(
            commands,
            ["blockMesh", "surfaceFeatureExtract", "snappyHexMesh -overwrite"]
        );
        assert_eq!(steps[2].progress, ProgressBand::new(50, 85));

        assert_eq!(
            plan.timeout_message(Duration::from_secs(3600)),
            "Mesh generation timed out after 3600s"
        );
        assert_eq!(
            plan.timeout_message(Duration::from_millis(500)),
            "Mesh generation timed out after 0.5s"
        );
    }

    #[test]
    fn test_missing_geometry_at_setup() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path().join("gone.stl"));
        let workspace = Workspace::new(dir.path().join("ws"), dir.path().join("result"));

        let err = plan.write_inputs(&workspace).unwrap_err();
        assert_eq!(err.to_string(), "Geometry file not found");
    }
}
