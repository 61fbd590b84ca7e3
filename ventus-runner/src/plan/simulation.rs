//! Wind simulation plan: mesh check, then the steady-state solver

use async_trait::async_trait;
use std::path::PathBuf;
use ventus_core::domain::job::JobKind;
use ventus_core::domain::params::SimulationParams;

use crate::config::{Tool, ToolCommands};
use crate::finalizer::{
    FinalizationError, FinalizeContext, JobSummary, ResultFinalizer, SimulationFinalizer,
};
use crate::monitor::{ProgressBand, SolverTimeEstimator};
use crate::plan::{JobPlan, ProcessStep};
use crate::supervisor::ExternalCommand;
use crate::workspace::{self, CaseWriter, SetupError, Workspace};

#[derive(Debug, Clone)]
pub struct SimulationPlan {
    params: SimulationParams,
    /// Result directory of the referenced mesh job
    mesh_result: PathBuf,
}

impl SimulationPlan {
    pub fn new(params: SimulationParams, mesh_result: PathBuf) -> Self {
        Self {
            params,
            mesh_result,
        }
    }
}

impl CaseWriter for SimulationPlan {
    fn write_inputs(&self, workspace: &Workspace) -> Result<(), SetupError> {
        workspace::simulation::write_case(workspace, &self.params, &self.mesh_result)
    }
}

#[async_trait]
impl ResultFinalizer for SimulationPlan {
    async fn finalize(&self, ctx: &FinalizeContext<'_>) -> Result<JobSummary, FinalizationError> {
        SimulationFinalizer.finalize(ctx).await
    }
}

impl JobPlan for SimulationPlan {
    fn kind(&self) -> JobKind {
        JobKind::Simulation
    }

    fn steps(&self, _workspace: &Workspace, tools: &ToolCommands) -> Vec<ProcessStep> {
        vec![
            ProcessStep::new(
                "checkMesh",
                ExternalCommand::new(tools.program(Tool::CheckMesh)),
                ProgressBand::fixed(45),
                "Mesh check failed",
            ),
            ProcessStep::new(
                "simpleFoam",
                ExternalCommand::new(tools.program(Tool::Solver)),
                ProgressBand::new(50, 90),
                "Simulation failed",
            )
            .with_estimator(SolverTimeEstimator::new(self.params.simulation_time)),
        ]
    }
}
