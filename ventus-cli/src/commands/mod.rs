//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod mesh;
mod simulation;

pub use job::JobCommands;
pub use mesh::MeshCommands;
pub use simulation::SimulationCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Mesh generation jobs
    Mesh {
        #[command(subcommand)]
        command: MeshCommands,
    },
    /// Wind simulation jobs
    Simulation {
        #[command(subcommand)]
        command: SimulationCommands,
    },
    /// Job inspection and control
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Mesh { command } => mesh::handle_mesh_command(command, config).await,
        Commands::Simulation { command } => {
            simulation::handle_simulation_command(command, config).await
        }
        Commands::Job { command } => job::handle_job_command(command, config).await,
    }
}
