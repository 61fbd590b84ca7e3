//! Simulation command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use ventus_core::domain::job::JobKind;
use ventus_core::dto::job::CreateJob;

use crate::commands::job::{print_accepted, wait_and_report};
use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Simulation subcommands
#[derive(Subcommand)]
pub enum SimulationCommands {
    /// Submit a wind simulation job
    Submit {
        /// Mesh job ID or unambiguous prefix
        #[arg(long)]
        mesh: String,

        /// Inflow wind speed (m/s)
        #[arg(long)]
        wind_speed: f64,

        /// Solver end time
        #[arg(long)]
        simulation_time: Option<f64>,

        /// Turbulence model (kEpsilon, kOmegaSST, realizableKE, RNGkEpsilon)
        #[arg(long)]
        turbulence_model: Option<String>,

        /// Wind direction in degrees
        #[arg(long)]
        wind_direction: Option<f64>,

        /// Wait for the job to finish
        #[arg(short, long)]
        wait: bool,
    },
}

/// Handle simulation commands
pub async fn handle_simulation_command(command: SimulationCommands, config: &Config) -> Result<()> {
    match command {
        SimulationCommands::Submit {
            mesh,
            wind_speed,
            simulation_time,
            turbulence_model,
            wind_direction,
            wait,
        } => {
            let client = config.client();
            let mesh_id =
                resolve_job_id(&client, &IdOrPrefix::parse(&mesh), Some(JobKind::Mesh)).await?;

            let mut req = CreateJob::default();
            req.parameters
                .insert("mesh_id".to_string(), mesh_id.to_string().into());
            req.parameters
                .insert("wind_speed".to_string(), wind_speed.into());
            if let Some(time) = simulation_time {
                req.parameters
                    .insert("simulation_time".to_string(), time.into());
            }
            if let Some(model) = turbulence_model {
                req.parameters
                    .insert("turbulence_model".to_string(), model.into());
            }
            if let Some(direction) = wind_direction {
                req.parameters
                    .insert("wind_direction".to_string(), direction.into());
            }

            println!(
                "{}",
                format!("Submitting simulation on mesh {}...", mesh_id).cyan()
            );

            let accepted = client.create_simulation(req).await?;
            print_accepted(&accepted);

            if wait {
                wait_and_report(&client, accepted.job_id).await?;
            }

            Ok(())
        }
    }
}
