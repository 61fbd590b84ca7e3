//! Mesh command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use ventus_core::dto::job::CreateJob;

use crate::commands::job::{print_accepted, wait_and_report};
use crate::config::Config;

/// Mesh subcommands
#[derive(Subcommand)]
pub enum MeshCommands {
    /// Submit a mesh generation job
    Submit {
        /// Geometry file name inside the orchestrator's geometry directory
        geometry_file: String,

        /// Surface refinement level (0-10)
        #[arg(long)]
        refinement_level: Option<u32>,

        /// Background cell size
        #[arg(long)]
        cell_size: Option<f64>,

        /// Domain size as a multiple of the geometry extent
        #[arg(long)]
        domain_factor: Option<f64>,

        /// Wait for the job to finish
        #[arg(short, long)]
        wait: bool,
    },
}

/// Handle mesh commands
pub async fn handle_mesh_command(command: MeshCommands, config: &Config) -> Result<()> {
    match command {
        MeshCommands::Submit {
            geometry_file,
            refinement_level,
            cell_size,
            domain_factor,
            wait,
        } => {
            let mut req = CreateJob::default();
            req.parameters
                .insert("geometry_file".to_string(), geometry_file.clone().into());
            if let Some(level) = refinement_level {
                req.parameters
                    .insert("refinement_level".to_string(), level.into());
            }
            if let Some(size) = cell_size {
                req.parameters.insert("cell_size".to_string(), size.into());
            }
            if let Some(factor) = domain_factor {
                req.parameters
                    .insert("domain_factor".to_string(), factor.into());
            }

            println!(
                "{}",
                format!("Submitting mesh job for {}...", geometry_file).cyan()
            );

            let client = config.client();
            let accepted = client.create_mesh(req).await?;
            print_accepted(&accepted);

            if wait {
                wait_and_report(&client, accepted.job_id).await?;
            }

            Ok(())
        }
    }
}
