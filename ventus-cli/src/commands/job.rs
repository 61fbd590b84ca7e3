//! Job command handlers
//!
//! Handles the kind-agnostic job commands: listing, details, cancellation,
//! result downloads, log tails and waiting for completion.

use anyhow::{Result, bail};
use clap::{Subcommand, ValueEnum};
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;
use ventus_client::OrchestratorClient;
use ventus_core::domain::job::{JobKind, JobStatus};
use ventus_core::dto::job::{JobAccepted, JobSnapshot};

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Interval between status polls while waiting
const DEFAULT_POLL_SECS: u64 = 2;

/// Job kind filter
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Simulation,
    Mesh,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Simulation => JobKind::Simulation,
            KindArg::Mesh => JobKind::Mesh,
        }
    }
}

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs
    List {
        /// Only jobs of this kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Cancel a queued or running job
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Download the results of a completed job
    Download {
        /// Job ID or unambiguous prefix
        id: String,

        /// Output file (defaults to <kind>_<id>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the tail of the job's latest tool log
    Log {
        /// Job ID or unambiguous prefix
        id: String,

        /// Number of lines
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },
    /// Wait until a job finishes
    Wait {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::List { kind } => list_jobs(&client, kind.map(JobKind::from)).await,
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Cancel { id } => cancel_job(&client, &id).await,
        JobCommands::Download { id, output } => download_results(&client, &id, output).await,
        JobCommands::Log { id, lines } => show_log(&client, &id, lines).await,
        JobCommands::Wait { id } => {
            let uuid = resolve_job_id(&client, &IdOrPrefix::parse(&id), None).await?;
            wait_and_report(&client, uuid).await
        }
    }
}

/// List jobs
async fn list_jobs(client: &OrchestratorClient, kind: Option<JobKind>) -> Result<()> {
    let jobs = client.list_jobs(kind).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id), None).await?;

    let job = client.get_job(uuid).await?;

    print_job_details(&job);

    Ok(())
}

/// Request cancellation of a job
async fn cancel_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id), None).await?;

    let response = client.cancel_job(uuid).await?;

    println!(
        "{} Cancellation requested for job {} (was {})",
        "✓".green(),
        response.job_id.to_string().cyan(),
        colorize_status(&response.status)
    );

    Ok(())
}

/// Download the results archive of a completed job
async fn download_results(
    client: &OrchestratorClient,
    id: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id), None).await?;

    let output = match output {
        Some(path) => path,
        None => {
            let job = client.get_job(uuid).await?;
            PathBuf::from(format!("{}_{}.zip", job.record.kind, uuid))
        }
    };

    let bytes = client.download_results(uuid, &output).await?;

    println!(
        "{} Saved {} ({} bytes)",
        "✓".green(),
        output.display().to_string().cyan(),
        bytes
    );

    Ok(())
}

/// Print the tail of the job's latest tool log
async fn show_log(client: &OrchestratorClient, id: &str, lines: Option<usize>) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id), None).await?;

    let text = client.job_log(uuid, lines).await?;

    println!("{}", format!("Log for job {}:", uuid).bold());
    println!("{}", "─".repeat(80).dimmed());
    print!("{}", text);
    println!("{}", "─".repeat(80).dimmed());

    Ok(())
}

/// Poll a job until it finishes, printing status and progress changes
///
/// Fails when the job ends in any state other than `completed`.
pub async fn wait_and_report(client: &OrchestratorClient, job_id: Uuid) -> Result<()> {
    let mut last: Option<(JobStatus, u8)> = None;

    let job = client
        .wait_for_job(job_id, Duration::from_secs(DEFAULT_POLL_SECS), |job| {
            let current = (job.record.status, job.record.progress);
            if last != Some(current) {
                println!(
                    "  {} {} {}",
                    progress_bar(job.record.progress).dimmed(),
                    format!("{:>3}%", job.record.progress),
                    colorize_status(&job.record.status)
                );
                last = Some(current);
            }
        })
        .await?;

    println!();
    print_job_details(&job);

    if job.record.status != JobStatus::Completed {
        bail!("Job {} ended {}", job_id, job.record.status);
    }
    Ok(())
}

/// Print the response to an accepted submission
pub fn print_accepted(accepted: &JobAccepted) {
    println!(
        "{} Job {} {}",
        "✓".green(),
        accepted.job_id.to_string().cyan(),
        colorize_status(&accepted.status)
    );
}

/// Print a one-job summary
fn print_job_summary(job: &JobSnapshot) {
    let record = &job.record;

    println!(
        "  {} {} {}",
        "▸".cyan(),
        record.kind.to_string().bold(),
        record.id.to_string().dimmed()
    );
    println!(
        "    Status:   {} ({}%)",
        colorize_status(&record.status),
        record.progress
    );
    println!(
        "    Created:  {}",
        record
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(error) = &record.error {
        println!("    Error:    {}", error.red());
    }
    println!();
}

/// Print detailed job information
fn print_job_details(job: &JobSnapshot) {
    let record = &job.record;

    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", record.id.to_string().cyan());
    println!("  Kind:      {}", record.kind);
    println!("  Status:    {}", colorize_status(&record.status));
    println!("  Progress:  {}%", record.progress);
    println!(
        "  Created:   {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = record.start_time {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ended) = record.end_time {
        println!("  Ended:     {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(duration) = job.duration {
        println!("  Duration:  {:.1}s", duration);
    }
    if record.cancel_requested && !record.is_terminal() {
        println!("  {}", "Cancellation requested".yellow());
    }

    if !record.config.is_empty() {
        println!("\n{}", "Parameters:".bold());
        let mut keys: Vec<_> = record.config.keys().collect();
        keys.sort();
        for key in keys {
            println!("  {} = {}", key.cyan(), record.config[key]);
        }
    }

    if let Some(stats) = &record.mesh_stats {
        println!("\n{}", "Mesh:".bold());
        println!("  Cells:     {}", stats.cells);
        println!("  Points:    {}", stats.points);
        println!("  Faces:     {}", stats.faces);
    }

    if let Some(coeffs) = &record.force_coefficients {
        println!("\n{}", "Force coefficients:".bold());
        println!("  Time:      {}", coeffs.final_time);
        println!("  Cd:        {:.4}", coeffs.cd);
        println!("  Cl:        {:.4}", coeffs.cl);
        println!("  Cm:        {:.4}", coeffs.cm);
    }

    if let Some(fields) = &record.field_statistics {
        println!("\n{}", format!("Fields at t = {}:", fields.time).bold());
        println!("  {:<10}{:>12}{:>12}{:>12}{:>12}", "", "min", "max", "mean", "std");
        for (name, summary) in [("|U|", &fields.velocity_magnitude), ("p", &fields.pressure)] {
            if let Some(s) = summary {
                println!(
                    "  {:<10}{:>12.4}{:>12.4}{:>12.4}{:>12.4}",
                    name, s.min, s.max, s.mean, s.std
                );
            }
        }
    }

    if let Some(error) = &record.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

/// Text progress bar, 20 cells wide
fn progress_bar(progress: u8) -> String {
    let filled = usize::from(progress.min(100)) / 5;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(20 - filled))
}

/// Colorize job status for display
fn colorize_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Queued => status_str.yellow(),
        JobStatus::SettingUp | JobStatus::Running | JobStatus::PostProcessing => status_str.cyan(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0), format!("[{}]", "-".repeat(20)));
        assert_eq!(progress_bar(50), format!("[{}{}]", "#".repeat(10), "-".repeat(10)));
        assert_eq!(progress_bar(100), format!("[{}]", "#".repeat(20)));
    }

    #[test]
    fn test_kind_arg() {
        assert_eq!(JobKind::from(KindArg::Mesh), JobKind::Mesh);
        assert_eq!(JobKind::from(KindArg::Simulation), JobKind::Simulation);
    }
}
