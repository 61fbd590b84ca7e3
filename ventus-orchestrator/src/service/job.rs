//! Job Service
//!
//! Business logic for job submission, inspection and cancellation. Handlers
//! never wait on job execution: submission registers the job, hands it to the
//! runner and returns.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;
use ventus_core::domain::job::{JobKind, JobRecord, JobStatus};
use ventus_core::domain::params::{MeshParams, ValidationError};
use ventus_core::dto::job::{CancelResponse, CreateJob, JobAccepted, JobSnapshot};
use ventus_runner::archive::{self, ArchiveError};
use ventus_runner::workspace::latest_log_in;
use ventus_runner::{JobRegistry, JobRunner, RegistryError};

/// Lines returned by a log tail when the caller does not ask for a count
pub const DEFAULT_LOG_LINES: usize = 100;

/// Most of a log read from its end to serve a tail
const MAX_TAIL_BYTES: u64 = 4 * 1024 * 1024;
const TAIL_CHUNK: u64 = 64 * 1024;

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Geometry file not found")]
    GeometryNotFound,

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: JobStatus },

    #[error("Job {id} is not completed (status: {status})")]
    NotCompleted { id: Uuid, status: JobStatus },

    #[error("No log available for job {0}")]
    NoLog(Uuid),

    #[error("Failed to package results: {0}")]
    Archive(#[from] ArchiveError),

    #[error("{0}")]
    Internal(String),
}

impl From<RegistryError> for JobError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => JobError::NotFound(id),
            RegistryError::AlreadyTerminal { id, status } => JobError::AlreadyTerminal { id, status },
        }
    }
}

/// Registry and runner shared by every request
#[derive(Clone)]
pub struct JobContext {
    pub registry: Arc<JobRegistry>,
    pub runner: Arc<JobRunner>,
}

impl JobContext {
    pub fn new(registry: Arc<JobRegistry>, runner: Arc<JobRunner>) -> Self {
        Self { registry, runner }
    }
}

/// Validate, register and schedule a new job
pub fn submit_job(ctx: &JobContext, kind: JobKind, req: CreateJob) -> Result<JobAccepted, JobError> {
    let config = req.into_config();

    if kind == JobKind::Mesh {
        let params = MeshParams::from_config(&config)?;
        let geometry = ctx.runner.config().geometry_path(&params.geometry_file);
        if !geometry.is_file() {
            tracing::warn!("Rejecting mesh job: {} does not exist", geometry.display());
            return Err(JobError::GeometryNotFound);
        }
    }

    let job = ctx.registry.create(kind, config)?;
    let accepted = JobAccepted {
        job_id: job.id(),
        status: job.snapshot().status,
    };

    ctx.runner.submit(job);

    tracing::info!("{} job {} accepted", kind, accepted.job_id);

    Ok(accepted)
}

/// Get a job by ID, optionally restricted to one kind
pub fn get_job(ctx: &JobContext, id: Uuid, kind: Option<JobKind>) -> Result<JobSnapshot, JobError> {
    find(ctx, id, kind).map(JobSnapshot::from)
}

/// List jobs in submission order, optionally restricted to one kind
pub fn list_jobs(ctx: &JobContext, kind: Option<JobKind>) -> Vec<JobSnapshot> {
    let records = match kind {
        Some(kind) => ctx.registry.list_kind(kind),
        None => ctx.registry.list(),
    };
    records.into_iter().map(JobSnapshot::from).collect()
}

/// Ask the runner to stop a job
pub fn cancel_job(ctx: &JobContext, id: Uuid, kind: Option<JobKind>) -> Result<CancelResponse, JobError> {
    find(ctx, id, kind)?;
    let handle = ctx.registry.get(id).ok_or(JobError::NotFound(id))?;
    let status = handle.request_cancel()?;

    tracing::info!("Cancellation requested for job {} (was {})", id, status);

    Ok(CancelResponse {
        job_id: id,
        status,
        cancel_requested: true,
    })
}

/// Package a completed job's results, returning the archive path
pub async fn prepare_download(
    ctx: &JobContext,
    id: Uuid,
    kind: Option<JobKind>,
) -> Result<(JobRecord, PathBuf), JobError> {
    let record = find(ctx, id, kind)?;
    if record.status != JobStatus::Completed {
        return Err(JobError::NotCompleted {
            id,
            status: record.status,
        });
    }

    let result_dir = record.result_path.clone();
    let archive_path = ctx.runner.config().archives_dir().join(format!("{id}.zip"));

    let path = tokio::task::spawn_blocking(move || {
        archive::package_results(&result_dir, &archive_path)
    })
    .await
    .map_err(|e| JobError::Internal(format!("Archive task failed: {e}")))??;

    tracing::debug!("Serving archive {} for job {}", path.display(), id);

    Ok((record, path))
}

/// Last `lines` lines of the job's most recent tool log
pub async fn log_tail(
    ctx: &JobContext,
    id: Uuid,
    kind: Option<JobKind>,
    lines: usize,
) -> Result<String, JobError> {
    let record = find(ctx, id, kind)?;
    let log = latest_log_in(&record.workspace_path).ok_or(JobError::NoLog(id))?;

    read_tail(&log, lines)
        .await
        .map_err(|e| JobError::Internal(format!("Failed to read {}: {}", log.display(), e)))
}

/// Last `lines` lines of a file, reading backwards from its end
///
/// At most `MAX_TAIL_BYTES` are read; a longer line-free tail is cut.
async fn read_tail(path: &Path, lines: usize) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let floor = len.saturating_sub(MAX_TAIL_BYTES);

    let mut start = len;
    let mut window: Vec<u8> = Vec::new();
    // One newline more than wanted lines puts any cut line outside the tail
    while start > floor && window.iter().filter(|&&b| b == b'\n').count() <= lines {
        let next = start.saturating_sub(TAIL_CHUNK).max(floor);
        let mut chunk = vec![0u8; (start - next) as usize];
        file.seek(SeekFrom::Start(next)).await?;
        file.read_exact(&mut chunk).await?;
        chunk.extend_from_slice(&window);
        window = chunk;
        start = next;
    }

    Ok(tail(&String::from_utf8_lossy(&window), lines))
}

fn find(ctx: &JobContext, id: Uuid, kind: Option<JobKind>) -> Result<JobRecord, JobError> {
    let record = ctx.registry.snapshot(id)?;
    match kind {
        Some(kind) if record.kind != kind => Err(JobError::NotFound(id)),
        _ => Ok(record),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    let mut out = all[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail() {
        let text = "one\ntwo\nthree\nfour\n";
        assert_eq!(tail(text, 2), "three\nfour\n");
        assert_eq!(tail(text, 10), text);
        assert_eq!(tail(text, 0), "");
        assert_eq!(tail("", 5), "");
    }

    #[tokio::test]
    async fn test_read_tail_spans_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.simpleFoam");
        let text: String = (0..20_000).map(|i| format!("Time = {i}\n")).collect();
        assert!(text.len() as u64 > 2 * TAIL_CHUNK);
        std::fs::write(&path, &text).unwrap();

        assert_eq!(
            read_tail(&path, 3).await.unwrap(),
            "Time = 19997\nTime = 19998\nTime = 19999\n"
        );

        let many = read_tail(&path, 15_000).await.unwrap();
        assert_eq!(many.lines().count(), 15_000);
        assert!(many.starts_with("Time = 5000\n"));
    }

    #[tokio::test]
    async fn test_read_tail_of_short_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.blockMesh");
        std::fs::write(&path, "one\ntwo").unwrap();

        assert_eq!(read_tail(&path, 10).await.unwrap(), "one\ntwo\n");
        assert_eq!(read_tail(&path, 0).await.unwrap(), "");
    }
}
