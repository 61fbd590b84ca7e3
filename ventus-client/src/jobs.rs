//! Job-related API endpoints

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use ventus_core::domain::job::JobKind;
use ventus_core::dto::job::{CancelResponse, CreateJob, JobAccepted, JobSnapshot};

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
}

/// Collection path serving jobs of `kind`
fn collection(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Simulation => "simulations",
        JobKind::Mesh => "meshes",
    }
}

impl OrchestratorClient {
    /// Check that the orchestrator is up
    pub async fn health(&self) -> Result<HealthStatus> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Job Submission
    // =============================================================================

    /// Submit a job of `kind`
    ///
    /// Returns as soon as the orchestrator has queued the job; poll
    /// [`get_job`](Self::get_job) for progress.
    pub async fn create_job(&self, kind: JobKind, req: CreateJob) -> Result<JobAccepted> {
        let url = format!("{}/api/{}", self.base_url, collection(kind));
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Submit a wind simulation job
    pub async fn create_simulation(&self, req: CreateJob) -> Result<JobAccepted> {
        self.create_job(JobKind::Simulation, req).await
    }

    /// Submit a mesh generation job
    pub async fn create_mesh(&self, req: CreateJob) -> Result<JobAccepted> {
        self.create_job(JobKind::Mesh, req).await
    }

    // =============================================================================
    // Job Inspection
    // =============================================================================

    /// Get a job snapshot by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<JobSnapshot> {
        let url = format!("{}/api/jobs/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List all jobs, optionally only those of one kind
    pub async fn list_jobs(&self, kind: Option<JobKind>) -> Result<Vec<JobSnapshot>> {
        let url = match kind {
            Some(kind) => format!("{}/api/{}", self.base_url, collection(kind)),
            None => format!("{}/api/jobs", self.base_url),
        };
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Poll a job until it reaches a terminal status
    ///
    /// `on_update` sees every snapshot, including the final one.
    pub async fn wait_for_job(
        &self,
        job_id: Uuid,
        interval: Duration,
        mut on_update: impl FnMut(&JobSnapshot),
    ) -> Result<JobSnapshot> {
        loop {
            let snapshot = self.get_job(job_id).await?;
            on_update(&snapshot);

            if snapshot.record.is_terminal() {
                return Ok(snapshot);
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Tail of the job's most recent tool log
    pub async fn job_log(&self, job_id: Uuid, lines: Option<usize>) -> Result<String> {
        let mut url = format!("{}/api/jobs/{}/log", self.base_url, job_id);
        if let Some(lines) = lines {
            url.push_str(&format!("?lines={lines}"));
        }
        let response = self.client.get(&url).send().await?;

        Ok(self.check_status(response).await?.text().await?)
    }

    // =============================================================================
    // Job Control
    // =============================================================================

    /// Request cancellation of a live job
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<CancelResponse> {
        let url = format!("{}/api/jobs/{}/cancel", self.base_url, job_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Download the zipped results of a completed job into `dest`
    ///
    /// Returns the number of bytes written.
    pub async fn download_results(&self, job_id: Uuid, dest: &Path) -> Result<u64> {
        let url = format!("{}/api/jobs/{}/download", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;
        let mut response = self.check_status(response).await?;

        let io_error =
            |context: String| move |source: std::io::Error| ClientError::Io { context, source };

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(io_error(format!("Failed to create {}", dest.display())))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(io_error(format!("Failed to write {}", dest.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(io_error(format!("Failed to write {}", dest.display())))?;

        tracing::debug!("Downloaded {} bytes for job {}", written, job_id);

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_paths() {
        assert_eq!(collection(JobKind::Simulation), "simulations");
        assert_eq!(collection(JobKind::Mesh), "meshes");
    }

    #[tokio::test]
    async fn test_unreachable_orchestrator() {
        // Port 9 (discard) is not expected to serve HTTP
        let client = OrchestratorClient::new("http://127.0.0.1:9");
        let err = client.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ClientError::RequestFailed(_)));
    }
}
