//! Job DTOs for the HTTP API

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{JobConfig, JobRecord, JobStatus};

/// Request to create a new job
///
/// The body is the flat parameter map. Tuning fields may also be nested
/// under a `config` object, e.g. `{"geometry_file": "box.stl", "config":
/// {"refinement_level": 2}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJob {
    #[serde(flatten)]
    pub parameters: JobConfig,
}

impl CreateJob {
    /// Flattens a nested `config` object into the parameter map
    ///
    /// Top-level fields win over nested ones with the same name.
    pub fn into_config(self) -> JobConfig {
        let mut parameters = self.parameters;

        if let Some(serde_json::Value::Object(nested)) = parameters.remove("config") {
            for (key, value) in nested {
                parameters.entry(key).or_insert(value);
            }
        }

        parameters
    }
}

/// Response to an accepted job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Point-in-time view of a job served to polling clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub record: JobRecord,
    /// Seconds since the job started running
    pub duration: Option<f64>,
}

impl From<JobRecord> for JobSnapshot {
    fn from(record: JobRecord) -> Self {
        let duration = record.duration_secs(Utc::now());
        Self { record, duration }
    }
}

/// Response to a cancellation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    /// Status at the time the request was accepted
    pub status: JobStatus,
    pub cancel_requested: bool,
}
