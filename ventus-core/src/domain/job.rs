//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::summary::{FieldStatistics, ForceCoefficients, MeshStats};

/// Caller-supplied job parameters, immutable once the job is created
pub type JobConfig = HashMap<String, serde_json::Value>;

/// Kind of external computation a job drives
///
/// Determines the workspace template, the external commands and the
/// required parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Simulation,
    Mesh,
}

impl JobKind {
    /// Parameters that must be present in the config for this kind
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            JobKind::Simulation => &["wind_speed", "mesh_id"],
            JobKind::Mesh => &["geometry_file"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Simulation => "simulation",
            JobKind::Mesh => "mesh",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status
///
/// `Queued -> SettingUp -> Running -> PostProcessing -> Completed`, with
/// `Failed` reachable from the three working states and `Cancelled`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    SettingUp,
    Running,
    PostProcessing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Queued, SettingUp)
            | (SettingUp, Running)
            | (SettingUp, Failed)
            | (Running, PostProcessing)
            | (Running, Failed)
            | (PostProcessing, Completed)
            | (PostProcessing, Failed) => true,
            (current, Cancelled) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::SettingUp => "setting_up",
            JobStatus::Running => "running",
            JobStatus::PostProcessing => "post_processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state machine move
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Job execution record
///
/// Created by the orchestrator when a request is accepted and mutated only by
/// the runner task that owns the job. Once a terminal status is reached no
/// field changes again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub kind: JobKind,
    pub config: JobConfig,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub workspace_path: PathBuf,
    pub result_path: PathBuf,
    pub cancel_requested: bool,
    pub mesh_stats: Option<MeshStats>,
    pub force_coefficients: Option<ForceCoefficients>,
    pub field_statistics: Option<FieldStatistics>,
}

impl JobRecord {
    pub fn new(
        id: Uuid,
        kind: JobKind,
        config: JobConfig,
        workspace_path: PathBuf,
        result_path: PathBuf,
    ) -> Self {
        Self {
            id,
            kind,
            config,
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            workspace_path,
            result_path,
            cancel_requested: false,
            mesh_stats: None,
            force_coefficients: None,
            field_statistics: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the record to `next`, stamping `start_time` when entering
    /// `Running` and `end_time` when entering `Completed`
    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }

        match next {
            JobStatus::Running => self.start_time = Some(Utc::now()),
            JobStatus::Completed => {
                self.progress = 100;
                self.end_time = Some(Utc::now());
            }
            _ => {}
        }

        self.status = next;
        Ok(())
    }

    /// Moves the record to `Failed` and records the error message
    ///
    /// Progress keeps its last value.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Raises progress to `value` (clamped to 100)
    ///
    /// Lower values and updates on terminal records are ignored.
    pub fn set_progress(&mut self, value: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(value.min(100));
    }

    /// Seconds between `start_time` and `end_time` (or `now` while live)
    pub fn duration_secs(&self, now: DateTime<Utc>) -> Option<f64> {
        let start = self.start_time?;
        let end = match (self.end_time, self.is_terminal()) {
            (Some(end), _) => end,
            // Failed and cancelled jobs stop the clock at the last observation
            (None, true) => return None,
            (None, false) => now,
        };
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}
