//! Job registry
//!
//! In-memory id -> job map shared by the HTTP handlers (readers) and the
//! runner tasks (the only writers of a record). The registry lock only guards
//! insertion and lookup; each record sits behind its own lock so that polling
//! never waits on another job's work.
//!
//! Records are never evicted. The map grows for the lifetime of the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;
use ventus_core::domain::job::{JobConfig, JobKind, JobRecord, JobStatus};
use ventus_core::domain::params::{ValidationError, validate_config};

use crate::config::RunnerConfig;

/// Registry-level failures
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: JobStatus },
}

/// One job: its record plus the token used to request cancellation
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    record: RwLock<JobRecord>,
    cancel: CancellationToken,
}

impl JobHandle {
    fn new(record: JobRecord) -> Self {
        Self {
            id: record.id,
            record: RwLock::new(record),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Consistent copy of the record
    pub fn snapshot(&self) -> JobRecord {
        let mut record = self
            .record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        record.cancel_requested = self.cancel.is_cancelled();
        record
    }

    /// Applies `f` to the record under its write lock
    ///
    /// Only the runner task that owns the job calls this.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut JobRecord) -> R) -> R {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut record)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signals the runner to stop this job
    ///
    /// Returns the status at the time of the request. The record itself moves
    /// to `cancelled` only once the runner has stopped the job's work.
    pub fn request_cancel(&self) -> Result<JobStatus, RegistryError> {
        // Holding the read lock keeps the runner from reaching a terminal
        // state between the check and the signal.
        let record = self.record.read().unwrap_or_else(PoisonError::into_inner);
        if record.is_terminal() {
            return Err(RegistryError::AlreadyTerminal {
                id: self.id,
                status: record.status,
            });
        }
        self.cancel.cancel();
        Ok(record.status)
    }
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<Uuid, Arc<JobHandle>>,
    order: Vec<Uuid>,
}

/// Concurrent-safe job id -> record mapping
pub struct JobRegistry {
    jobs: Mutex<Jobs>,
    config: Arc<RunnerConfig>,
}

impl JobRegistry {
    pub fn new(config: Arc<RunnerConfig>) -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates `config` and inserts a new queued job
    ///
    /// Nothing is inserted when validation fails.
    pub fn create(
        &self,
        kind: JobKind,
        config: JobConfig,
    ) -> Result<Arc<JobHandle>, ValidationError> {
        validate_config(kind, &config)?;

        let mut jobs = self.lock();

        let mut id = Uuid::new_v4();
        while jobs.by_id.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let record = JobRecord::new(
            id,
            kind,
            config,
            self.config.workspace_path(id),
            self.config.result_path(id),
        );
        let handle = Arc::new(JobHandle::new(record));

        jobs.by_id.insert(id, Arc::clone(&handle));
        jobs.order.push(id);

        debug!("Registered {} job {} ({} total)", kind, id, jobs.order.len());

        Ok(handle)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<JobHandle>> {
        self.lock().by_id.get(&id).cloned()
    }

    /// Snapshot of one job
    pub fn snapshot(&self, id: Uuid) -> Result<JobRecord, RegistryError> {
        self.get(id)
            .map(|handle| handle.snapshot())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Snapshots of every job in insertion order
    pub fn list(&self) -> Vec<JobRecord> {
        self.handles().iter().map(|handle| handle.snapshot()).collect()
    }

    /// Snapshots of every job of `kind` in insertion order
    pub fn list_kind(&self, kind: JobKind) -> Vec<JobRecord> {
        self.list()
            .into_iter()
            .filter(|record| record.kind == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Result directory of a job, known without consulting the record
    pub fn result_path(&self, id: Uuid) -> PathBuf {
        self.config.result_path(id)
    }

    fn handles(&self) -> Vec<Arc<JobHandle>> {
        // Copy the handles out so record locks are never taken while the
        // registry lock is held.
        let jobs = self.lock();
        jobs.order
            .iter()
            .filter_map(|id| jobs.by_id.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(RunnerConfig::new("/srv/ventus")))
    }

    fn mesh_config() -> JobConfig {
        serde_json::from_value(json!({ "geometry_file": "box.stl" })).unwrap()
    }

    #[test]
    fn test_create_then_get_is_queued() {
        let registry = registry();
        let handle = registry.create(JobKind::Mesh, mesh_config()).unwrap();

        let record = registry.snapshot(handle.id()).unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 0);
        assert_eq!(record.kind, JobKind::Mesh);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_are_unique_and_paths_private() {
        let registry = registry();
        let mut ids = HashSet::new();
        let mut workspaces = HashSet::new();

        for _ in 0..50 {
            let handle = registry.create(JobKind::Mesh, mesh_config()).unwrap();
            let record = handle.snapshot();
            assert!(ids.insert(record.id));
            assert!(workspaces.insert(record.workspace_path.clone()));
            assert_ne!(record.workspace_path, record.result_path);
        }

        assert_eq!(registry.list().len(), 50);
    }

    #[test]
    fn test_invalid_create_inserts_nothing() {
        let registry = registry();
        let err = registry
            .create(JobKind::Simulation, serde_json::from_value(json!({ "wind_speed": 3 })).unwrap())
            .unwrap_err();

        assert_eq!(err, ValidationError::MissingField("mesh_id".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let registry = registry();
        let id = Uuid::new_v4();
        assert!(matches!(
            registry.snapshot(id),
            Err(RegistryError::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_list_preserves_insertion_order_and_filters_kind() {
        let registry = registry();
        let first = registry.create(JobKind::Mesh, mesh_config()).unwrap().id();
        let sim_config = serde_json::from_value(json!({
            "wind_speed": 10,
            "mesh_id": first.to_string()
        }))
        .unwrap();
        let second = registry.create(JobKind::Simulation, sim_config).unwrap().id();

        let ids: Vec<Uuid> = registry.list().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);

        let sims = registry.list_kind(JobKind::Simulation);
        assert_eq!(sims.len(), 1);
        assert_eq!(sims[0].id, second);
    }

    #[test]
    fn test_cancel_request_is_visible_but_status_unchanged() {
        let registry = registry();
        let handle = registry.create(JobKind::Mesh, mesh_config()).unwrap();

        assert_eq!(handle.request_cancel().unwrap(), JobStatus::Queued);
        let record = handle.snapshot();
        assert!(record.cancel_requested);
        assert_eq!(record.status, JobStatus::Queued);
    }

    #[test]
    fn test_cancel_rejected_once_terminal() {
        let registry = registry();
        let handle = registry.create(JobKind::Mesh, mesh_config()).unwrap();
        handle.update(|record| {
            record.transition(JobStatus::Cancelled).unwrap();
        });

        assert!(matches!(
            handle.request_cancel(),
            Err(RegistryError::AlreadyTerminal { status: JobStatus::Cancelled, .. })
        ));
        assert!(!handle.snapshot().cancel_requested);
    }
}
