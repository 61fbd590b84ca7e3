//! Job runner
//!
//! Drives accepted jobs through their lifecycle, one supervised task per job.
//! A semaphore bounds how many jobs execute at once; the rest stay `queued`
//! until a slot frees up. The runner task is the only writer of its job's
//! record.

use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ventus_core::domain::job::JobStatus;

use crate::config::RunnerConfig;
use crate::finalizer::{FinalizationError, FinalizeContext};
use crate::plan::{JobPlan, plan_for};
use crate::registry::JobHandle;
use crate::supervisor::{ExitOutcome, ProcessSupervisor};
use crate::workspace::{Workspace, WorkspaceBuilder};

/// Progress once the workspace is ready
const SETUP_DONE_PROGRESS: u8 = 20;
/// Progress on entering post-processing
const POST_PROCESSING_PROGRESS: u8 = 90;

/// Bounded worker pool executing jobs
pub struct JobRunner {
    config: Arc<RunnerConfig>,
    supervisor: ProcessSupervisor,
    builder: WorkspaceBuilder,
    slots: Arc<Semaphore>,
}

/// Why a job stopped before completing
enum Stop {
    Failed(String),
    Cancelled,
}

impl JobRunner {
    pub fn new(config: Arc<RunnerConfig>) -> Self {
        let supervisor = ProcessSupervisor::new(config.poll_interval, config.termination_grace);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            config,
            supervisor,
            builder: WorkspaceBuilder,
            slots,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of jobs that could start right now
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Schedules a queued job and returns immediately
    ///
    /// The returned handle resolves once the job has reached a terminal
    /// state. A panic inside the job task is recorded as a failure.
    pub fn submit(self: &Arc<Self>, job: Arc<JobHandle>) -> tokio::task::JoinHandle<()> {
        let runner = Arc::clone(self);

        tokio::spawn(async move {
            let id = job.id();
            let inner = {
                let job = Arc::clone(&job);
                tokio::spawn(async move { runner.execute(&job).await })
            };

            if let Err(e) = inner.await {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                error!("Job {} task aborted: {}", id, reason);
                mark_failed(&job, format!("Internal error: {reason}"));
            }
        })
    }

    async fn execute(&self, job: &JobHandle) {
        let id = job.id();
        let cancel = job.cancel_token();

        // Hold a slot for the whole run
        let _permit = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    mark_failed(job, "Runner is shutting down");
                    return;
                }
            },
            _ = cancel.cancelled() => {
                info!("Job {} cancelled while queued", id);
                finish(job, Stop::Cancelled);
                return;
            }
        };

        info!("Starting job {}", id);

        if let Err(stop) = self.run_phases(job, &cancel).await {
            finish(job, stop);
        }

        let record = job.snapshot();
        info!(
            "Job {} finished with status {} (progress {})",
            id, record.status, record.progress
        );
    }

    async fn run_phases(&self, job: &JobHandle, cancel: &CancellationToken) -> Result<(), Stop> {
        advance(job, JobStatus::SettingUp)?;

        let record = job.snapshot();
        let plan = plan_for(&record, &self.config)
            .map_err(|e| Stop::Failed(format!("Setup failed: {e}")))?;

        let workspace = {
            let plan = Arc::clone(&plan);
            let builder = self.builder;
            tokio::task::spawn_blocking(move || builder.prepare(&record, plan.as_ref()))
                .await
                .map_err(|e| Stop::Failed(format!("Setup failed: {e}")))?
                .map_err(|e| Stop::Failed(format!("Setup failed: {e}")))?
        };
        job.update(|r| r.set_progress(SETUP_DONE_PROGRESS));

        if cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        advance(job, JobStatus::Running)?;

        let deadline = plan.time_limit().map(|limit| Instant::now() + limit);
        self.run_steps(job, plan.as_ref(), &workspace, deadline, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        advance(job, JobStatus::PostProcessing)?;
        job.update(|r| r.set_progress(POST_PROCESSING_PROGRESS));

        let ctx = FinalizeContext {
            workspace: &workspace,
            supervisor: &self.supervisor,
            tools: &self.config.tools,
            cancel,
            deadline,
        };
        let summary = plan.finalize(&ctx).await.map_err(|e| match e {
            FinalizationError::Cancelled => Stop::Cancelled,
            FinalizationError::TimedOut => {
                Stop::Failed(timeout_message(plan.as_ref()))
            }
            other => Stop::Failed(format!("Post-processing failed: {other}")),
        })?;

        job.update(|r| {
            // A cancel that raced the last step still wins
            if cancel.is_cancelled() {
                return r.transition(JobStatus::Cancelled);
            }
            r.mesh_stats = summary.mesh_stats;
            r.force_coefficients = summary.force_coefficients;
            r.field_statistics = summary.field_statistics;
            r.transition(JobStatus::Completed)
        })
        .map_err(|e| Stop::Failed(format!("Internal error: {e}")))
    }

    async fn run_steps(
        &self,
        job: &JobHandle,
        plan: &dyn JobPlan,
        workspace: &Workspace,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), Stop> {
        for step in plan.steps(workspace, &self.config.tools) {
            if cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }

            debug!("Job {}: running {}", job.id(), step.command);
            job.update(|r| r.set_progress(step.progress.start));

            let log_path = workspace.log_path(step.name);
            let outcome = self
                .supervisor
                .run(
                    &step.command,
                    workspace.root(),
                    &log_path,
                    deadline,
                    cancel,
                    |elapsed| {
                        let estimator = step.estimator.clone();
                        let log_path = log_path.clone();
                        let band = step.progress;
                        async move {
                            let Some(estimator) = estimator else {
                                return;
                            };
                            // Estimators read the log from disk
                            let estimate = tokio::task::spawn_blocking(move || {
                                estimator.estimate(&log_path, elapsed)
                            });
                            match estimate.await {
                                Ok(fraction) => job.update(|r| r.set_progress(band.at(fraction))),
                                Err(e) => warn!("Job {}: progress estimate failed: {}", job.id(), e),
                            }
                        }
                    },
                )
                .await
                .map_err(|e| Stop::Failed(format!("{}: {e}", step.failure_message)))?;

            match outcome {
                ExitOutcome::Exited(0) => job.update(|r| r.set_progress(step.progress.end)),
                ExitOutcome::Exited(code) => {
                    return Err(Stop::Failed(format!(
                        "{} (exit code {code})",
                        step.failure_message
                    )));
                }
                ExitOutcome::Signalled => {
                    return Err(Stop::Failed(format!(
                        "{} (terminated by signal)",
                        step.failure_message
                    )));
                }
                ExitOutcome::Cancelled => return Err(Stop::Cancelled),
                ExitOutcome::TimedOut => return Err(Stop::Failed(timeout_message(plan))),
            }
        }

        Ok(())
    }
}

fn timeout_message(plan: &dyn JobPlan) -> String {
    match plan.time_limit() {
        Some(limit) => plan.timeout_message(limit),
        None => format!("{} timed out", plan.kind()),
    }
}

fn advance(job: &JobHandle, next: JobStatus) -> Result<(), Stop> {
    job.update(|r| r.transition(next))
        .map_err(|e| Stop::Failed(format!("Internal error: {e}")))
}

/// Records the terminal state for a job that did not complete
fn finish(job: &JobHandle, stop: Stop) {
    match stop {
        Stop::Failed(message) => {
            warn!("Job {} failed: {}", job.id(), message);
            mark_failed(job, message);
        }
        Stop::Cancelled => {
            let result = job.update(|r| {
                if r.is_terminal() {
                    return Ok(());
                }
                r.transition(JobStatus::Cancelled)
            });
            match result {
                Ok(()) => info!("Job {} cancelled", job.id()),
                Err(e) => error!("Job {}: {}", job.id(), e),
            }
        }
    }
}

/// Moves a live job to `failed`, passing through `setting_up` if it never
/// left the queue
fn mark_failed(job: &JobHandle, message: impl Into<String>) {
    let message = message.into();
    let result = job.update(|r| {
        if r.is_terminal() {
            return Ok(());
        }
        if r.status == JobStatus::Queued {
            r.transition(JobStatus::SettingUp)?;
        }
        r.fail(message)
    });
    if let Err(e) = result {
        error!("Job {}: could not record failure: {}", job.id(), e);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job task panicked".to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{Tool, ToolCommands};
    use crate::registry::JobRegistry;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use uuid::Uuid;
    use ventus_core::domain::job::{JobKind, JobRecord};

    const BOX_STL: &str = "solid box
  facet normal 0 0 -1
    outer loop
      vertex 0 0 0
      vertex 4 0 0
      vertex 4 3 0
    endloop
  endfacet
  facet normal 0 0 1
    outer loop
      vertex 0 0 5
      vertex 4 3 5
      vertex 0 3 5
    endloop
  endfacet
endsolid box
";

    /// Writes an executable shell script standing in for an external tool
    fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    struct Harness {
        _dir: tempfile::TempDir,
        registry: JobRegistry,
        runner: Arc<JobRunner>,
    }

    impl Harness {
        fn new(tools: impl FnOnce(&Path) -> ToolCommands) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let bin = dir.path().join("bin");
            std::fs::create_dir_all(&bin).unwrap();

            let mut config = RunnerConfig::new(dir.path().join("data"));
            config.poll_interval = Duration::from_millis(50);
            config.termination_grace = Duration::from_millis(500);
            config.tools = tools(&bin);
            config.ensure_layout().unwrap();
            std::fs::write(config.geometry_path("box.stl"), BOX_STL).unwrap();

            let config = Arc::new(config);
            Self {
                _dir: dir,
                registry: JobRegistry::new(Arc::clone(&config)),
                runner: Arc::new(JobRunner::new(config)),
            }
        }

        async fn run(&self, kind: JobKind, config: serde_json::Value) -> JobRecord {
            let job = self
                .registry
                .create(kind, serde_json::from_value(config).unwrap())
                .unwrap();
            tokio::time::timeout(Duration::from_secs(30), self.runner.submit(Arc::clone(&job)))
                .await
                .expect("job did not finish")
                .unwrap();
            job.snapshot()
        }
    }

    /// Mesher stand-ins that create a polyMesh and report counts
    fn mesh_tools(bin: &Path) -> ToolCommands {
        ToolCommands::default()
            .with_program(Tool::BlockMesh, fake_tool(bin, "blockMesh", "mkdir -p constant/polyMesh && echo points > constant/polyMesh/points"))
            .with_program(Tool::SurfaceFeatureExtract, fake_tool(bin, "surfaceFeatureExtract", "echo edges"))
            .with_program(Tool::SnappyHexMesh, fake_tool(bin, "snappyHexMesh", "echo snapping; echo faces > constant/polyMesh/faces"))
            .with_program(
                Tool::CheckMesh,
                fake_tool(bin, "checkMesh", "echo 'Mesh stats'\necho '    points:           10'\necho '    faces:            20'\necho '    internal faces:   8'\necho '    cells:            5'\necho '    faces per cell:   4'"),
            )
    }

    fn solver_tools(bin: &Path, solver_body: &str) -> ToolCommands {
        mesh_tools(bin)
            .with_program(Tool::Solver, fake_tool(bin, "simpleFoam", solver_body))
            .with_program(Tool::PostProcess, fake_tool(bin, "postProcess", "exit 0"))
    }

    fn seed_mesh_result(runner: &JobRunner) -> Uuid {
        let mesh_id = Uuid::new_v4();
        let poly: PathBuf = runner.config().result_path(mesh_id).join("constant/polyMesh");
        std::fs::create_dir_all(&poly).unwrap();
        std::fs::write(poly.join("points"), "points").unwrap();
        mesh_id
    }

    #[tokio::test]
    async fn test_mesh_job_completes_with_stats() {
        let harness = Harness::new(mesh_tools);

        let record = harness
            .run(
                JobKind::Mesh,
                json!({ "geometry_file": "box.stl", "refinement_level": 2 }),
            )
            .await;

        assert_eq!(record.status, JobStatus::Completed, "error: {:?}", record.error);
        assert_eq!(record.progress, 100);
        assert!(record.error.is_none());
        assert!(record.start_time.is_some());
        assert!(record.end_time.is_some());

        let stats = record.mesh_stats.unwrap();
        assert_eq!((stats.cells, stats.points, stats.faces), (5, 10, 20));
        assert!(record.result_path.join("constant/polyMesh/faces").is_file());
        assert!(record.workspace_path.join("log.snappyHexMesh").is_file());
    }

    #[tokio::test]
    async fn test_solver_failure_freezes_record() {
        let harness = Harness::new(|bin| {
            solver_tools(bin, "echo 'Time = 1'; echo 'Time = 2'; echo 'FOAM FATAL ERROR' >&2; exit 1")
        });
        let mesh_id = seed_mesh_result(&harness.runner);

        let record = harness
            .run(
                JobKind::Simulation,
                json!({ "wind_speed": 10, "mesh_id": mesh_id.to_string() }),
            )
            .await;

        assert_eq!(record.status, JobStatus::Failed);
        let error = record.error.clone().unwrap();
        assert!(error.contains("Simulation failed"), "{error}");
        assert!(error.contains("exit code 1"), "{error}");
        assert!(record.end_time.is_none());
        assert_eq!(record.progress, 50);

        let log = std::fs::read_to_string(record.workspace_path.join("log.simpleFoam")).unwrap();
        assert!(log.contains("FOAM FATAL ERROR"));

        // Terminal records no longer change
        let again = harness.registry.snapshot(record.id).unwrap();
        assert_eq!(again.error, record.error);
        assert_eq!(again.progress, record.progress);
        assert_eq!(again.end_time, record.end_time);
    }

    #[tokio::test]
    async fn test_simulation_completes_with_fields_and_coefficients() {
        let harness = Harness::new(|bin| {
            solver_tools(
                bin,
                "mkdir -p 100 postProcessing/forceCoeffs/0\n\
                 echo 'internalField uniform (3 4 0);' > 100/U\n\
                 echo 'internalField nonuniform List<scalar> 2(1 3);' > 100/p\n\
                 printf '# Time Cm Cd Cl\\n100 0.01 1.2 0.3\\n' > postProcessing/forceCoeffs/0/forceCoeffs.dat\n\
                 echo 'Time = 100'",
            )
        });
        let mesh_id = seed_mesh_result(&harness.runner);

        let record = harness
            .run(
                JobKind::Simulation,
                json!({ "wind_speed": 10, "mesh_id": mesh_id.to_string(), "simulation_time": 100 }),
            )
            .await;

        assert_eq!(record.status, JobStatus::Completed, "error: {:?}", record.error);
        assert!(record.result_path.join("100/U").is_file());
        let coeffs = record.force_coefficients.unwrap();
        assert_eq!(coeffs.cd, 1.2);
        assert_eq!(coeffs.samples, 1);

        let fields = record.field_statistics.unwrap();
        assert_eq!(fields.time, 100.0);
        assert_eq!(fields.velocity_magnitude.unwrap().mean, 5.0);
        let pressure = fields.pressure.unwrap();
        assert_eq!((pressure.samples, pressure.mean, pressure.std), (2, 2.0, 1.0));
    }

    #[tokio::test]
    async fn test_missing_output_fails_post_processing() {
        let harness = Harness::new(|bin| solver_tools(bin, "echo 'Time = 1'"));
        let mesh_id = seed_mesh_result(&harness.runner);

        let record = harness
            .run(
                JobKind::Simulation,
                json!({ "wind_speed": 10, "mesh_id": mesh_id.to_string() }),
            )
            .await;

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("Post-processing failed: no output produced")
        );
        assert_eq!(record.progress, POST_PROCESSING_PROGRESS);
    }

    #[tokio::test]
    async fn test_missing_mesh_fails_setup() {
        let harness = Harness::new(|bin| solver_tools(bin, "exit 0"));
        let mesh_id = Uuid::new_v4();

        let record = harness
            .run(
                JobKind::Simulation,
                json!({ "wind_speed": 10, "mesh_id": mesh_id.to_string() }),
            )
            .await;

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error, Some(format!("Setup failed: Mesh {mesh_id} not found")));
        assert!(record.start_time.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_geometry_fails_setup() {
        let harness = Harness::new(mesh_tools);
        std::fs::write(
            harness.runner.config().geometry_path("model.step"),
            b"ISO-10303-21;",
        )
        .unwrap();

        let record = harness
            .run(JobKind::Mesh, json!({ "geometry_file": "model.step" }))
            .await;

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("Setup failed: Unsupported geometry format: .step")
        );
    }

    #[tokio::test]
    async fn test_cancel_running_job_stops_process() {
        let harness = Harness::new(|bin| solver_tools(bin, "echo 'Time = 1'; sleep 30"));
        let mesh_id = seed_mesh_result(&harness.runner);

        let job = harness
            .registry
            .create(
                JobKind::Simulation,
                serde_json::from_value(json!({ "wind_speed": 10, "mesh_id": mesh_id.to_string() }))
                    .unwrap(),
            )
            .unwrap();
        let task = harness.runner.submit(Arc::clone(&job));

        // Wait for the solver to start
        for _ in 0..200 {
            if job.snapshot().progress >= 50 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(job.snapshot().status, JobStatus::Running);

        let started = std::time::Instant::now();
        assert_eq!(job.request_cancel().unwrap(), JobStatus::Running);
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("cancel did not stop the job")
            .unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.cancel_requested);
        assert!(record.end_time.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(job.request_cancel().is_err());
    }

    #[tokio::test]
    async fn test_queued_job_waits_for_slot_and_can_be_cancelled() {
        let harness = Harness::new(|bin| solver_tools(bin, "sleep 30"));
        let mesh_id = seed_mesh_result(&harness.runner);
        let config = || {
            serde_json::from_value(json!({ "wind_speed": 10, "mesh_id": mesh_id.to_string() }))
                .unwrap()
        };

        // Default pool has two slots
        let busy: Vec<_> = (0..2)
            .map(|_| harness.registry.create(JobKind::Simulation, config()).unwrap())
            .collect();
        let busy_tasks: Vec<_> = busy
            .iter()
            .map(|job| harness.runner.submit(Arc::clone(job)))
            .collect();

        let waiting = harness.registry.create(JobKind::Simulation, config()).unwrap();
        let waiting_task = harness.runner.submit(Arc::clone(&waiting));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(harness.runner.available_slots(), 0);
        assert_eq!(waiting.snapshot().status, JobStatus::Queued);

        waiting.request_cancel().unwrap();
        waiting_task.await.unwrap();
        assert_eq!(waiting.snapshot().status, JobStatus::Cancelled);
        assert_eq!(waiting.snapshot().progress, 0);

        for (job, task) in busy.iter().zip(busy_tasks) {
            job.request_cancel().unwrap();
            task.await.unwrap();
            assert_eq!(job.snapshot().status, JobStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_mesh_timeout() {
        let harness = Harness::new(|bin| {
            mesh_tools(bin).with_program(Tool::SnappyHexMesh, fake_tool(bin, "snappyHexMesh", "sleep 30"))
        });
        let job = harness
            .registry
            .create(
                JobKind::Mesh,
                serde_json::from_value(json!({ "geometry_file": "box.stl" })).unwrap(),
            )
            .unwrap();

        let mut config = (*harness.runner.config).clone();
        config.mesh_timeout = Duration::from_millis(500);
        let runner = Arc::new(JobRunner::new(Arc::new(config)));

        tokio::time::timeout(Duration::from_secs(10), runner.submit(Arc::clone(&job)))
            .await
            .expect("timeout was not enforced")
            .unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("Mesh generation timed out after 0.5s")
        );
        assert!(record.progress >= 50);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "job task panicked");
    }
}
