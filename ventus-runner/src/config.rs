//! Runner configuration
//!
//! Defines all configurable parameters for the job engine including the
//! on-disk layout, polling and termination intervals, concurrency limits and
//! the names of the external tools it launches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// External programs the runner knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    BlockMesh,
    SurfaceFeatureExtract,
    SnappyHexMesh,
    CheckMesh,
    Solver,
    PostProcess,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::BlockMesh,
        Tool::SurfaceFeatureExtract,
        Tool::SnappyHexMesh,
        Tool::CheckMesh,
        Tool::Solver,
        Tool::PostProcess,
    ];

    /// Program name used when no override is configured
    pub fn default_program(&self) -> &'static str {
        match self {
            Tool::BlockMesh => "blockMesh",
            Tool::SurfaceFeatureExtract => "surfaceFeatureExtract",
            Tool::SnappyHexMesh => "snappyHexMesh",
            Tool::CheckMesh => "checkMesh",
            Tool::Solver => "simpleFoam",
            Tool::PostProcess => "postProcess",
        }
    }

    /// Environment variable that overrides the program for this tool
    pub fn env_var(&self) -> &'static str {
        match self {
            Tool::BlockMesh => "VENTUS_TOOL_BLOCKMESH",
            Tool::SurfaceFeatureExtract => "VENTUS_TOOL_SURFACEFEATUREEXTRACT",
            Tool::SnappyHexMesh => "VENTUS_TOOL_SNAPPYHEXMESH",
            Tool::CheckMesh => "VENTUS_TOOL_CHECKMESH",
            Tool::Solver => "VENTUS_TOOL_SOLVER",
            Tool::PostProcess => "VENTUS_TOOL_POSTPROCESS",
        }
    }
}

/// Program paths for each external tool
#[derive(Debug, Clone, Default)]
pub struct ToolCommands {
    overrides: HashMap<Tool, String>,
}

impl ToolCommands {
    /// Program to launch for `tool`
    pub fn program(&self, tool: Tool) -> &str {
        self.overrides
            .get(&tool)
            .map(String::as_str)
            .unwrap_or_else(|| tool.default_program())
    }

    /// Replaces the program for `tool`
    pub fn with_program(mut self, tool: Tool, program: impl Into<String>) -> Self {
        self.overrides.insert(tool, program.into());
        self
    }

    fn from_env() -> Self {
        let mut tools = Self::default();
        for tool in Tool::ALL {
            if let Ok(program) = std::env::var(tool.env_var()) {
                if !program.trim().is_empty() {
                    tools = tools.with_program(tool, program.trim());
                }
            }
        }
        tools
    }
}

/// Runner configuration
///
/// Every job gets `<data_dir>/workspaces/<id>` for its case files and
/// `<data_dir>/results/<id>` for finalized outputs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root directory for workspaces, results and archives
    pub data_dir: PathBuf,

    /// Directory holding uploaded geometry files
    pub geometry_dir: PathBuf,

    /// How often a running process is checked and its progress re-estimated
    pub poll_interval: Duration,

    /// Max jobs executing at once; further jobs stay queued
    pub max_concurrent_jobs: usize,

    /// Time a cancelled process group gets between SIGTERM and SIGKILL
    pub termination_grace: Duration,

    /// Ceiling on the whole meshing toolchain run
    pub mesh_timeout: Duration,

    /// Expected snappyHexMesh wall-clock time, used for progress only
    pub mesh_progress_budget: Duration,

    /// External program names
    pub tools: ToolCommands,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            geometry_dir: data_dir.join("geometries"),
            data_dir,
            poll_interval: Duration::from_secs(5),
            max_concurrent_jobs: 2,
            termination_grace: Duration::from_secs(10),
            mesh_timeout: Duration::from_secs(3600), // 1 hour
            mesh_progress_budget: Duration::from_secs(70),
            tools: ToolCommands::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - VENTUS_DATA_DIR (optional, default: ./data)
    /// - VENTUS_GEOMETRY_DIR (optional, default: <data_dir>/geometries)
    /// - VENTUS_POLL_INTERVAL (optional, seconds, default: 5)
    /// - VENTUS_MAX_CONCURRENT_JOBS (optional, default: 2)
    /// - VENTUS_TERMINATION_GRACE (optional, seconds, default: 10)
    /// - VENTUS_MESH_TIMEOUT (optional, seconds, default: 3600)
    /// - VENTUS_MESH_PROGRESS_BUDGET (optional, seconds, default: 70)
    /// - VENTUS_TOOL_<NAME> (optional, program override per tool)
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = std::env::var("VENTUS_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        if data_dir.trim().is_empty() {
            anyhow::bail!("VENTUS_DATA_DIR cannot be empty");
        }

        let mut config = Self::new(data_dir);

        if let Ok(dir) = std::env::var("VENTUS_GEOMETRY_DIR") {
            config.geometry_dir = PathBuf::from(dir);
        }

        config.poll_interval = env_secs("VENTUS_POLL_INTERVAL").unwrap_or(config.poll_interval);

        config.max_concurrent_jobs = std::env::var("VENTUS_MAX_CONCURRENT_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(config.max_concurrent_jobs);

        config.termination_grace =
            env_secs("VENTUS_TERMINATION_GRACE").unwrap_or(config.termination_grace);
        config.mesh_timeout = env_secs("VENTUS_MESH_TIMEOUT").unwrap_or(config.mesh_timeout);
        config.mesh_progress_budget =
            env_secs("VENTUS_MESH_PROGRESS_BUDGET").unwrap_or(config.mesh_progress_budget);

        config.tools = ToolCommands::from_env();

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be greater than 0");
        }

        if self.mesh_timeout.is_zero() {
            anyhow::bail!("mesh_timeout must be greater than 0");
        }

        if self.mesh_progress_budget.is_zero() {
            anyhow::bail!("mesh_progress_budget must be greater than 0");
        }

        for tool in Tool::ALL {
            if self.tools.program(tool).is_empty() {
                anyhow::bail!("program for {:?} cannot be empty", tool);
            }
        }

        Ok(())
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.data_dir.join("archives")
    }

    pub fn workspace_path(&self, job_id: Uuid) -> PathBuf {
        self.workspaces_dir().join(job_id.to_string())
    }

    pub fn result_path(&self, job_id: Uuid) -> PathBuf {
        self.results_dir().join(job_id.to_string())
    }

    pub fn geometry_path(&self, file_name: &str) -> PathBuf {
        self.geometry_dir.join(file_name)
    }

    /// Creates the top-level directories the runner writes into
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [
            self.workspaces_dir(),
            self.results_dir(),
            self.archives_dir(),
            self.geometry_dir.clone(),
        ] {
            create_dir(&dir)?;
        }
        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn create_dir(dir: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))
}
