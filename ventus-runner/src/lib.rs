//! Ventus Runner
//!
//! The job engine behind the orchestrator. It turns an accepted job record
//! into a finished result by driving an external meshing or solver toolchain.
//!
//! Architecture:
//! - Configuration: Directory layout, polling, limits and tool names
//! - Registry: Concurrent id -> job record map shared with the HTTP layer
//! - Workspace: Per-job case directory and generated input dictionaries
//! - Supervisor: Launches external processes and watches them to exit
//! - Monitor: Progress estimation from live tool output
//! - Finalizer: Collects output artifacts and summary statistics
//! - Plan: Per-kind sequence of tools tying the pieces together
//! - Scheduler: Bounded worker pool running each job in its own task

pub mod archive;
pub mod config;
pub mod finalizer;
pub mod monitor;
pub mod plan;
pub mod registry;
pub mod scheduler;
pub mod supervisor;
pub mod workspace;

pub use config::{RunnerConfig, Tool, ToolCommands};
pub use registry::{JobHandle, JobRegistry, RegistryError};
pub use scheduler::JobRunner;
