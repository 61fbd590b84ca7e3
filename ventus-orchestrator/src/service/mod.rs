//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers and the job engine.

pub mod job;

// Re-export for convenience
pub use job as job_service;
