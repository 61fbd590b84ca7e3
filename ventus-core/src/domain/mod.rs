//! Core domain types
//!
//! This module contains the core domain structures used across Ventus crates.
//! The orchestrator serves them over HTTP, the runner mutates them while a job
//! executes, and the client deserializes them.

pub mod job;
pub mod params;
pub mod summary;
