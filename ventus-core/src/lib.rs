//! Ventus Core
//!
//! Core types and abstractions for the Ventus simulation job service.
//!
//! This crate contains:
//! - Domain types: Job records, the status state machine, per-kind parameters
//! - DTOs: Request and response bodies shared by the orchestrator and its clients

pub mod domain;
pub mod dto;
