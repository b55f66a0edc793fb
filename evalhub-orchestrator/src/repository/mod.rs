//! Repository Module
//!
//! Data access layer for the orchestrator.

pub mod evaluation;

pub use evaluation as evaluation_repository;
