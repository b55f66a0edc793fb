//! Service Module
//!
//! Business logic layer for the orchestrator.
//! The store owns persistence and transactions; the evaluation service
//! orchestrates between the store, dispatch and experiment tracking.

pub mod aggregator;
pub mod evaluation;
pub mod store;

pub use evaluation as evaluation_service;
pub use store::EvaluationStore;
