//! EvalHub Orchestrator
//!
//! Accepts evaluation jobs, persists them, dispatches each benchmark as a
//! cluster workload and folds the status events those workloads report back
//! into one overall job state.

pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod providers;
pub mod repository;
pub mod service;
pub mod tracking;
