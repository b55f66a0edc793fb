//! Core domain types
//!
//! This module contains the core domain structures used across EvalHub services.
//! The orchestrator persists them, execution units read them from the mounted
//! job specification, and the API layer returns them to callers.

pub mod evaluation;
pub mod provider;
pub mod state;
pub mod tenant;
