//! EvalHub Core
//!
//! Core types and abstractions for the EvalHub evaluation service.
//!
//! This crate contains:
//! - Domain types: evaluation jobs, benchmark status and results, providers
//! - DTOs: status events, administrative requests and pagination envelopes

pub mod domain;
pub mod dto;
