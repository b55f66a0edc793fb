//! Data Transfer Objects
//!
//! Request and response shapes exchanged between the API layer, the
//! orchestration engine and execution units. DTOs wrap or project domain
//! types; they carry no behaviour beyond conversions.

pub mod evaluation;
pub mod page;
