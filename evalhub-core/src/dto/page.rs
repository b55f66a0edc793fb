//! Pagination envelopes

use serde::{Deserialize, Serialize};

use crate::domain::evaluation::EvaluationJobResource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HRef {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub first: HRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<HRef>,
    pub limit: i64,
    pub total_count: i64,
}

/// One page of evaluation jobs
///
/// `errors` lists rows that could not be decoded; they are excluded from
/// `items` and from `total_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJobResourceList {
    #[serde(flatten)]
    pub page: Page,
    pub items: Vec<EvaluationJobResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Raw store output for a paginated read, before hrefs are attached
#[derive(Debug, Clone)]
pub struct QueryResults<T> {
    pub items: Vec<T>,
    pub total_stored: i64,
    pub errors: Vec<String>,
}
