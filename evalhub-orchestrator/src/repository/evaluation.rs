//! Evaluation Repository
//!
//! Statements for the `evaluations` table. Every function takes an executor
//! so the store can run it on the pool or inside a transaction.

use sqlx::{Any, Executor};

use crate::db::Dialect;

/// One row of the `evaluations` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EvaluationRow {
    pub id: String,
    pub tenant_id: String,
    pub status: String,
    pub experiment_id: Option<String>,
    pub entity: String,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

const COLUMNS: &str =
    "id, tenant_id, status, experiment_id, entity, created_at, updated_at, version";

fn placeholders(dialect: Dialect, range: std::ops::RangeInclusive<usize>) -> String {
    range
        .map(|n| dialect.placeholder(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tenant and optional status filter shared by the list queries
fn filter_clause(dialect: Dialect, status: Option<&str>) -> String {
    match status {
        Some(_) => format!(
            "WHERE tenant_id = {} AND status = {}",
            dialect.placeholder(1),
            dialect.placeholder(2)
        ),
        None => format!("WHERE tenant_id = {}", dialect.placeholder(1)),
    }
}

pub async fn insert<'e, E>(
    executor: E,
    dialect: Dialect,
    row: &EvaluationRow,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let sql = format!(
        "INSERT INTO evaluations ({}) VALUES ({})",
        COLUMNS,
        placeholders(dialect, 1..=8)
    );

    sqlx::query(&sql)
        .bind(&row.id)
        .bind(&row.tenant_id)
        .bind(&row.status)
        .bind(&row.experiment_id)
        .bind(&row.entity)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .bind(row.version)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn find_by_id<'e, E>(
    executor: E,
    dialect: Dialect,
    tenant_id: &str,
    id: &str,
) -> Result<Option<EvaluationRow>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let sql = format!(
        "SELECT {} FROM evaluations WHERE id = {} AND tenant_id = {}",
        COLUMNS,
        dialect.placeholder(1),
        dialect.placeholder(2)
    );

    sqlx::query_as::<_, EvaluationRow>(&sql)
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(executor)
        .await
}

/// Write `row` if the stored version is still `row.version`, bumping it.
///
/// Returns false when another writer got there first.
pub async fn update_versioned<'e, E>(
    executor: E,
    dialect: Dialect,
    row: &EvaluationRow,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let p = |n| dialect.placeholder(n);
    let sql = format!(
        "UPDATE evaluations \
         SET status = {}, experiment_id = {}, entity = {}, updated_at = {}, \
         version = version + 1 \
         WHERE id = {} AND tenant_id = {} AND version = {}",
        p(1),
        p(2),
        p(3),
        p(4),
        p(5),
        p(6),
        p(7)
    );

    let result = sqlx::query(&sql)
        .bind(&row.status)
        .bind(&row.experiment_id)
        .bind(&row.entity)
        .bind(&row.updated_at)
        .bind(&row.id)
        .bind(&row.tenant_id)
        .bind(row.version)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn delete<'e, E>(
    executor: E,
    dialect: Dialect,
    tenant_id: &str,
    id: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let sql = format!(
        "DELETE FROM evaluations WHERE id = {} AND tenant_id = {}",
        dialect.placeholder(1),
        dialect.placeholder(2)
    );

    let result = sqlx::query(&sql)
        .bind(id)
        .bind(tenant_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count<'e, E>(
    executor: E,
    dialect: Dialect,
    tenant_id: &str,
    status: Option<&str>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let sql = format!(
        "SELECT COUNT(*) FROM evaluations {}",
        filter_clause(dialect, status)
    );

    let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(tenant_id);
    if let Some(status) = status {
        query = query.bind(status);
    }

    query.fetch_one(executor).await
}

/// One page, newest first
pub async fn list<'e, E>(
    executor: E,
    dialect: Dialect,
    tenant_id: &str,
    status: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<EvaluationRow>, sqlx::Error>
where
    E: Executor<'e, Database = Any>,
{
    let next = if status.is_some() { 3 } else { 2 };
    let sql = format!(
        "SELECT {} FROM evaluations {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
        COLUMNS,
        filter_clause(dialect, status),
        dialect.placeholder(next),
        dialect.placeholder(next + 1)
    );

    let mut query = sqlx::query_as::<_, EvaluationRow>(&sql).bind(tenant_id);
    if let Some(status) = status {
        query = query.bind(status);
    }

    query.bind(limit).bind(offset).fetch_all(executor).await
}
