//! Database connection and schema
//!
//! Both engines are reached through the `sqlx` Any driver. [`Dialect`] holds
//! every difference between them.

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::str::FromStr;
use std::time::Duration;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// SQL flavour of the configured engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Prefix every connection URL for this engine starts with
    pub fn url_scheme(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite:",
            Dialect::Postgres => "postgres",
        }
    }

    /// Bind parameter number `n` (1-based)
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Postgres => format!("${}", n),
        }
    }

    /// Whether `err` is lock contention that a retried transaction can win
    ///
    /// SQLite reports busy or locked databases (any extended code of
    /// `SQLITE_BUSY` or `SQLITE_LOCKED`); Postgres reports serialization
    /// failures and deadlocks.
    pub fn is_write_conflict(self, err: &sqlx::Error) -> bool {
        let sqlx::Error::Database(db_err) = err else {
            return false;
        };
        let code = db_err.code();
        match self {
            Dialect::Sqlite => {
                code.and_then(|code| code.parse::<i32>().ok())
                    .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                    || db_err.message().contains("database is locked")
            }
            Dialect::Postgres => matches!(code.as_deref(), Some("40001" | "40P01")),
        }
    }

    /// Writers this engine accepts at once; SQLite has a single write lock
    pub fn concurrent_writers(self) -> usize {
        match self {
            Dialect::Sqlite => 1,
            Dialect::Postgres => 64,
        }
    }

    /// Idempotent schema statements, run in order
    pub fn schema(self) -> [&'static str; 3] {
        let table = match self {
            Dialect::Sqlite => {
                r#"
                CREATE TABLE IF NOT EXISTS evaluations (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    experiment_id TEXT,
                    entity TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1
                )
                "#
            }
            Dialect::Postgres => {
                r#"
                CREATE TABLE IF NOT EXISTS evaluations (
                    id VARCHAR(36) PRIMARY KEY,
                    tenant_id VARCHAR(255) NOT NULL,
                    status VARCHAR(50) NOT NULL,
                    experiment_id VARCHAR(255),
                    entity TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    version BIGINT NOT NULL DEFAULT 1
                )
                "#
            }
        };

        [
            table,
            "CREATE INDEX IF NOT EXISTS idx_evaluations_tenant_status \
             ON evaluations(tenant_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_evaluations_created_at \
             ON evaluations(created_at DESC)",
        ]
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(format!("unsupported database driver '{}'", other)),
        }
    }
}

/// Pool sizing
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open_conns: 10,
            max_idle_conns: 0,
            conn_max_lifetime: Duration::from_secs(1800),
        }
    }
}

pub async fn create_pool(
    database_url: &str,
    settings: &PoolSettings,
) -> Result<AnyPool, sqlx::Error> {
    sqlx::any::install_default_drivers();

    AnyPoolOptions::new()
        .max_connections(settings.max_open_conns)
        .min_connections(settings.max_idle_conns)
        .max_lifetime(settings.conn_max_lifetime)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Round-trip to the database, bounded to one second
pub async fn ping(pool: &AnyPool) -> Result<(), sqlx::Error> {
    let query = sqlx::query("SELECT 1").execute(pool);
    match tokio::time::timeout(Duration::from_secs(1), query).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(sqlx::Error::PoolTimedOut),
    }
}

pub async fn run_migrations(pool: &AnyPool, dialect: Dialect) -> Result<(), sqlx::Error> {
    for statement in dialect.schema() {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
