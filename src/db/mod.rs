pub mod db_pool;
pub mod duckdb_store;
pub mod models;
pub mod postgres_store;
pub mod queries;

use crate::config::{DatabaseConfig, DbSettings, StoreBackend};
use async_trait::async_trait;
use db_pool::DuckDBConnectionManager;
use models::{ConversionResult, NewConversionResult, NewSourceRow, SourceRow, VerificationPair};
use queries::Tables;
use r2d2::Pool;
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use tracing::info;

#[derive(Debug)]
pub enum StoreError {
    /// Missing credentials, host/port or a bad table name. Raised before any I/O.
    Config(String),
    Connection(String),
    Query(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Config(msg) => write!(f, "Database configuration error: {}", msg),
            StoreError::Connection(msg) => write!(f, "Database connection failed: {}", msg),
            StoreError::Query(msg) => write!(f, "Database query failed: {}", msg),
        }
    }
}

impl Error for StoreError {}

impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

/// Per-session login entered by the operator. Never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbCredentials {
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl DbCredentials {
    pub fn is_complete(&self) -> bool {
        !self.dbname.trim().is_empty() && !self.user.trim().is_empty() && !self.password.is_empty()
    }
}

/// Source rows in, conversion results out. Every insert commits on its own.
#[async_trait]
pub trait ConversionStore: Send + Sync {
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Bulk insert; returns the rows with their assigned ids, in input order.
    async fn insert_source_rows(&self, rows: &[NewSourceRow]) -> Result<Vec<SourceRow>, StoreError>;

    async fn fetch_source_rows(&self) -> Result<Vec<SourceRow>, StoreError>;

    /// Single-row insert with the next pass number for the source id.
    async fn insert_result(&self, result: &NewConversionResult)
        -> Result<ConversionResult, StoreError>;

    async fn fetch_verification_pairs(&self) -> Result<Vec<VerificationPair>, StoreError>;
}

/// Where sessions are opened from. One session is held per action and
/// released when dropped.
#[derive(Clone)]
pub enum StoreTarget {
    Postgres {
        settings: DbSettings,
        tables: Tables,
    },
    DuckDb {
        pool: Pool<DuckDBConnectionManager>,
        tables: Tables,
    },
}

impl StoreTarget {
    pub fn from_config(config: &DatabaseConfig, settings: DbSettings) -> Result<Self, StoreError> {
        let tables = Tables::new(&config.source_table, &config.result_table)?;
        match config.backend {
            StoreBackend::Postgres => Ok(StoreTarget::Postgres { settings, tables }),
            StoreBackend::Duckdb => {
                info!("Initializing DuckDB connection pool at {}", config.path);
                let manager = DuckDBConnectionManager::new(&config.path)
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                let pool = Pool::builder()
                    .max_size(config.pool_size.max(1) as u32)
                    .build(manager)
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                Ok(StoreTarget::DuckDb { pool, tables })
            }
        }
    }

    /// Checks everything that can be checked without touching the network.
    pub fn preflight(&self, credentials: &DbCredentials) -> Result<(), StoreError> {
        match self {
            StoreTarget::Postgres { settings, .. } => {
                if !credentials.is_complete() {
                    return Err(StoreError::Config(
                        "enter the database name, user and password".to_string(),
                    ));
                }
                if !settings.is_complete() {
                    return Err(StoreError::Config(
                        "POSTGRES_HOST/POSTGRES_PORT are missing or the port is not a number"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            StoreTarget::DuckDb { .. } => Ok(()),
        }
    }

    /// Needs operator credentials before a session can be opened.
    pub fn requires_credentials(&self) -> bool {
        matches!(self, StoreTarget::Postgres { .. })
    }

    pub async fn open(
        &self,
        credentials: &DbCredentials,
    ) -> Result<Box<dyn ConversionStore>, StoreError> {
        self.preflight(credentials)?;
        let store: Box<dyn ConversionStore> = match self {
            StoreTarget::Postgres { settings, tables } => Box::new(
                postgres_store::PostgresStore::connect(settings, credentials, tables.clone())
                    .await?,
            ),
            StoreTarget::DuckDb { pool, tables } => Box::new(
                duckdb_store::DuckDbStore::checkout(pool, tables.clone()).await?,
            ),
        };
        store.ensure_schema().await?;
        Ok(store)
    }
}
