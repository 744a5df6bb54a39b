use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::models::{
    ConversionResult, NewConversionResult, NewSourceRow, SourceRow, VerificationPair,
};
use crate::db::queries::Tables;
use crate::db::{ConversionStore, StoreError};
use async_trait::async_trait;
use duckdb::params;
use r2d2::{Pool, PooledConnection};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A session holding one pooled DuckDB connection for its whole lifetime.
pub struct DuckDbStore {
    conn: Arc<Mutex<PooledConnection<DuckDBConnectionManager>>>,
    tables: Tables,
}

impl DuckDbStore {
    pub async fn checkout(
        pool: &Pool<DuckDBConnectionManager>,
        tables: Tables,
    ) -> Result<Self, StoreError> {
        let pool = pool.clone();
        let conn = tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            tables,
        })
    }

    // DuckDB is synchronous; every call runs on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut duckdb::Connection, &Tables) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let tables = self.tables.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Connection("DuckDB connection lock poisoned".to_string()))?;
            f(&mut **guard, &tables)
        })
        .await
        .map_err(|e| StoreError::Query(format!("DuckDB task failed: {}", e)))?
    }
}

#[async_trait]
impl ConversionStore for DuckDbStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn, tables| {
            conn.execute_batch(&tables.duckdb_ddl())?;
            Ok(())
        })
        .await
    }

    async fn insert_source_rows(&self, rows: &[NewSourceRow]) -> Result<Vec<SourceRow>, StoreError> {
        let rows = rows.to_vec();
        self.with_conn(move |conn, tables| {
            let tx = conn.transaction()?;
            let mut stored = Vec::with_capacity(rows.len());
            {
                let mut stmt = tx.prepare(&tables.insert_source())?;
                for row in rows {
                    let id: i64 = stmt.query_row(
                        params![row.sql_src, row.sql_length, row.sql_modified],
                        |r| r.get(0),
                    )?;
                    stored.push(SourceRow::from_new(id, row));
                }
            }
            tx.commit()?;
            debug!("Inserted {} source rows into {}", stored.len(), tables.source);
            Ok(stored)
        })
        .await
    }

    async fn fetch_source_rows(&self) -> Result<Vec<SourceRow>, StoreError> {
        self.with_conn(|conn, tables| {
            let mut stmt = conn.prepare(&tables.select_sources())?;
            let rows = stmt.query_map([], |row| {
                Ok(SourceRow {
                    id: row.get(0)?,
                    sql_src: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    sql_length: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
                    sql_modified: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })?;
            let rows: Result<Vec<SourceRow>, _> = rows.collect();
            Ok(rows?)
        })
        .await
    }

    async fn insert_result(
        &self,
        result: &NewConversionResult,
    ) -> Result<ConversionResult, StoreError> {
        let result = result.clone();
        self.with_conn(move |conn, tables| {
            let src_obj_id = result.src_obj_id.to_string();
            let pass_no: i64 =
                conn.query_row(&tables.next_pass(), params![src_obj_id], |row| row.get(0))?;
            conn.execute(
                &tables.insert_result(),
                params![pass_no, result.created_at, result.response, src_obj_id],
            )?;
            Ok(ConversionResult {
                src_obj_id: result.src_obj_id,
                pass_no,
                response: result.response,
                created_at: result.created_at,
                degraded: false,
            })
        })
        .await
    }

    async fn fetch_verification_pairs(&self) -> Result<Vec<VerificationPair>, StoreError> {
        self.with_conn(|conn, tables| {
            let mut stmt = conn.prepare(&tables.select_verification_pairs())?;
            let rows = stmt.query_map([], |row| {
                Ok(VerificationPair {
                    id: row.get(0)?,
                    oracle_sql: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    pg_sql: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?;
            let pairs: Result<Vec<VerificationPair>, _> = rows.collect();
            Ok(pairs?)
        })
        .await
    }
}
