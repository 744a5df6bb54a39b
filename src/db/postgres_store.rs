use crate::config::DbSettings;
use crate::db::models::{
    ConversionResult, NewConversionResult, NewSourceRow, SourceRow, VerificationPair,
};
use crate::db::queries::Tables;
use crate::db::{ConversionStore, DbCredentials, StoreError};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

/// One PostgreSQL connection, autocommit, closed when the store is dropped.
pub struct PostgresStore {
    client: Mutex<Client>,
    connection_task: JoinHandle<()>,
    tables: Tables,
}

impl PostgresStore {
    pub async fn connect(
        settings: &DbSettings,
        credentials: &DbCredentials,
        tables: Tables,
    ) -> Result<Self, StoreError> {
        let (Some(host), Some(port)) = (settings.host.as_deref(), settings.port) else {
            return Err(StoreError::Config(
                "POSTGRES_HOST/POSTGRES_PORT are not set".to_string(),
            ));
        };

        info!("Connecting to PostgreSQL at {}:{}/{}", host, port, credentials.dbname);
        let (client, connection) = tokio_postgres::Config::new()
            .host(host)
            .port(port)
            .dbname(&credentials.dbname)
            .user(&credentials.user)
            .password(&credentials.password)
            .connect(NoTls)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            client: Mutex::new(client),
            connection_task,
            tables,
        })
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        self.connection_task.abort();
        debug!("PostgreSQL session closed");
    }
}

fn text(row: &Row, idx: usize) -> Result<String, StoreError> {
    let value: Option<String> = row.try_get(idx)?;
    Ok(value.unwrap_or_default())
}

fn source_row(row: &Row) -> Result<SourceRow, StoreError> {
    Ok(SourceRow {
        id: row.try_get(0)?,
        sql_src: text(row, 1)?,
        sql_length: row.try_get::<_, Option<i64>>(2)?.unwrap_or_default(),
        sql_modified: text(row, 3)?,
    })
}

#[async_trait]
impl ConversionStore for PostgresStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        // CREATE ... IF NOT EXISTS needs CREATE privilege even when the
        // tables exist
        let missing: bool = client
            .query_one(
                self.tables.postgres_tables_missing(),
                &[&self.tables.source, &self.tables.result],
            )
            .await?
            .try_get(0)?;
        if !missing {
            debug!("Tables {} and {} already exist", self.tables.source, self.tables.result);
            return Ok(());
        }

        info!("Creating tables {} and {}", self.tables.source, self.tables.result);
        client.batch_execute(&self.tables.postgres_ddl()).await?;
        Ok(())
    }

    async fn insert_source_rows(&self, rows: &[NewSourceRow]) -> Result<Vec<SourceRow>, StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        let stmt = tx.prepare(&self.tables.insert_source()).await?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let inserted = tx
                .query_one(&stmt, &[&row.sql_src, &row.sql_length, &row.sql_modified])
                .await?;
            stored.push(SourceRow::from_new(inserted.try_get(0)?, row.clone()));
        }
        tx.commit().await?;

        debug!("Inserted {} source rows into {}", stored.len(), self.tables.source);
        Ok(stored)
    }

    async fn fetch_source_rows(&self) -> Result<Vec<SourceRow>, StoreError> {
        let client = self.client.lock().await;
        let rows = client.query(&self.tables.select_sources(), &[]).await?;
        rows.iter().map(source_row).collect()
    }

    async fn insert_result(
        &self,
        result: &NewConversionResult,
    ) -> Result<ConversionResult, StoreError> {
        let client = self.client.lock().await;
        let src_obj_id = result.src_obj_id.to_string();
        let pass_no: i64 = client
            .query_one(&self.tables.next_pass(), &[&src_obj_id])
            .await?
            .try_get(0)?;
        client
            .execute(
                &self.tables.insert_result(),
                &[&pass_no, &result.created_at, &result.response, &src_obj_id],
            )
            .await?;

        Ok(ConversionResult {
            src_obj_id: result.src_obj_id,
            pass_no,
            response: result.response.clone(),
            created_at: result.created_at,
            degraded: false,
        })
    }

    async fn fetch_verification_pairs(&self) -> Result<Vec<VerificationPair>, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(&self.tables.select_verification_pairs(), &[])
            .await?;
        rows.iter()
            .map(|row| {
                Ok(VerificationPair {
                    id: row.try_get(0)?,
                    oracle_sql: text(row, 1)?,
                    pg_sql: text(row, 2)?,
                })
            })
            .collect()
    }
}
