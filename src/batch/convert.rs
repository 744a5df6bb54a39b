use crate::batch::endpoint::{fetch_response_text, EndpointClient, InferenceEndpoint};
use crate::batch::request::build_request;
use crate::batch::{BatchError, BatchOutcome, BatchSettings, BatchState, ProgressObserver, RowError};
use crate::db::models::{ConversionResult, NewConversionResult, SourceRow};
use crate::db::{ConversionStore, DbCredentials, StoreTarget};
use chrono::Utc;
use std::borrow::Cow;
use std::time::Duration;
use tracing::{error, info, warn};

/// Everything a conversion run needs besides the rows themselves.
pub struct ConversionJob<'a> {
    pub target: &'a StoreTarget,
    pub credentials: &'a DbCredentials,
    pub api_url: &'a str,
    pub timeout: Duration,
    pub settings: BatchSettings,
}

/// Validates the job, opens one store session and converts `rows`.
///
/// Any failure before the first row marks the run aborted; failures of
/// individual rows end up in the outcome instead.
pub async fn start_conversion(
    job: ConversionJob<'_>,
    rows: &[SourceRow],
    observer: &dyn ProgressObserver,
) -> Result<BatchOutcome<ConversionResult>, BatchError> {
    convert_with(job, Some(rows), observer).await
}

/// Same as [`start_conversion`], reading the source rows through the run's
/// own session.
pub async fn convert_stored_rows(
    job: ConversionJob<'_>,
    observer: &dyn ProgressObserver,
) -> Result<BatchOutcome<ConversionResult>, BatchError> {
    convert_with(job, None, observer).await
}

async fn convert_with(
    job: ConversionJob<'_>,
    rows: Option<&[SourceRow]>,
    observer: &dyn ProgressObserver,
) -> Result<BatchOutcome<ConversionResult>, BatchError> {
    let prepared = async {
        if job.api_url.trim().is_empty() {
            return Err(BatchError::MissingUrl);
        }
        if rows.is_some_and(|rows| rows.is_empty()) {
            return Err(BatchError::NoRows);
        }
        job.settings.options.validate()?;
        job.target.preflight(job.credentials)?;
        let endpoint = EndpointClient::new(job.api_url, job.timeout)?;
        let store = job.target.open(job.credentials).await?;
        let rows = match rows {
            Some(rows) => Cow::Borrowed(rows),
            None => Cow::Owned(store.fetch_source_rows().await?),
        };
        if rows.is_empty() {
            return Err(BatchError::NoRows);
        }
        Ok((endpoint, store, rows))
    }
    .await;

    let (endpoint, store, rows) = match prepared {
        Ok(ready) => ready,
        Err(e) => {
            error!("Conversion aborted: {}", e);
            observer.on_state(&BatchState::Aborted { reason: e.to_string() }, None);
            return Err(e);
        }
    };

    info!("Converting {} rows via {}", rows.len(), endpoint.url());
    let outcome = run_conversion(store.as_ref(), &endpoint, &rows, &job.settings, observer).await;
    // the session is released here, whatever happened above
    drop(store);
    Ok(outcome)
}

/// Sends each row to the endpoint in order and stores every answer at once.
pub async fn run_conversion(
    store: &dyn ConversionStore,
    endpoint: &dyn InferenceEndpoint,
    rows: &[SourceRow],
    settings: &BatchSettings,
    observer: &dyn ProgressObserver,
) -> BatchOutcome<ConversionResult> {
    let total = rows.len();
    let mut outcome = BatchOutcome::default();

    for (offset, row) in rows.iter().enumerate() {
        let index = offset + 1;
        let label = format!("Calling API... ({}/{}) id={}", index, total, row.id);
        observer.on_state(&BatchState::Running { index, total }, Some(&label));

        let request = build_request(row, &settings.options);
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                outcome.errors.push(RowError {
                    row_id: row.id,
                    index,
                    message: format!("could not encode request: {}", e),
                });
                continue;
            }
        };

        let fetched = match fetch_response_text(endpoint, &payload, settings.max_retries).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("API call failed for id={}: {}", row.id, e);
                outcome.errors.push(RowError {
                    row_id: row.id,
                    index,
                    message: format!("API call failed: {}", e),
                });
                continue;
            }
        };

        if fetched.degraded {
            warn!("Storing empty conversion for id={} after {} attempts", row.id, fetched.attempts);
        }

        let new_result = NewConversionResult {
            src_obj_id: row.id,
            response: fetched.text,
            created_at: Utc::now().naive_utc(),
        };
        match store.insert_result(&new_result).await {
            Ok(mut stored) => {
                stored.degraded = fetched.degraded;
                outcome.results.push(stored);
            }
            Err(e) => {
                error!("Failed to store result for id={}: {}", row.id, e);
                outcome.errors.push(RowError {
                    row_id: row.id,
                    index,
                    message: format!("saving the result failed: {}", e),
                });
            }
        }
    }

    observer.on_state(&BatchState::Completed { total }, None);
    info!(
        "Conversion finished: {} stored, {} failed",
        outcome.results.len(),
        outcome.errors.len()
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::testing::{memory_store, server_error, Scripted};
    use crate::batch::{NoProgress, RecordingObserver};
    use crate::config::{AppConfig, DatabaseConfig, DbSettings, StoreBackend};
    use crate::db::models::NewSourceRow;

    async fn seeded(store: &dyn ConversionStore, sqls: &[&str]) -> Vec<SourceRow> {
        let rows: Vec<NewSourceRow> = sqls
            .iter()
            .map(|sql| NewSourceRow {
                sql_src: sql.to_string(),
                sql_length: sql.len() as i64,
                sql_modified: sql.to_string(),
            })
            .collect();
        store.insert_source_rows(&rows).await.unwrap()
    }

    #[tokio::test]
    async fn converts_and_stores_each_row() {
        let store = memory_store().await;
        let rows = seeded(&store, &["SELECT 1 FROM DUAL"]).await;
        let endpoint = Scripted::new(vec![Ok("SELECT 1;".to_string())]);
        let observer = RecordingObserver::default();

        let outcome =
            run_conversion(&store, &endpoint, &rows, &BatchSettings::default(), &observer).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].response, "SELECT 1;");
        assert_eq!(outcome.results[0].src_obj_id, rows[0].id);
        assert_eq!(outcome.results[0].pass_no, 1);
        assert_eq!(endpoint.payloads()[0]["question"], "SELECT 1 FROM DUAL");

        let pairs = store.fetch_verification_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].pg_sql, "SELECT 1;");

        assert_eq!(
            observer.states(),
            vec![
                BatchState::Running { index: 1, total: 1 },
                BatchState::Completed { total: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn failed_row_does_not_stop_the_batch() {
        let store = memory_store().await;
        let rows = seeded(
            &store,
            &["SELECT 1 FROM DUAL", "SELECT 2 FROM DUAL", "SELECT 3 FROM DUAL"],
        )
        .await;
        let endpoint = Scripted::new(vec![
            Ok("SELECT 1;".to_string()),
            Err(server_error()),
            Ok("SELECT 3;".to_string()),
        ]);
        let observer = RecordingObserver::default();

        let outcome =
            run_conversion(&store, &endpoint, &rows, &BatchSettings::default(), &observer).await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 2);
        assert_eq!(outcome.errors[0].row_id, rows[1].id);
        assert!(outcome.errors[0].message.contains("500"));

        let states = observer.states();
        assert_eq!(states.len(), 4);
        assert_eq!(states.last().map(BatchState::progress), Some(1.0));
    }

    #[tokio::test]
    async fn empty_answers_are_stored_as_degraded() {
        let store = memory_store().await;
        let rows = seeded(&store, &["SELECT 1 FROM DUAL"]).await;
        let endpoint = Scripted::new(vec![]);
        let settings = BatchSettings {
            max_retries: 1,
            ..Default::default()
        };

        let outcome = run_conversion(&store, &endpoint, &rows, &settings, &NoProgress).await;

        assert_eq!(endpoint.calls(), 2);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].degraded);
        assert_eq!(outcome.results[0].response, "");
    }

    #[tokio::test]
    async fn repeated_runs_add_passes() {
        let store = memory_store().await;
        let rows = seeded(&store, &["SELECT SYSDATE FROM DUAL"]).await;
        let endpoint = Scripted::new(vec![
            Ok("SELECT now();".to_string()),
            Ok("SELECT CURRENT_TIMESTAMP;".to_string()),
        ]);
        let settings = BatchSettings::default();

        run_conversion(&store, &endpoint, &rows, &settings, &NoProgress).await;
        let second = run_conversion(&store, &endpoint, &rows, &settings, &NoProgress).await;

        assert_eq!(second.results[0].pass_no, 2);
        let pairs = store.fetch_verification_pairs().await.unwrap();
        assert_eq!(pairs[0].pg_sql, "SELECT CURRENT_TIMESTAMP;");
    }

    fn duckdb_target() -> StoreTarget {
        let config = DatabaseConfig {
            backend: StoreBackend::Duckdb,
            path: ":memory:".to_string(),
            ..AppConfig::default().database
        };
        StoreTarget::from_config(&config, DbSettings::default()).unwrap()
    }

    fn one_row() -> Vec<SourceRow> {
        vec![SourceRow {
            id: 1,
            sql_src: "SELECT 1 FROM DUAL".to_string(),
            sql_length: 18,
            sql_modified: "SELECT 1 FROM DUAL".to_string(),
        }]
    }

    #[tokio::test]
    async fn missing_url_aborts_before_any_call() {
        let target = duckdb_target();
        let rows = one_row();
        let observer = RecordingObserver::default();
        let job = ConversionJob {
            target: &target,
            credentials: &DbCredentials::default(),
            api_url: "  ",
            timeout: Duration::from_secs(1),
            settings: BatchSettings::default(),
        };

        let err = start_conversion(job, &rows, &observer).await.unwrap_err();
        assert!(matches!(err, BatchError::MissingUrl));
        assert!(matches!(observer.states().as_slice(), [BatchState::Aborted { .. }]));
    }

    #[tokio::test]
    async fn out_of_range_options_abort() {
        let target = duckdb_target();
        let rows = one_row();
        let mut settings = BatchSettings::default();
        settings.options.top_p = 1.5;
        let job = ConversionJob {
            target: &target,
            credentials: &DbCredentials::default(),
            api_url: "http://127.0.0.1:9/generate",
            timeout: Duration::from_secs(1),
            settings,
        };

        let err = start_conversion(job, &rows, &NoProgress).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn empty_store_aborts_a_stored_rows_run() {
        let target = duckdb_target();
        let observer = RecordingObserver::default();
        let job = ConversionJob {
            target: &target,
            credentials: &DbCredentials::default(),
            api_url: "http://127.0.0.1:9/generate",
            timeout: Duration::from_secs(1),
            settings: BatchSettings::default(),
        };

        let err = convert_stored_rows(job, &observer).await.unwrap_err();
        assert!(matches!(err, BatchError::NoRows));
        assert!(matches!(observer.states().as_slice(), [BatchState::Aborted { .. }]));
    }
}
