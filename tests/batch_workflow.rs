mod common;

use common::{duckdb_config, duckdb_target, spawn_stub, StubReply};
use sqlconv::batch::{
    convert_stored_rows, start_conversion, start_verification, BatchError, BatchSettings,
    BatchState, ConversionJob, RecordingObserver, VerificationJob,
};
use sqlconv::db::DbCredentials;
use sqlconv::ingest;
use std::time::Duration;

fn job<'a>(
    target: &'a sqlconv::db::StoreTarget,
    credentials: &'a DbCredentials,
    api_url: &'a str,
) -> ConversionJob<'a> {
    ConversionJob {
        target,
        credentials,
        api_url,
        timeout: Duration::from_secs(10),
        settings: BatchSettings::default(),
    }
}

#[tokio::test]
async fn template_row_is_converted_and_stored() {
    let dir = tempfile::tempdir().unwrap();
    let config = duckdb_config(dir.path());
    let target = duckdb_target(&config);
    let credentials = DbCredentials::default();

    // Fill in the downloadable template the way an operator would.
    let mut sheet = ingest::csv::template_csv().unwrap();
    sheet.extend_from_slice(b"SELECT 1 FROM DUAL,19,SELECT 1 FROM DUAL\n");
    let rows = ingest::load_source_rows("sql_conversion_template.csv", &sheet).unwrap();

    let store = target.open(&credentials).await.unwrap();
    let stored = store.insert_source_rows(&rows).await.unwrap();
    drop(store);

    let (base, stub) = spawn_stub(vec![StubReply::json_response("```sql\nSELECT 1;\n```")]).await;
    let api_url = format!("{}/generate", base);
    let observer = RecordingObserver::default();

    let outcome = start_conversion(job(&target, &credentials, &api_url), &stored, &observer)
        .await
        .unwrap();

    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].response, "SELECT 1;");
    assert_eq!(outcome.results[0].src_obj_id, stored[0].id);
    assert_eq!(stub.requests()[0]["question"], "SELECT 1 FROM DUAL");

    let store = target.open(&credentials).await.unwrap();
    let pairs = store.fetch_verification_pairs().await.unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].id, stored[0].id);
    assert_eq!(pairs[0].pg_sql, "SELECT 1;");
}

#[tokio::test]
async fn server_error_on_one_row_is_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = duckdb_config(dir.path());
    let target = duckdb_target(&config);
    let credentials = DbCredentials::default();

    let sheet = b"sql_src,sql_length,sql_modified\n\
        SELECT 1 FROM DUAL,18,SELECT 1 FROM DUAL\n\
        SELECT 2 FROM DUAL,18,SELECT 2 FROM DUAL\n\
        SELECT 3 FROM DUAL,18,SELECT 3 FROM DUAL\n";
    let rows = ingest::load_source_rows("rows.csv", sheet).unwrap();
    let stored = target
        .open(&credentials)
        .await
        .unwrap()
        .insert_source_rows(&rows)
        .await
        .unwrap();

    let (base, _stub) = spawn_stub(vec![
        StubReply::json_response("SELECT 1;"),
        StubReply::status(500),
        StubReply::json_response("SELECT 3;"),
    ])
    .await;
    let api_url = format!("{}/generate", base);
    let observer = RecordingObserver::default();

    let outcome = start_conversion(job(&target, &credentials, &api_url), &stored, &observer)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].index, 2);
    assert_eq!(outcome.errors[0].row_id, stored[1].id);
    assert!(outcome.errors[0].to_string().contains("500"));

    let states = observer.states();
    let completed: Vec<_> = states
        .iter()
        .filter(|s| matches!(s, BatchState::Completed { .. }))
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(states.last().map(BatchState::progress), Some(1.0));
}

#[tokio::test]
async fn empty_answers_are_retried_then_stored() {
    let dir = tempfile::tempdir().unwrap();
    let config = duckdb_config(dir.path());
    let target = duckdb_target(&config);
    let credentials = DbCredentials::default();
    let rows = ingest::load_source_rows(
        "rows.csv",
        b"sql_src,sql_length,sql_modified\nSELECT 1 FROM DUAL,18,SELECT 1 FROM DUAL\n",
    )
    .unwrap();
    let stored = target
        .open(&credentials)
        .await
        .unwrap()
        .insert_source_rows(&rows)
        .await
        .unwrap();

    let (base, stub) = spawn_stub(vec![]).await;
    let api_url = format!("{}/generate", base);
    let outcome = start_conversion(
        job(&target, &credentials, &api_url),
        &stored,
        &RecordingObserver::default(),
    )
    .await
    .unwrap();

    assert_eq!(stub.requests().len(), 3);
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results[0].degraded);
}

#[tokio::test]
async fn no_rows_aborts_without_calling_the_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = duckdb_config(dir.path());
    let target = duckdb_target(&config);
    let credentials = DbCredentials::default();
    let (base, stub) = spawn_stub(vec![]).await;
    let api_url = format!("{}/generate", base);
    let observer = RecordingObserver::default();

    let err = start_conversion(job(&target, &credentials, &api_url), &[], &observer)
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::NoRows));
    assert!(stub.requests().is_empty());
    assert!(matches!(observer.states().as_slice(), [BatchState::Aborted { .. }]));
}

#[tokio::test]
async fn verification_judges_the_latest_pass() {
    let dir = tempfile::tempdir().unwrap();
    let config = duckdb_config(dir.path());
    let target = duckdb_target(&config);
    let credentials = DbCredentials::default();
    let rows = ingest::load_source_rows(
        "rows.csv",
        b"sql_src,sql_length,sql_modified\nSELECT SYSDATE FROM DUAL,24,SELECT SYSDATE FROM DUAL\n",
    )
    .unwrap();
    let stored = target
        .open(&credentials)
        .await
        .unwrap()
        .insert_source_rows(&rows)
        .await
        .unwrap();

    let (base, stub) = spawn_stub(vec![
        StubReply::json_response("SELECT now();"),
        StubReply::json_response("SELECT CURRENT_TIMESTAMP;"),
        StubReply::json_response("OK"),
    ])
    .await;
    let api_url = format!("{}/generate", base);
    for _ in 0..2 {
        start_conversion(
            job(&target, &credentials, &api_url),
            &stored,
            &RecordingObserver::default(),
        )
        .await
        .unwrap();
    }

    let verify_url = format!("{}/verify", base);
    let outcome = start_verification(
        VerificationJob {
            target: &target,
            credentials: &credentials,
            verify_url: &verify_url,
            timeout: Duration::from_secs(10),
            settings: BatchSettings::default(),
        },
        &RecordingObserver::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].pg_sql, "SELECT CURRENT_TIMESTAMP;");
    assert_eq!(outcome.results[0].verify_result, "OK");
    let requests = stub.requests();
    assert_eq!(requests[2]["oracle_sql"], "SELECT SYSDATE FROM DUAL");
}

#[tokio::test]
async fn headless_run_reads_rows_through_its_own_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = duckdb_config(dir.path());
    let target = duckdb_target(&config);
    let credentials = DbCredentials::default();

    let rows = ingest::load_source_rows(
        "rows.csv",
        b"sql_src,sql_length,sql_modified\nSELECT SYSDATE FROM DUAL,24,SELECT SYSDATE FROM DUAL\n",
    )
    .unwrap();
    let stored = target
        .open(&credentials)
        .await
        .unwrap()
        .insert_source_rows(&rows)
        .await
        .unwrap();

    let (base, stub) = spawn_stub(vec![StubReply::json_response("SELECT now();")]).await;
    let api_url = format!("{}/generate", base);
    let observer = RecordingObserver::default();

    let outcome = convert_stored_rows(job(&target, &credentials, &api_url), &observer)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].src_obj_id, stored[0].id);
    assert_eq!(outcome.results[0].response, "SELECT now();");
    assert_eq!(stub.requests()[0]["question"], "SELECT SYSDATE FROM DUAL");
    assert!(matches!(observer.states().last(), Some(BatchState::Completed { total: 1 })));
}
