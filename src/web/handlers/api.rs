use axum::{
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::batch::endpoint::{fetch_response_text, EndpointClient, EndpointError};
use crate::batch::request::ConversionRequest;
use crate::batch::verify::verify_url_from;
use crate::batch::{
    start_conversion, start_verification, BatchError, BatchOutcome, BatchSettings, BatchState,
    ConversionJob, ProgressObserver, VerificationJob, VerifiedPair,
};
use crate::db::models::{ConversionResult, SourceRow};
use crate::db::{ConversionStore, DbCredentials, StoreError};
use crate::ingest::{self, IngestError};
use crate::llm::models::GenerationOptions;
use crate::web::state::{AppState, LoadedRows, ProgressSnapshot};

type ApiError = (StatusCode, String);

// Request types

#[derive(Debug, Default, Deserialize)]
pub struct DbRequest {
    #[serde(default)]
    pub db: DbCredentials,
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub db: DbCredentials,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRunRequest {
    #[serde(default)]
    pub api_url: String,
    /// Defaults to the `/verify` sibling of `api_url`.
    #[serde(default)]
    pub verify_url: Option<String>,
    #[serde(default)]
    pub db: DbCredentials,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub api_url: String,
    /// Defaults to the first loaded row.
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    pub format: Option<String>,
}

// Response types

#[derive(Debug, Serialize)]
pub struct RowView {
    pub id: Option<i64>,
    pub sql_src: String,
    pub sql_length: i64,
    pub sql_modified: String,
}

#[derive(Debug, Serialize)]
pub struct RowsView {
    pub source: &'static str,
    pub saved: bool,
    pub count: usize,
    pub rows: Vec<RowView>,
}

impl From<&LoadedRows> for RowsView {
    fn from(loaded: &LoadedRows) -> Self {
        let rows: Vec<RowView> = match loaded {
            LoadedRows::Empty => Vec::new(),
            LoadedRows::Staged(rows) => rows
                .iter()
                .map(|r| RowView {
                    id: None,
                    sql_src: r.sql_src.clone(),
                    sql_length: r.sql_length,
                    sql_modified: r.sql_modified.clone(),
                })
                .collect(),
            LoadedRows::Stored(rows) => rows
                .iter()
                .map(|r| RowView {
                    id: Some(r.id),
                    sql_src: r.sql_src.clone(),
                    sql_length: r.sql_length,
                    sql_modified: r.sql_modified.clone(),
                })
                .collect(),
        };

        Self {
            source: loaded.source(),
            saved: matches!(loaded, LoadedRows::Stored(_)),
            count: rows.len(),
            rows,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub question: String,
    pub response: String,
    pub attempts: u32,
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub backend: &'static str,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_ready: bool,
    pub loaded_rows: usize,
    pub batch: ProgressSnapshot,
}

// Error mapping

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Config(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        StoreError::Connection(_) => {
            error!("{}", err);
            (StatusCode::BAD_GATEWAY, err.to_string())
        }
        StoreError::Query(_) => {
            error!("{}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn endpoint_error(err: EndpointError) -> ApiError {
    match err {
        EndpointError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => (StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

fn batch_error(err: BatchError) -> ApiError {
    match err {
        BatchError::MissingUrl | BatchError::NoRows | BatchError::UnsavedRows => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        BatchError::InvalidOptions(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        BatchError::Endpoint(e) => endpoint_error(e),
        BatchError::Store(e) => store_error(e),
    }
}

fn batch_running() -> ApiError {
    (StatusCode::CONFLICT, "A batch is already running".to_string())
}

fn ingest_error(err: IngestError) -> ApiError {
    warn!("Spreadsheet rejected: {}", err);
    (StatusCode::BAD_REQUEST, err.to_string())
}

async fn open_store(
    state: &AppState,
    credentials: &DbCredentials,
) -> Result<Box<dyn ConversionStore>, ApiError> {
    state.store.open(credentials).await.map_err(store_error)
}

fn batch_settings(state: &AppState, options: GenerationOptions) -> BatchSettings {
    BatchSettings {
        options,
        max_retries: state.config.endpoint.max_retries,
    }
}

// Spreadsheet handling

pub async fn download_template(Query(query): Query<TemplateQuery>) -> Result<Response, ApiError> {
    let format = query.format.as_deref().unwrap_or("xlsx").to_ascii_lowercase();
    let (bytes, content_type) = match format.as_str() {
        "xlsx" => (
            ingest::xlsx::template_xlsx(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ),
        "csv" => (ingest::csv::template_csv(), "text/csv; charset=utf-8"),
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Unsupported template format: {}", other),
            ));
        }
    };
    let bytes = bytes.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let disposition = format!("attachment; filename=\"sql_conversion_template.{}\"", format);

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<RowsView>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, "The upload has no file name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read upload: {}", e)))?;

        info!("Parsing uploaded spreadsheet {} ({} bytes)", file_name, bytes.len());
        let rows = ingest::load_source_rows(&file_name, &bytes).map_err(ingest_error)?;

        let mut loaded = state.rows.write().await;
        *loaded = LoadedRows::Staged(rows);
        return Ok(Json(RowsView::from(&*loaded)));
    }

    Err((StatusCode::BAD_REQUEST, "Upload a spreadsheet file".to_string()))
}

// Store access

pub async fn load_rows(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DbRequest>,
) -> Result<Json<RowsView>, ApiError> {
    let store = open_store(&state, &payload.db).await?;
    let rows = store.fetch_source_rows().await.map_err(store_error)?;
    info!("Loaded {} source rows from the database", rows.len());

    let mut loaded = state.rows.write().await;
    *loaded = LoadedRows::Stored(rows);
    Ok(Json(RowsView::from(&*loaded)))
}

pub async fn save_rows(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DbRequest>,
) -> Result<Json<RowsView>, ApiError> {
    let staged = match &*state.rows.read().await {
        LoadedRows::Staged(rows) => rows.clone(),
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Load spreadsheet data first".to_string(),
            ));
        }
    };

    let store = open_store(&state, &payload.db).await?;
    let stored = store.insert_source_rows(&staged).await.map_err(store_error)?;
    info!("Saved {} spreadsheet rows to the database", stored.len());

    let mut loaded = state.rows.write().await;
    *loaded = LoadedRows::Stored(stored);
    Ok(Json(RowsView::from(&*loaded)))
}

pub async fn list_rows(State(state): State<Arc<AppState>>) -> Json<RowsView> {
    Json(RowsView::from(&*state.rows.read().await))
}

// Batch runs

pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConvertRequest>,
) -> Result<Json<BatchOutcome<ConversionResult>>, ApiError> {
    let rows: Vec<SourceRow> = match &*state.rows.read().await {
        LoadedRows::Stored(rows) => rows.clone(),
        LoadedRows::Staged(_) => {
            let err = BatchError::UnsavedRows;
            if !state.progress.try_abort(&err.to_string()) {
                return Err(batch_running());
            }
            return Err(batch_error(err));
        }
        LoadedRows::Empty => Vec::new(),
    };

    if !state.progress.try_begin(rows.len(), "Preparing API calls...") {
        return Err(batch_running());
    }

    // The run continues even if the client goes away, so the board always
    // leaves the running state.
    let task_state = Arc::clone(&state);
    let run = tokio::spawn(async move {
        let state = task_state;
        let job = ConversionJob {
            target: &state.store,
            credentials: &payload.db,
            api_url: &payload.api_url,
            timeout: Duration::from_secs(state.config.endpoint.batch_timeout_secs),
            settings: batch_settings(&state, payload.options),
        };
        start_conversion(job, &rows, &state.progress).await
    });

    match run.await {
        Ok(outcome) => outcome.map(Json).map_err(batch_error),
        Err(e) => {
            error!("Conversion task failed: {}", e);
            state
                .progress
                .on_state(&BatchState::Aborted { reason: e.to_string() }, None);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyRunRequest>,
) -> Result<Json<BatchOutcome<VerifiedPair>>, ApiError> {
    if !state.progress.try_begin(0, "Loading conversions to verify...") {
        return Err(batch_running());
    }

    let task_state = Arc::clone(&state);
    let run = tokio::spawn(async move {
        let state = task_state;
        let verify_url = payload
            .verify_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| verify_url_from(&payload.api_url));
        let job = VerificationJob {
            target: &state.store,
            credentials: &payload.db,
            verify_url: &verify_url,
            timeout: Duration::from_secs(state.config.endpoint.batch_timeout_secs),
            settings: batch_settings(&state, payload.options),
        };
        start_verification(job, &state.progress).await
    });

    match run.await {
        Ok(outcome) => outcome.map(Json).map_err(batch_error),
        Err(e) => {
            error!("Verification task failed: {}", e);
            state
                .progress
                .on_state(&BatchState::Aborted { reason: e.to_string() }, None);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// One conversion call without touching the store.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    if payload.api_url.trim().is_empty() {
        return Err(batch_error(BatchError::MissingUrl));
    }
    payload
        .options
        .validate()
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let question = match payload.question.filter(|q| !q.trim().is_empty()) {
        Some(question) => question,
        None => state
            .rows
            .read()
            .await
            .first_question()
            .ok_or_else(|| batch_error(BatchError::NoRows))?,
    };

    let endpoint = EndpointClient::new(
        &payload.api_url,
        Duration::from_secs(state.config.endpoint.preview_timeout_secs),
    )
    .map_err(endpoint_error)?;
    let request = ConversionRequest {
        question: question.clone(),
        options: payload.options,
    };
    let body = serde_json::to_value(&request)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let fetched = fetch_response_text(&endpoint, &body, state.config.endpoint.max_retries)
        .await
        .map_err(endpoint_error)?;

    Ok(Json(PreviewResponse {
        question,
        response: fetched.text,
        attempts: fetched.attempts,
        degraded: fetched.degraded,
    }))
}

pub async fn progress(State(state): State<Arc<AppState>>) -> Json<ProgressSnapshot> {
    Json(state.progress.snapshot())
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        backend: if state.store.requires_credentials() {
            "postgres"
        } else {
            "duckdb"
        },
        db_host: state.db_settings.host.clone(),
        db_port: state.db_settings.port,
        db_ready: !state.store.requires_credentials() || state.db_settings.is_complete(),
        loaded_rows: state.rows.read().await.len(),
        batch: state.progress.snapshot(),
    })
}
