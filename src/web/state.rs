use crate::batch::{BatchState, ProgressObserver};
use crate::config::{AppConfig, DbSettings};
use crate::db::models::{NewSourceRow, SourceRow};
use crate::db::StoreTarget;
use crate::web::templates::init_templates;
use minijinja::Environment;
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

/// Rows currently shown in the dashboard.
#[derive(Debug, Clone, Default)]
pub enum LoadedRows {
    #[default]
    Empty,
    /// Parsed from a spreadsheet, not stored yet.
    Staged(Vec<NewSourceRow>),
    /// Read from, or just written to, the store.
    Stored(Vec<SourceRow>),
}

impl LoadedRows {
    pub fn len(&self) -> usize {
        match self {
            LoadedRows::Empty => 0,
            LoadedRows::Staged(rows) => rows.len(),
            LoadedRows::Stored(rows) => rows.len(),
        }
    }

    /// Pre-cleaned SQL of the first row, used when a preview names no question.
    pub fn first_question(&self) -> Option<String> {
        match self {
            LoadedRows::Empty => None,
            LoadedRows::Staged(rows) => rows.first().map(|r| r.sql_modified.clone()),
            LoadedRows::Stored(rows) => rows.first().map(|r| r.sql_modified.clone()),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            LoadedRows::Empty => "none",
            LoadedRows::Staged(_) => "spreadsheet",
            LoadedRows::Stored(_) => "database",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    #[serde(flatten)]
    pub state: BatchState,
    pub progress: f64,
    pub label: Option<String>,
}

/// Latest batch state, shared between the running batch and progress polls.
pub struct ProgressBoard {
    current: Mutex<(BatchState, Option<String>)>,
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self {
            current: Mutex::new((BatchState::Idle, None)),
        }
    }
}

impl ProgressBoard {
    pub fn snapshot(&self) -> ProgressSnapshot {
        let (state, label) = self
            .current
            .lock()
            .map(|current| current.clone())
            .unwrap_or((BatchState::Idle, None));
        ProgressSnapshot {
            progress: state.progress(),
            state,
            label,
        }
    }

    /// Claims the board for a new batch. Fails while another batch runs.
    pub fn try_begin(&self, total: usize, label: &str) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        if current.0.is_running() {
            return false;
        }
        *current = (BatchState::Running { index: 0, total }, Some(label.to_string()));
        true
    }

    /// Reports a batch refused before it started. A live batch keeps the
    /// board, and the refusal is reported as a conflict instead.
    pub fn try_abort(&self, reason: &str) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        if current.0.is_running() {
            return false;
        }
        *current = (BatchState::Aborted { reason: reason.to_string() }, None);
        true
    }
}

impl ProgressObserver for ProgressBoard {
    fn on_state(&self, state: &BatchState, label: Option<&str>) {
        debug!("Batch state: {:?}", state);
        if let Ok(mut current) = self.current.lock() {
            // the status line is cleared once the batch stops
            let label = match state {
                BatchState::Running { .. } => label.map(str::to_string),
                _ => None,
            };
            *current = (state.clone(), label);
        }
    }
}

/// Shared application state for the dashboard server
pub struct AppState {
    pub config: AppConfig,
    pub store: StoreTarget,
    pub db_settings: DbSettings,
    pub template_env: Environment<'static>,
    pub rows: RwLock<LoadedRows>,
    pub progress: ProgressBoard,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, store: StoreTarget, db_settings: DbSettings) -> Self {
        Self {
            config,
            store,
            db_settings,
            template_env: init_templates(),
            rows: RwLock::new(LoadedRows::Empty),
            progress: ProgressBoard::default(),
            startup_time: chrono::Utc::now(),
        }
    }
}
