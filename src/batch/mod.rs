//! Row-by-row conversion and verification runs against the inference endpoint.

pub mod cleaning;
pub mod convert;
pub mod endpoint;
pub mod request;
#[cfg(test)]
pub(crate) mod testing;
pub mod verify;

use crate::db::StoreError;
use crate::llm::models::{GenerationOptions, OptionsError};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

pub use convert::{convert_stored_rows, run_conversion, start_conversion, ConversionJob};
pub use verify::{run_verification, start_verification, VerificationJob, VerifiedPair};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running { index: usize, total: usize },
    Completed { total: usize },
    Aborted { reason: String },
}

impl BatchState {
    /// Share of rows already handled, 0.0..=1.0.
    pub fn progress(&self) -> f64 {
        match self {
            BatchState::Idle | BatchState::Aborted { .. } => 0.0,
            BatchState::Running { index, total } if *total > 0 => {
                (index.saturating_sub(1)) as f64 / *total as f64
            }
            BatchState::Running { .. } => 0.0,
            BatchState::Completed { .. } => 1.0,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BatchState::Running { .. })
    }
}

/// Receives state changes while a batch runs.
pub trait ProgressObserver: Send + Sync {
    fn on_state(&self, state: &BatchState, label: Option<&str>);
}

/// Discards every update.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_state(&self, _state: &BatchState, _label: Option<&str>) {}
}

/// Keeps every state it was sent, in order.
#[derive(Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<BatchState>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<BatchState> {
        self.states
            .lock()
            .map(|states| states.clone())
            .unwrap_or_default()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_state(&self, state: &BatchState, _label: Option<&str>) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state.clone());
        }
    }
}

/// Failure of a single row. The batch carries on after recording it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub row_id: i64,
    /// 1-based position in the batch.
    pub index: usize,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} (id={}): {}", self.index, self.row_id, self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome<T> {
    pub results: Vec<T>,
    pub errors: Vec<RowError>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Reasons a run stops before the first row is sent.
#[derive(Debug)]
pub enum BatchError {
    MissingUrl,
    NoRows,
    UnsavedRows,
    InvalidOptions(OptionsError),
    Endpoint(endpoint::EndpointError),
    Store(StoreError),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::MissingUrl => write!(f, "Enter the API URL"),
            BatchError::NoRows => write!(f, "Load data first"),
            BatchError::UnsavedRows => {
                write!(f, "Save the spreadsheet rows to the database before converting them")
            }
            BatchError::InvalidOptions(e) => write!(f, "{}", e),
            BatchError::Endpoint(e) => write!(f, "{}", e),
            BatchError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl Error for BatchError {}

impl From<StoreError> for BatchError {
    fn from(err: StoreError) -> Self {
        BatchError::Store(err)
    }
}

impl From<OptionsError> for BatchError {
    fn from(err: OptionsError) -> Self {
        BatchError::InvalidOptions(err)
    }
}

impl From<endpoint::EndpointError> for BatchError {
    fn from(err: endpoint::EndpointError) -> Self {
        BatchError::Endpoint(err)
    }
}

/// Knobs shared by conversion and verification runs.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub options: GenerationOptions,
    pub max_retries: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            options: GenerationOptions::default(),
            max_retries: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_only_reaches_one_when_completed() {
        assert_eq!(BatchState::Running { index: 1, total: 4 }.progress(), 0.0);
        assert_eq!(BatchState::Running { index: 4, total: 4 }.progress(), 0.75);
        assert_eq!(BatchState::Completed { total: 4 }.progress(), 1.0);
        assert_eq!(BatchState::Completed { total: 0 }.progress(), 1.0);
    }

    #[test]
    fn state_serializes_with_a_tag() {
        let json = serde_json::to_value(BatchState::Running { index: 2, total: 3 }).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["index"], 2);
    }
}
