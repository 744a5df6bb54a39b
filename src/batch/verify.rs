use crate::batch::endpoint::{fetch_response_text, EndpointClient, InferenceEndpoint};
use crate::batch::request::build_verify_request;
use crate::batch::{BatchError, BatchOutcome, BatchSettings, BatchState, ProgressObserver, RowError};
use crate::db::models::VerificationPair;
use crate::db::{DbCredentials, StoreTarget};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// A verification pair with the model's judgment. Display only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedPair {
    pub id: i64,
    pub oracle_sql: String,
    pub pg_sql: String,
    pub verify_result: String,
}

pub struct VerificationJob<'a> {
    pub target: &'a StoreTarget,
    pub credentials: &'a DbCredentials,
    pub verify_url: &'a str,
    pub timeout: Duration,
    pub settings: BatchSettings,
}

/// Maps a `.../generate` URL onto its `.../verify` sibling.
/// Any other URL is returned unchanged.
pub fn verify_url_from(generate_url: &str) -> String {
    let trimmed = generate_url.trim().trim_end_matches('/');
    match trimmed.strip_suffix("/generate") {
        Some(base) => format!("{}/verify", base),
        None => trimmed.to_string(),
    }
}

/// Opens a store session, reads the latest result of every source row and
/// asks the endpoint to judge each pair.
pub async fn start_verification(
    job: VerificationJob<'_>,
    observer: &dyn ProgressObserver,
) -> Result<BatchOutcome<VerifiedPair>, BatchError> {
    let prepared = async {
        if job.verify_url.trim().is_empty() {
            return Err(BatchError::MissingUrl);
        }
        job.settings.options.validate()?;
        job.target.preflight(job.credentials)?;
        let endpoint = EndpointClient::new(job.verify_url, job.timeout)?;
        let store = job.target.open(job.credentials).await?;
        let pairs = store.fetch_verification_pairs().await?;
        if pairs.is_empty() {
            return Err(BatchError::NoRows);
        }
        Ok((endpoint, pairs))
    }
    .await;

    let (endpoint, pairs) = match prepared {
        Ok(ready) => ready,
        Err(e) => {
            error!("Verification aborted: {}", e);
            observer.on_state(&BatchState::Aborted { reason: e.to_string() }, None);
            return Err(e);
        }
    };

    info!("Verifying {} conversions via {}", pairs.len(), endpoint.url());
    Ok(run_verification(&endpoint, &pairs, &job.settings, observer).await)
}

/// Sends each pair to the verify endpoint in order. Nothing is persisted.
pub async fn run_verification(
    endpoint: &dyn InferenceEndpoint,
    pairs: &[VerificationPair],
    settings: &BatchSettings,
    observer: &dyn ProgressObserver,
) -> BatchOutcome<VerifiedPair> {
    let total = pairs.len();
    let mut outcome = BatchOutcome::default();

    for (offset, pair) in pairs.iter().enumerate() {
        let index = offset + 1;
        let label = format!("Verifying... ({}/{}) id={}", index, total, pair.id);
        observer.on_state(&BatchState::Running { index, total }, Some(&label));

        let request = build_verify_request(pair, &settings.options);
        let result = match serde_json::to_value(&request) {
            Ok(payload) => fetch_response_text(endpoint, &payload, settings.max_retries)
                .await
                .map_err(|e| format!("API call failed: {}", e)),
            Err(e) => Err(format!("could not encode request: {}", e)),
        };

        match result {
            Ok(fetched) => {
                if fetched.degraded {
                    warn!("Empty verification for id={} after {} attempts", pair.id, fetched.attempts);
                }
                outcome.results.push(VerifiedPair {
                    id: pair.id,
                    oracle_sql: pair.oracle_sql.clone(),
                    pg_sql: pair.pg_sql.clone(),
                    verify_result: fetched.text,
                });
            }
            Err(message) => {
                warn!("Verification failed for id={}: {}", pair.id, message);
                outcome.errors.push(RowError {
                    row_id: pair.id,
                    index,
                    message,
                });
            }
        }
    }

    observer.on_state(&BatchState::Completed { total }, None);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::testing::{server_error, Scripted};
    use crate::batch::RecordingObserver;

    fn pair(id: i64) -> VerificationPair {
        VerificationPair {
            id,
            oracle_sql: "SELECT NVL(a, 0) FROM t".to_string(),
            pg_sql: "SELECT COALESCE(a, 0) FROM t".to_string(),
        }
    }

    #[test]
    fn verify_url_follows_generate_url() {
        assert_eq!(
            verify_url_from("http://localhost:8000/generate"),
            "http://localhost:8000/verify"
        );
        assert_eq!(
            verify_url_from(" http://localhost:8000/generate/ "),
            "http://localhost:8000/verify"
        );
        assert_eq!(
            verify_url_from("http://localhost:8000/check"),
            "http://localhost:8000/check"
        );
    }

    #[tokio::test]
    async fn judgments_are_collected_per_pair() {
        let endpoint = Scripted::new(vec![
            Ok("```\nEquivalent.\n```".to_string()),
            Err(server_error()),
        ]);
        let observer = RecordingObserver::default();

        let outcome = run_verification(
            &endpoint,
            &[pair(1), pair(2)],
            &BatchSettings::default(),
            &observer,
        )
        .await;

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].verify_result, "Equivalent.");
        assert_eq!(outcome.errors[0].row_id, 2);
        assert_eq!(endpoint.payloads()[0]["pg_sql"], "SELECT COALESCE(a, 0) FROM t");
        assert_eq!(
            observer.states().last(),
            Some(&BatchState::Completed { total: 2 })
        );
    }
}
