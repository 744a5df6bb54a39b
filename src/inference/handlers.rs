use crate::inference::InferenceState;
use crate::llm::models::{GenerationOptions, Prompt};
use crate::llm::LlmError;
use crate::prompts::{translation_prompt, verification_prompt};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub question: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub oracle_sql: String,
    pub pg_sql: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub default_model: String,
    pub models: Vec<String>,
}

pub async fn generate(
    State(state): State<Arc<InferenceState>>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, String)> {
    let prompt = translation_prompt(
        &payload.question,
        payload.system_prompt.as_deref().filter(|s| !s.trim().is_empty()),
        payload.user_prompt.as_deref().filter(|s| !s.trim().is_empty()),
    );
    run_generation(&state, payload.model.as_deref(), &prompt, &payload.options).await
}

pub async fn verify(
    State(state): State<Arc<InferenceState>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, String)> {
    let prompt = verification_prompt(&payload.oracle_sql, &payload.pg_sql);
    run_generation(&state, payload.model.as_deref(), &prompt, &payload.options).await
}

pub async fn list_models(State(state): State<Arc<InferenceState>>) -> Json<ModelList> {
    Json(ModelList {
        default_model: state.registry.default_model().to_string(),
        models: state.registry.model_ids(),
    })
}

async fn run_generation(
    state: &InferenceState,
    model: Option<&str>,
    prompt: &Prompt,
    options: &GenerationOptions,
) -> Result<Json<GenerateResponse>, (StatusCode, String)> {
    options
        .validate()
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let generator = state.registry.get(model).await.map_err(|e| match e {
        LlmError::ConfigError(msg) => (StatusCode::BAD_REQUEST, msg),
        other => {
            error!("Failed to load model: {}", other);
            (StatusCode::BAD_GATEWAY, other.to_string())
        }
    })?;

    debug!("Prompt user text: {}", prompt.user);
    let start = Instant::now();
    let response = generator.generate(prompt, options).await.map_err(|e| {
        error!("Generation failed: {}", e);
        (StatusCode::BAD_GATEWAY, e.to_string())
    })?;
    info!(
        "Generated {} chars in {} ms",
        response.len(),
        start.elapsed().as_millis()
    );

    Ok(Json(GenerateResponse { response }))
}
