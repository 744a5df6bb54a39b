use axum::{extract::State, response::Html};
use minijinja::context;
use std::sync::Arc;

use crate::llm::models::GenerationOptions;
use crate::web::state::AppState;
use crate::web::templates::render_template;

// Main UI entry point
pub async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    let settings = &state.db_settings;
    let requires_credentials = state.store.requires_credentials();
    let db_target = match (&settings.host, settings.port) {
        _ if !requires_credentials => state.config.database.path.clone(),
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        _ => String::new(),
    };

    Html(render_template(
        &state.template_env,
        "index.html",
        context! {
            version => env!("CARGO_PKG_VERSION"),
            db_ready => !requires_credentials || settings.is_complete(),
            db_target => db_target,
            requires_credentials => requires_credentials,
            options => GenerationOptions::default(),
        },
    ))
}
