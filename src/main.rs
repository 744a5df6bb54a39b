use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use sqlconv::batch::verify::verify_url_from;
use sqlconv::batch::{
    convert_stored_rows, start_verification, BatchSettings, BatchState, ConversionJob,
    ProgressObserver, VerificationJob,
};
use sqlconv::config::{AppConfig, CliArgs, Command, DbSettings, RunArgs};
use sqlconv::db::StoreTarget;
use sqlconv::inference::{registry::ModelRegistry, run_inference_server, InferenceState};
use sqlconv::ingest;
use sqlconv::util::logging::init_tracing;
use sqlconv::web::{self, state::AppState};

/// Writes batch progress to the log for headless runs.
struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_state(&self, state: &BatchState, label: Option<&str>) {
        match (state, label) {
            (BatchState::Running { .. }, Some(label)) => info!("{}", label),
            (BatchState::Aborted { reason }, _) => error!("Aborted: {}", reason),
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // POSTGRES_HOST/POSTGRES_PORT usually come from .env
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Initialize logging
    init_tracing(config.log_format);

    let db_settings = DbSettings::from_env();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db_settings).await,
        Command::Inference => inference(config).await,
        Command::Convert(run) => convert(&config, db_settings, &run).await,
        Command::Verify(run) => verify(&config, db_settings, &run).await,
        Command::Import { file, db } => {
            let rows = ingest::load_source_file(&file)?;

            let target = StoreTarget::from_config(&config.database, db_settings)?;
            let store = target.open(&db.credentials()).await?;
            let stored = store.insert_source_rows(&rows).await?;
            info!(
                "Imported {} rows from {} into {}",
                stored.len(),
                file.display(),
                config.database.source_table
            );
            Ok(())
        }
        Command::Template { out } => {
            let bytes = match out.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("csv") => ingest::csv::template_csv()?,
                _ => ingest::xlsx::template_xlsx()?,
            };
            std::fs::write(&out, bytes)?;
            info!("Wrote template to {}", out.display());
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, db_settings: DbSettings) -> Result<(), Box<dyn std::error::Error>> {
    if !db_settings.is_complete() {
        warn!("POSTGRES_HOST/POSTGRES_PORT are missing or invalid; database actions will fail");
    }

    let store = StoreTarget::from_config(&config.database, db_settings.clone())?;
    let web_config = config.web.clone();
    let app_state = Arc::new(AppState::new(config, store, db_settings));

    // Start the web server
    info!("Starting dashboard on {}:{}", web_config.host, web_config.port);
    match web::run_server(&web_config, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

async fn inference(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.llm.models.is_empty() {
        return Err("no models configured; add [[llm.models]] entries to the config file".into());
    }

    info!(
        "Serving {} model(s), default '{}'",
        config.llm.models.len(),
        config.llm.default_model
    );
    let state = Arc::new(InferenceState {
        registry: ModelRegistry::new(&config.llm),
    });
    run_inference_server(&config.inference, state).await?;
    info!("Inference endpoint stopped");
    Ok(())
}

async fn convert(
    config: &AppConfig,
    db_settings: DbSettings,
    run: &RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = StoreTarget::from_config(&config.database, db_settings)?;
    let credentials = run.db.credentials();

    let job = ConversionJob {
        target: &target,
        credentials: &credentials,
        api_url: &run.api_url,
        timeout: Duration::from_secs(config.endpoint.batch_timeout_secs),
        settings: BatchSettings {
            max_retries: config.endpoint.max_retries,
            ..Default::default()
        },
    };
    let outcome = convert_stored_rows(job, &LogProgress).await?;

    for result in &outcome.results {
        info!(
            "id={} pass={}{}: {}",
            result.src_obj_id,
            result.pass_no,
            if result.degraded { " (empty)" } else { "" },
            result.response
        );
    }
    for err in &outcome.errors {
        warn!("{}", err);
    }
    info!(
        "Stored {} results, {} rows failed",
        outcome.results.len(),
        outcome.errors.len()
    );
    Ok(())
}

async fn verify(
    config: &AppConfig,
    db_settings: DbSettings,
    run: &RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = StoreTarget::from_config(&config.database, db_settings)?;
    let credentials = run.db.credentials();
    let verify_url = verify_url_from(&run.api_url);

    let job = VerificationJob {
        target: &target,
        credentials: &credentials,
        verify_url: &verify_url,
        timeout: Duration::from_secs(config.endpoint.batch_timeout_secs),
        settings: BatchSettings {
            max_retries: config.endpoint.max_retries,
            ..Default::default()
        },
    };
    let outcome = start_verification(job, &LogProgress).await?;

    for pair in &outcome.results {
        info!("id={}: {}", pair.id, pair.verify_result);
    }
    for err in &outcome.errors {
        warn!("{}", err);
    }
    Ok(())
}

