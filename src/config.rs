use crate::db::DbCredentials;
use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the PostgreSQL host.
pub const POSTGRES_HOST_VAR: &str = "POSTGRES_HOST";
/// Environment variable holding the PostgreSQL port.
pub const POSTGRES_PORT_VAR: &str = "POSTGRES_PORT";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Duckdb,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    /// DuckDB file used when `backend = "duckdb"`.
    pub path: String,
    pub pool_size: usize,
    pub source_table: String,
    pub result_table: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    /// Additional attempts made when the endpoint answers with empty text.
    pub max_retries: u32,
    pub batch_timeout_secs: u64,
    pub preview_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub id: String,
    pub backend: String, // "ollama" or "remote"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub default_model: String,
    pub models: Vec<ModelConfig>,
}

impl LlmConfig {
    pub fn find(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub inference: WebConfig,
    pub endpoint: EndpointConfig,
    pub llm: LlmConfig,
    pub log_format: LogFormat,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dashboard and its JSON API (default)
    Serve,
    /// Run the /generate and /verify inference endpoint
    Inference,
    /// Convert every stored source row through the inference endpoint
    Convert(RunArgs),
    /// Ask the inference endpoint to verify the latest conversions
    Verify(RunArgs),
    /// Validate a spreadsheet and insert its rows into the source table
    Import {
        file: PathBuf,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Write a blank spreadsheet template (.xlsx or .csv)
    Template { out: PathBuf },
}

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    #[arg(long, env = "SQLCONV_DB_NAME")]
    pub dbname: Option<String>,
    #[arg(long, env = "SQLCONV_DB_USER")]
    pub user: Option<String>,
    #[arg(long, env = "SQLCONV_DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl DbArgs {
    pub fn credentials(&self) -> DbCredentials {
        DbCredentials {
            dbname: self.dbname.clone().unwrap_or_default(),
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Full endpoint URL, e.g. http://localhost:8000/generate
    #[arg(long)]
    pub api_url: String,
    #[command(flatten)]
    pub db: DbArgs,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with default configuration
        let mut config_builder = Self::with_defaults(Config::builder())?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/sqlconv/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("SQLCONV")
                .prefix_separator("__")
                .separator("__"),
        );

        // Build the config
        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        let target = match args.command {
            Some(Command::Inference) => &mut config.inference,
            _ => &mut config.web,
        };
        if let Some(host) = &args.host {
            target.host = host.clone();
        }
        if let Some(port) = args.port {
            target.port = port;
        }

        if config.llm.find(&config.llm.default_model).is_none() && !config.llm.models.is_empty() {
            return Err(ConfigError::Message(format!(
                "default model '{}' is not listed in llm.models",
                config.llm.default_model
            )));
        }

        Ok(config)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = AppConfig::default();
        builder
            .set_default("database.backend", "postgres")?
            .set_default("database.path", defaults.database.path)?
            .set_default("database.pool_size", defaults.database.pool_size as i64)?
            .set_default("database.source_table", defaults.database.source_table)?
            .set_default("database.result_table", defaults.database.result_table)?
            .set_default("web.host", defaults.web.host)?
            .set_default("web.port", defaults.web.port as i64)?
            .set_default("inference.host", defaults.inference.host)?
            .set_default("inference.port", defaults.inference.port as i64)?
            .set_default("endpoint.max_retries", defaults.endpoint.max_retries as i64)?
            .set_default(
                "endpoint.batch_timeout_secs",
                defaults.endpoint.batch_timeout_secs as i64,
            )?
            .set_default(
                "endpoint.preview_timeout_secs",
                defaults.endpoint.preview_timeout_secs as i64,
            )?
            .set_default("llm.default_model", defaults.llm.default_model)?
            .set_default("llm.models", Vec::<config::Value>::new())?
            .set_default("log_format", "text")
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                backend: StoreBackend::Postgres,
                path: "sqlconv.duckdb".to_string(),
                pool_size: 2,
                source_table: "sql_obj_dtl".to_string(),
                result_table: "sql_chg_result".to_string(),
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8501,
            },
            inference: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            endpoint: EndpointConfig {
                max_retries: 2,
                batch_timeout_secs: 600,
                preview_timeout_secs: 60,
            },
            llm: LlmConfig {
                default_model: "xiyan-sql-qwencoder-32b".to_string(),
                models: Vec::new(),
            },
            log_format: LogFormat::Text,
        }
    }
}

/// Host and port of the PostgreSQL server, taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl DbSettings {
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var(POSTGRES_HOST_VAR).ok(),
            std::env::var(POSTGRES_PORT_VAR).ok(),
        )
    }

    /// A missing or unparsable port leaves `port` unset.
    pub fn from_values(host: Option<String>, port: Option<String>) -> Self {
        let host = host.filter(|h| !h.trim().is_empty());
        let port = port.and_then(|p| p.trim().parse::<u16>().ok());
        Self { host, port }
    }

    pub fn is_complete(&self) -> bool {
        self.host.is_some() && self.port.is_some()
    }
}
