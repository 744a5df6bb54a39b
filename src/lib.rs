pub mod batch;
pub mod config;
pub mod db;
pub mod inference;
pub mod ingest;
pub mod llm;
pub mod prompts;
pub mod util;
pub mod web;
