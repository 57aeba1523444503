//! Environment-sourced configuration, loaded once in `main` and injected into
//! the pipeline and adapters.

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Fs,
    Http,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StoreKind,
    pub fs_dir: PathBuf,
    pub url: Option<String>,
    pub bucket: String,
    pub service_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub json_mode: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Write the validated extraction to `processed/{fileId}.json`.
    pub write_processed_artifact: bool,
}

impl PipelineConfig {
    /// Dry runs leave the object store untouched as well as the database.
    pub fn dry_run(self) -> Self {
        Self {
            write_processed_artifact: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub bind: String,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't touch process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match lookup("RAW_STORE").as_deref().unwrap_or("fs") {
            "fs" => StoreKind::Fs,
            "http" | "supabase" => StoreKind::Http,
            other => anyhow::bail!("RAW_STORE must be 'fs' or 'http', got '{}'", other),
        };

        let storage = StorageConfig {
            kind,
            fs_dir: PathBuf::from(
                lookup("RAW_FS_DIR").unwrap_or_else(|| "./data/uploads".to_string()),
            ),
            url: lookup("STORAGE_URL"),
            bucket: lookup("STORAGE_BUCKET").unwrap_or_else(|| "uploads".to_string()),
            service_key: lookup("STORAGE_SERVICE_KEY"),
        };

        if storage.kind == StoreKind::Http && storage.url.is_none() {
            anyhow::bail!("STORAGE_URL env var missing (required when RAW_STORE=http)");
        }

        let llm = LlmConfig {
            endpoint: lookup("LLM_ENDPOINT").unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
            api_key: lookup("LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")),
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            temperature: lookup("LLM_TEMPERATURE")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0.0),
            timeout_secs: lookup("LLM_TIMEOUT_SECS")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(300),
            json_mode: parse_bool(lookup("LLM_JSON_MODE"), true),
        };

        Ok(Self {
            db_url: lookup("DB_URL").context("DB_URL env var missing")?,
            bind: lookup("API_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            storage,
            llm,
            pipeline: PipelineConfig {
                write_processed_artifact: parse_bool(lookup("WRITE_PROCESSED_ARTIFACT"), false),
            },
        })
    }
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}
