use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Worker-pool and ingestion tuning knobs (SPEC_FULL.md §6.5, §10.3).
#[derive(Debug, Deserialize, Clone)]
pub struct WorkersConfig {
    /// Override for the parsing worker-pool size. `None` lets the engine
    /// probe CPU/GPU presence at construction time.
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default = "default_job_retention_ttl_hours")]
    pub job_retention_ttl_hours: u64,
    #[serde(default = "default_job_sweep_interval_hours")]
    pub job_sweep_interval_hours: u64,
}

fn default_job_retention_ttl_hours() -> u64 {
    24
}

fn default_job_sweep_interval_hours() -> u64 {
    1
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            job_retention_ttl_hours: default_job_retention_ttl_hours(),
            job_sweep_interval_hours: default_job_sweep_interval_hours(),
        }
    }
}

/// Embedding/chunking knobs (SPEC_FULL.md §4.F, §10.3).
#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    pub embedding_model: String,
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    #[serde(default = "default_hash_truncate_len")]
    pub hash_truncate_len: usize,
}

fn default_max_batch_tokens() -> usize {
    8000
}

fn default_hash_truncate_len() -> usize {
    24
}

/// Search-store connection parameters (SPEC_FULL.md §6.1, §6.5).
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,
    #[serde(default = "default_index_name")]
    pub index_name: String,
}

fn default_tls_verify() -> bool {
    true
}

fn default_index_name() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub webhook_base_url: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("ALAYASIKI").separator("__"));

        builder.build()?.try_deserialize()
    }
}
