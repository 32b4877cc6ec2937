//! Configuration management for the location importer

use locimport_core::{OverflowPolicy, SchedulerConfig, MAX_BATCH_SIZE};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fhir: FhirConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirConfig {
    /// Base URL of the FHIR server; batch bundles are POSTed here.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds. Default: 30
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Bearer token sent with every request.
    /// Environment variable: `LOCIMPORT__FHIR__BEARER_TOKEN`
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// Locations per batch request (1..=20). Default: 20
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Where the rest of a split sibling set is queued: deferred or contiguous.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl ImportConfig {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_batch_size: self.max_batch_size,
            overflow: self.overflow,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON formatting for logs
    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    "http://localhost:8080/fhir".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_overflow() -> String {
    "deferred".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from defaults, `locimport.{toml,yaml,json}` and environment
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], reading `file` instead of the default config file.
    pub fn load_from(file: Option<&Path>) -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .set_default("fhir.base_url", default_base_url())?
            .set_default("fhir.timeout_seconds", default_timeout_seconds())?
            .set_default("import.max_batch_size", default_max_batch_size() as i64)?
            .set_default("import.overflow", default_overflow())?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?;

        let builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("locimport").required(false)),
        };

        let config = builder
            // Example: LOCIMPORT__FHIR__BASE_URL -> config.fhir.base_url
            .add_source(
                config::Environment::with_prefix("LOCIMPORT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.fhir.base_url.trim().is_empty() {
            return Err("fhir.base_url must be set".to_string());
        }
        if !self.fhir.base_url.starts_with("http://") && !self.fhir.base_url.starts_with("https://")
        {
            return Err(format!(
                "fhir.base_url must be an http(s) URL, got '{}'",
                self.fhir.base_url
            ));
        }
        if self.fhir.timeout_seconds == 0 {
            return Err("fhir.timeout_seconds must be > 0".to_string());
        }
        if self.import.max_batch_size == 0 || self.import.max_batch_size > MAX_BATCH_SIZE {
            return Err(format!(
                "import.max_batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            ));
        }
        Ok(())
    }
}
