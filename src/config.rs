//! Runtime configuration
//!
//! Values come from the process environment (optionally seeded from `.env`).
//! Every component receives the pieces it needs at construction time.

use crate::error::AnalysisError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_MODELS: &[&str] = &["gemini-2.0-flash-lite", "gemini-2.0-flash", "gemini-2.5-flash"];

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_env: String,

    pub gemini_api_key: String,
    pub gemini_base_url: String,
    /// Candidate models, cheapest first
    pub models: Vec<String>,

    pub database_url: String,

    pub host: String,
    pub port: u16,

    /// Limit on the summed size of all files in one request
    pub max_upload_bytes: u64,
    /// Number of passes over the candidate list
    pub max_rounds: u32,
    pub retry_base_delay: Duration,

    pub temp_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Swis Madagascar - Analyse Intelligente".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            app_env: "production".to_string(),
            gemini_api_key: String::new(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            database_url: "sqlite:analyse_db_thread.sqlite?mode=rwc".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 20 * 1024 * 1024,
            max_rounds: 3,
            retry_base_delay: Duration::from_secs(2),
            temp_dir: env::temp_dir().join("anomaly-uploads"),
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let database_url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => match env::var("DATABASE_NAME") {
                Ok(name) => format!("sqlite:{}?mode=rwc", name),
                Err(_) => defaults.database_url,
            },
        };

        let models = env::var("GEMINI_MODELS")
            .map(|raw| parse_model_list(&raw))
            .unwrap_or(defaults.models);

        Ok(Self {
            app_name: env::var("APP_NAME").unwrap_or(defaults.app_name),
            app_version: env::var("APP_VERSION").unwrap_or(defaults.app_version),
            app_env: env::var("APP_ENV").unwrap_or(defaults.app_env),
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_base_url: env::var("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            models,
            database_url,
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port)?,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            max_rounds: parse_var("MAX_RETRIES", defaults.max_rounds)?,
            retry_base_delay: Duration::from_secs(parse_var(
                "RETRY_DELAY",
                defaults.retry_base_delay.as_secs(),
            )?),
            temp_dir: env::var("TEMP_DIR").map(PathBuf::from).unwrap_or(defaults.temp_dir),
            static_dir: env::var("STATIC_DIR").map(PathBuf::from).unwrap_or(defaults.static_dir),
        })
    }

    /// Reject unusable settings and prepare the staging directory
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.gemini_api_key.trim().is_empty() {
            errors.push("GEMINI_API_KEY is not configured".to_string());
        }
        if self.models.is_empty() {
            errors.push("GEMINI_MODELS lists no model".to_string());
        }
        if self.max_rounds == 0 {
            errors.push("MAX_RETRIES must be at least 1".to_string());
        }
        if let Err(e) = std::fs::create_dir_all(&self.temp_dir) {
            errors.push(format!("cannot create {}: {}", self.temp_dir.display(), e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AnalysisError::Config(errors.join(" | ")))
        }
    }

    /// Log the effective configuration, secrets excluded
    pub fn log_summary(&self) {
        info!(
            app = %self.app_name,
            version = %self.app_version,
            env = %self.app_env,
            host = %self.host,
            port = self.port,
            database = %self.database_url,
            models = ?self.models,
            max_upload_mb = self.max_upload_bytes as f64 / 1024.0 / 1024.0,
            max_rounds = self.max_rounds,
            retry_delay_secs = self.retry_base_delay.as_secs(),
            "Configuration loaded"
        );
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AnalysisError::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}
