//! Screening service configuration.
//!
//! Every knob can come from a TOML file ([`Config::from_file`]) or from
//! environment variables ([`Config::from_env`]), with environment values
//! taking precedence over the built-in defaults. Environment variable names
//! are exported as `ENV_*` constants so callers and deploy scripts share one
//! source of truth.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Result, ScreeningError};

pub const ENV_PORT: &str = "PORT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_DATA_DIR: &str = "DATA_DIR";
pub const ENV_SANCTIONS_DIR: &str = "SANCTIONS_DIR";
pub const ENV_RISK_ASSESSMENTS_DIR: &str = "RISK_ASSESSMENTS_DIR";
pub const ENV_AUDIT_LOGS_DIR: &str = "AUDIT_LOGS_DIR";
pub const ENV_CONFIG_DIR: &str = "CONFIG_DIR";
pub const ENV_API_RATE_LIMIT: &str = "API_RATE_LIMIT";
pub const ENV_DEFAULT_MAX_HOPS: &str = "DEFAULT_MAX_HOPS";
pub const ENV_RISK_CACHE_TTL_HOURS: &str = "RISK_CACHE_TTL_HOURS";
pub const ENV_INDEXER_URL: &str = "INDEXER_URL";
pub const ENV_SANCTIONS_FEED_URLS: &str = "SANCTIONS_FEED_URLS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";

const DEFAULT_INDEXER_URL: &str = "https://blockstream.info/api";
const DEFAULT_SANCTIONS_FEED_URL: &str =
    "https://www.treasury.gov/ofac/downloads/sdn_advanced.xml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub sanctions_dir: PathBuf,
    pub risk_assessments_dir: PathBuf,
    pub audit_logs_dir: PathBuf,
    pub config_dir: PathBuf,
    /// Requests allowed per sliding 60-second window against the indexer.
    pub api_rate_limit: u32,
    pub default_max_hops: u32,
    /// Sanctions index reload interval.
    pub risk_cache_ttl_hours: u64,
    pub indexer_url: String,
    pub sanctions_feed_urls: Vec<String>,
    /// Per-request timeout for indexer calls.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Config {
            port: 3000,
            log_level: "info".to_string(),
            sanctions_dir: data_dir.join("sanctions"),
            risk_assessments_dir: data_dir.join("risk-assessments"),
            audit_logs_dir: data_dir.join("audit-logs"),
            config_dir: PathBuf::from("config"),
            data_dir,
            api_rate_limit: 60,
            default_max_hops: 5,
            risk_cache_ttl_hours: 1,
            indexer_url: DEFAULT_INDEXER_URL.to_string(),
            sanctions_feed_urls: vec![DEFAULT_SANCTIONS_FEED_URL.to_string()],
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ScreeningError::DataLoad(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str(&content).map_err(ScreeningError::Toml)
    }

    /// Build a config from environment variables, falling back to defaults
    /// for anything unset. Unparseable numeric values fall back too rather
    /// than aborting startup.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Some(port) = env_parse::<u16>(ENV_PORT) {
            config.port = port;
        }
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        if let Ok(dir) = env::var(ENV_DATA_DIR) {
            let data_dir = PathBuf::from(dir);
            config.sanctions_dir = data_dir.join("sanctions");
            config.risk_assessments_dir = data_dir.join("risk-assessments");
            config.audit_logs_dir = data_dir.join("audit-logs");
            config.data_dir = data_dir;
        }
        if let Ok(dir) = env::var(ENV_SANCTIONS_DIR) {
            config.sanctions_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var(ENV_RISK_ASSESSMENTS_DIR) {
            config.risk_assessments_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var(ENV_AUDIT_LOGS_DIR) {
            config.audit_logs_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var(ENV_CONFIG_DIR) {
            config.config_dir = PathBuf::from(dir);
        }
        if let Some(limit) = env_parse::<u32>(ENV_API_RATE_LIMIT) {
            config.api_rate_limit = limit;
        }
        if let Some(hops) = env_parse::<u32>(ENV_DEFAULT_MAX_HOPS) {
            config.default_max_hops = hops;
        }
        if let Some(hours) = env_parse::<u64>(ENV_RISK_CACHE_TTL_HOURS) {
            config.risk_cache_ttl_hours = hours;
        }
        if let Ok(url) = env::var(ENV_INDEXER_URL) {
            config.indexer_url = url;
        }
        if let Ok(urls) = env::var(ENV_SANCTIONS_FEED_URLS) {
            let urls: Vec<String> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            if !urls.is_empty() {
                config.sanctions_feed_urls = urls;
            }
        }
        if let Some(secs) = env_parse::<u64>(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout_secs = secs;
        }

        config
    }

    /// Path of the consolidated sanctions JSON document inside
    /// [`Config::sanctions_dir`].
    pub fn sanctions_path(&self) -> PathBuf {
        self.sanctions_dir.join("crypto_addresses.json")
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment override");
                None
            }
        },
        Err(_) => None,
    }
}
