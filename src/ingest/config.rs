// src/ingest/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const ENV_PATH: &str = "FEEDS_CONFIG_PATH";
pub const DEFAULT_TOML_PATH: &str = "config/feeds.toml";
pub const DEFAULT_JSON_PATH: &str = "config/feeds.json";

/// Whole configuration file: settings tables plus the `[[sources]]` list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub ingest: IngestSettings,
    pub storage: StorageSettings,
    pub metrics: MetricsSettings,
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub max_concurrency: usize,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub asset_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_assets_per_item: usize,
    /// Larger assets are abandoned mid-download.
    pub max_asset_bytes: usize,
    pub default_interval: IntervalSpec,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            user_agent: concat!("cybersec-feeds/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            asset_timeout_secs: 10,
            max_retries: 2,
            backoff_base_ms: 500,
            max_assets_per_item: 4,
            max_asset_bytes: 10 * 1024 * 1024,
            default_interval: IntervalSpec::Secs(900),
        }
    }
}

impl IngestSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid_setting(
                "ingest.max_concurrency",
                "must be > 0",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid_setting(
                "ingest.request_timeout_secs",
                "must be > 0",
            ));
        }
        if self.asset_timeout_secs == 0 {
            return Err(ConfigError::invalid_setting(
                "ingest.asset_timeout_secs",
                "must be > 0",
            ));
        }
        if self.max_asset_bytes == 0 {
            return Err(ConfigError::invalid_setting(
                "ingest.max_asset_bytes",
                "must be > 0",
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid_setting(
                "ingest.user_agent",
                "must not be empty",
            ));
        }
        self.default_interval
            .to_duration()
            .map_err(|m| ConfigError::invalid_setting("ingest.default_interval", m))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database: PathBuf,
    pub assets_dir: PathBuf,
    /// When set, every new item is also exported as a Markdown file here.
    pub markdown_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("db/posts.db"),
            assets_dir: PathBuf::from("content/assets"),
            markdown_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// e.g. "0.0.0.0:9000"; exporter disabled when absent.
    pub listen: Option<String>,
}

/// One `[[sources]]` entry as written by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub url: String,
    #[serde(default)]
    pub interval: Option<IntervalSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Polling cadence: integer seconds or a string such as "90s", "15m", "1h".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IntervalSpec {
    Secs(u64),
    Text(String),
}

impl IntervalSpec {
    pub fn to_duration(&self) -> Result<Duration, String> {
        let secs = match self {
            IntervalSpec::Secs(s) => *s,
            IntervalSpec::Text(t) => parse_interval(t)?,
        };
        if secs == 0 {
            return Err("interval must be > 0".to_string());
        }
        Ok(Duration::from_secs(secs))
    }
}

fn parse_interval(raw: &str) -> Result<u64, String> {
    let t = raw.trim().to_ascii_lowercase();
    let split = t
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(t.len());
    let (num, unit) = t.split_at(split);
    let n: u64 = num
        .parse()
        .map_err(|_| format!("unparseable interval {raw:?}"))?;
    let mult = match unit.trim() {
        "" | "s" | "sec" | "secs" => 1,
        "m" | "min" | "mins" => 60,
        "h" | "hr" | "hrs" => 3600,
        "d" | "day" | "days" => 86_400,
        other => return Err(format!("unknown interval unit {other:?} in {raw:?}")),
    };
    n.checked_mul(mult)
        .ok_or_else(|| format!("interval {raw:?} overflows"))
}

/// Load configuration from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<FeedsConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
}

/// Load configuration using env var + fallbacks:
/// 1) $FEEDS_CONFIG_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
pub fn load_default() -> Result<FeedsConfig, ConfigError> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(ConfigError::MissingPath(ENV_PATH, pb));
    }
    let toml_p = PathBuf::from(DEFAULT_TOML_PATH);
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from(DEFAULT_JSON_PATH);
    if json_p.exists() {
        return load_from(&json_p);
    }
    Err(ConfigError::NotFound(format!(
        "${ENV_PATH}, {DEFAULT_TOML_PATH}, {DEFAULT_JSON_PATH}"
    )))
}

/// Parse TOML or JSON; the extension is a hint, the other format is tried as fallback.
pub fn parse_config(s: &str, hint_ext: &str) -> Result<FeedsConfig, ConfigError> {
    if hint_ext == "json" {
        return match serde_json::from_str(s) {
            Ok(cfg) => Ok(cfg),
            Err(e) => toml::from_str(s).map_err(|_| ConfigError::Json(e)),
        };
    }
    match toml::from_str(s) {
        Ok(cfg) => Ok(cfg),
        Err(e) if hint_ext == "toml" => Err(ConfigError::Toml(e)),
        Err(e) => serde_json::from_str(s).map_err(|_| ConfigError::Toml(e)),
    }
}
