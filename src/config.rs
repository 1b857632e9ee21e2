use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::eid::EventId;
use crate::matching::{DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD, DEFAULT_MAX_PAIRS_PER_CANDIDATE};
use crate::semantic::voyage::VOYAGE_API_BASE;
use crate::semantic::DEFAULT_MODEL;
use crate::sources::polymarket::{DEFAULT_USER_AGENT, GAMMA_BASE};

const CONFIG_FILE: &str = "config.yaml";
const DEFAULT_DATABASE_PATH: &str = "market_sync.sqlite";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SOURCE_LIMIT: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("could not determine home directory; set MARKET_SYNC_DIR")]
    NoHome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Attempts per embedding batch, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay, doubled after every failed attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default)]
    pub jitter: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            jitter: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    #[serde(default = "default_max_pairs_per_candidate")]
    pub max_pairs_per_candidate: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            low_threshold: DEFAULT_LOW_THRESHOLD,
            max_pairs_per_candidate: DEFAULT_MAX_PAIRS_PER_CANDIDATE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolymarketConfig {
    #[serde(default = "default_gamma_base")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Markets fetched per run
    #[serde(default = "default_source_limit")]
    pub limit: usize,
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_gamma_base(),
            user_agent: default_user_agent(),
            limit: DEFAULT_SOURCE_LIMIT,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base() -> String {
    VOYAGE_API_BASE.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_high_threshold() -> f64 {
    DEFAULT_HIGH_THRESHOLD
}

fn default_low_threshold() -> f64 {
    DEFAULT_LOW_THRESHOLD
}

fn default_max_pairs_per_candidate() -> usize {
    DEFAULT_MAX_PAIRS_PER_CANDIDATE
}

fn default_gamma_base() -> String {
    GAMMA_BASE.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_source_limit() -> usize {
    DEFAULT_SOURCE_LIMIT
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file, relative to the base directory unless absolute
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub polymarket: PolymarketConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            embedding: EmbeddingConfig::default(),
            matching: MatchingConfig::default(),
            polymarket: PolymarketConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

/// `MARKET_SYNC_DIR`, or `~/.local/share/market-sync`.
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("MARKET_SYNC_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = my_home()
        .map_err(|_| ConfigError::NoHome)?
        .ok_or(ConfigError::NoHome)?;
    Ok(home.join(".local/share/market-sync"))
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write through a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = dir.join(format!("{}-{CONFIG_FILE}", EventId::generate()));
    std::fs::write(&temp, data).map_err(io_err(&temp))?;
    std::fs::rename(&temp, path).map_err(io_err(path))
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.matching;
        for (name, value) in [
            ("matching.high_threshold", m.high_threshold),
            ("matching.low_threshold", m.low_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between -1.0 and 1.0, got {value}"
                )));
            }
        }
        if m.low_threshold > m.high_threshold {
            return Err(ConfigError::Invalid(format!(
                "matching.low_threshold ({}) must not exceed matching.high_threshold ({})",
                m.low_threshold, m.high_threshold
            )));
        }
        if m.max_pairs_per_candidate == 0 {
            return Err(ConfigError::Invalid(
                "matching.max_pairs_per_candidate must be greater than 0".to_string(),
            ));
        }

        let e = &self.embedding;
        if e.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "embedding.max_retries must be greater than 0".to_string(),
            ));
        }
        if e.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embedding.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if e.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model is empty".to_string()));
        }
        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults first if needed.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(base_path).map_err(io_err(base_path))?;
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            log::info!("Writing default config to {}", path.display());
            write_atomic(&path, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err(&path))?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    /// Load from [`base_dir`] and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_with(&base_dir()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides for the current process only. They are never saved.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup("DB_PATH") {
            self.database_path = v;
        }
        if let Some(v) = lookup("VOYAGE_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("GAMMA_BASE") {
            self.polymarket.base_url = v;
        }
        if let Some(v) = lookup("USER_AGENT") {
            self.polymarket.user_agent = v;
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), config_str.as_bytes())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn database_path(&self) -> PathBuf {
        let path = Path::new(&self.database_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}
