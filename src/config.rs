//! Configuration loading: built-in defaults, optional TOML file, environment.
//!
//! Resolution order, lowest to highest precedence:
//! 1. defaults baked into this module,
//! 2. a TOML file (`$ORACLE_CONFIG`, else `config.toml` when present),
//! 3. environment variables (a `.env` file is loaded by `main`).
//!
//! The signing key is only ever read from the environment and is kept in a
//! [`SecretString`]. Its absence is not an error here: the executor reports
//! it when the first transition is attempted.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::feed::RetryPolicy;
use crate::types::OracleError;

const DEFAULT_CONFIG_FILE: &str = "config.toml";

const DEFAULT_SPOT_URL: &str = "https://api.coinbase.com/v2/prices/BTC-USD/spot";
const DEFAULT_PROGRAM_ID: &str = "flashmarketsam2.aleo";
const DEFAULT_NETWORK: &str = "testnet";
const DEFAULT_ENDPOINT: &str = "https://api.explorer.provable.com/v1";

/// Longest accepted round, one day.
pub const MAX_ROUND_LENGTH_SEC: u64 = 86_400;

// ---------------------------------------------------------------------------
// Execution backend
// ---------------------------------------------------------------------------

/// Backend used to submit transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Shell out to `leo execute ... --broadcast`.
    LeoCli,
}

impl FromStr for ExecutionMode {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "leo-cli" | "leo_cli" | "leo" => Ok(ExecutionMode::LeoCli),
            other => Err(OracleError::Config(format!("Unsupported ORACLE_MODE: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Immutable run configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub mode: ExecutionMode,
    pub spot_url: String,
    /// Label written into the `source` field of the state file.
    pub source: String,
    pub round_length_sec: u64,
    pub close_buffer_sec: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub feed_timeout_ms: u64,

    pub private_key: SecretString,
    pub program_id: String,
    pub network: String,
    pub endpoint: String,
    pub leo_bin: PathBuf,
    /// Zero disables the timeout.
    pub exec_timeout_sec: u64,

    pub next_round_delay_sec: u64,
    pub tick_interval_ms: u64,
    pub max_void_attempts: u32,
    pub state_file: PathBuf,
    pub resume: bool,
}

/// Partial configuration as read from the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub mode: Option<String>,
    pub spot_url: Option<String>,
    pub source: Option<String>,
    pub round_length_sec: Option<u64>,
    pub close_buffer_sec: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub feed_timeout_ms: Option<u64>,
    pub program_id: Option<String>,
    pub network: Option<String>,
    pub endpoint: Option<String>,
    pub leo_bin: Option<PathBuf>,
    pub exec_timeout_sec: Option<u64>,
    pub next_round_delay_sec: Option<u64>,
    pub tick_interval_ms: Option<u64>,
    pub max_void_attempts: Option<u32>,
    pub state_file: Option<PathBuf>,
    pub resume: Option<bool>,
}

impl FileConfig {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

impl AppConfig {
    /// Load from the process environment and the optional config file.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("ORACLE_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                FileConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            Err(_) => FileConfig::default(),
        };

        let config = Self::from_sources(file, |key| std::env::var(key).ok())
            .context("Invalid oracle configuration")?;
        Ok(config)
    }

    /// Merge a file layer with an environment lookup and validate.
    pub fn from_sources<F>(file: FileConfig, env: F) -> Result<Self, OracleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match env("ORACLE_MODE").or(file.mode) {
            Some(raw) => raw.parse()?,
            None => ExecutionMode::LeoCli,
        };

        let leo_bin = match env_path(&env, "LEO_BIN").or(file.leo_bin) {
            Some(path) => path,
            None => match env("HOME") {
                Some(home) => Path::new(&home).join(".cargo").join("bin").join("leo"),
                None => PathBuf::from("leo"),
            },
        };

        let config = Self {
            mode,
            spot_url: env("COINBASE_SPOT_URL")
                .or(file.spot_url)
                .unwrap_or_else(|| DEFAULT_SPOT_URL.to_string()),
            source: env("ORACLE_SOURCE")
                .or(file.source)
                .unwrap_or_else(|| "coinbase".to_string()),
            round_length_sec: env_parse(&env, "ROUND_LENGTH_SEC")?
                .or(file.round_length_sec)
                .unwrap_or(30),
            close_buffer_sec: env_parse(&env, "CLOSE_BUFFER_SEC")?
                .or(file.close_buffer_sec)
                .unwrap_or(3),
            retry_count: env_parse(&env, "ORACLE_RETRY_COUNT")?
                .or(file.retry_count)
                .unwrap_or(3),
            retry_delay_ms: env_parse(&env, "ORACLE_RETRY_DELAY_MS")?
                .or(file.retry_delay_ms)
                .unwrap_or(3000),
            feed_timeout_ms: env_parse(&env, "ORACLE_FEED_TIMEOUT_MS")?
                .or(file.feed_timeout_ms)
                .unwrap_or(10_000),
            private_key: Secret::new(env("PRIVATE_KEY").unwrap_or_default()),
            program_id: env("PROGRAM_ID")
                .or(file.program_id)
                .unwrap_or_else(|| DEFAULT_PROGRAM_ID.to_string()),
            network: env("NETWORK")
                .or(file.network)
                .unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            endpoint: env("ENDPOINT")
                .or(file.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            leo_bin,
            exec_timeout_sec: env_parse(&env, "ORACLE_EXEC_TIMEOUT_SEC")?
                .or(file.exec_timeout_sec)
                .unwrap_or(0),
            next_round_delay_sec: env_parse(&env, "NEXT_ROUND_DELAY_SEC")?
                .or(file.next_round_delay_sec)
                .unwrap_or(1),
            tick_interval_ms: env_parse(&env, "ORACLE_TICK_MS")?
                .or(file.tick_interval_ms)
                .unwrap_or(1000),
            max_void_attempts: env_parse(&env, "ORACLE_MAX_VOID_ATTEMPTS")?
                .or(file.max_void_attempts)
                .unwrap_or(5),
            state_file: env_path(&env, "ORACLE_STATE_FILE")
                .or(file.state_file)
                .unwrap_or_else(|| Path::new("runtime").join("state.json")),
            resume: env_bool(&env, "ORACLE_RESUME")?.or(file.resume).unwrap_or(true),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), OracleError> {
        if self.round_length_sec == 0 {
            return Err(OracleError::Config("ROUND_LENGTH_SEC must be positive".into()));
        }
        if self.round_length_sec > MAX_ROUND_LENGTH_SEC {
            return Err(OracleError::Config(format!(
                "ROUND_LENGTH_SEC ({}) exceeds the {MAX_ROUND_LENGTH_SEC}s maximum",
                self.round_length_sec
            )));
        }
        if self.close_buffer_sec >= self.round_length_sec {
            return Err(OracleError::Config(format!(
                "CLOSE_BUFFER_SEC ({}) must be smaller than ROUND_LENGTH_SEC ({})",
                self.close_buffer_sec, self.round_length_sec
            )));
        }
        if self.retry_count == 0 {
            return Err(OracleError::Config("ORACLE_RETRY_COUNT must be at least 1".into()));
        }
        if self.max_void_attempts == 0 {
            return Err(OracleError::Config("ORACLE_MAX_VOID_ATTEMPTS must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(OracleError::Config("ORACLE_TICK_MS must be positive".into()));
        }
        Ok(())
    }

    /// Retry policy for price fetches.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_count,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn next_round_delay(&self) -> Duration {
        Duration::from_secs(self.next_round_delay_sec)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn exec_timeout(&self) -> Option<Duration> {
        (self.exec_timeout_sec > 0).then(|| Duration::from_secs(self.exec_timeout_sec))
    }

    pub fn has_private_key(&self) -> bool {
        !self.private_key.expose_secret().is_empty()
    }
}

fn env_parse<T, F>(env: &F, key: &str) -> Result<Option<T>, OracleError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| OracleError::Config(format!("{key} has an invalid value: {raw:?}"))),
        _ => Ok(None),
    }
}

fn env_bool<F>(env: &F, key: &str) -> Result<Option<bool>, OracleError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(OracleError::Config(format!("{key} must be a boolean, got {v:?}"))),
        },
    }
}

fn env_path<F>(env: &F, key: &str) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    env(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}
