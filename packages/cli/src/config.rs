// ABOUTME: Environment-driven server configuration
// ABOUTME: Parses and validates CORRAL_* variables with typed errors

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidNumber(&'static str, String),

    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u64),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    pub max_sandboxes: Option<usize>,
    pub model_timeout: Duration,
    pub sandbox_create_timeout: Duration,
    pub command_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub default_budget_limit: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_port(env::var("CORRAL_PORT").ok())?,
            database_path: env::var("CORRAL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("corral.db")),
            max_sandboxes: parse_max_sandboxes(env::var("CORRAL_MAX_SANDBOXES").ok())?,
            model_timeout: parse_secs("CORRAL_MODEL_TIMEOUT_SECS", env::var("CORRAL_MODEL_TIMEOUT_SECS").ok(), 30)?,
            sandbox_create_timeout: parse_secs(
                "CORRAL_SANDBOX_CREATE_TIMEOUT_SECS",
                env::var("CORRAL_SANDBOX_CREATE_TIMEOUT_SECS").ok(),
                60,
            )?,
            command_timeout: parse_secs("CORRAL_COMMAND_TIMEOUT_SECS", env::var("CORRAL_COMMAND_TIMEOUT_SECS").ok(), 120)?,
            heartbeat_interval: parse_secs("CORRAL_HEARTBEAT_SECS", env::var("CORRAL_HEARTBEAT_SECS").ok(), 30)?,
            default_budget_limit: parse_budget_limit(env::var("CORRAL_DEFAULT_BUDGET_LIMIT").ok())?,
        })
    }
}

fn parse_port(value: Option<String>) -> Result<u16, ConfigError> {
    match value {
        Some(raw) => {
            let port: u64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("CORRAL_PORT", raw.clone()))?;
            if port == 0 || port > u16::MAX as u64 {
                return Err(ConfigError::PortOutOfRange(port));
            }
            Ok(port as u16)
        }
        None => Ok(4180),
    }
}

/// Absent or empty means the pool is unbounded
fn parse_max_sandboxes(value: Option<String>) -> Result<Option<usize>, ConfigError> {
    match value {
        Some(raw) if !raw.is_empty() => {
            let max: usize = raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("CORRAL_MAX_SANDBOXES", raw.clone()))?;
            if max == 0 {
                return Err(ConfigError::InvalidNumber("CORRAL_MAX_SANDBOXES", raw));
            }
            Ok(Some(max))
        }
        _ => Ok(None),
    }
}

fn parse_secs(
    name: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<Duration, ConfigError> {
    match value {
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber(name, raw.clone()))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(Duration::from_secs(default)),
    }
}

fn parse_budget_limit(value: Option<String>) -> Result<f64, ConfigError> {
    match value {
        Some(raw) => {
            let limit: f64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("CORRAL_DEFAULT_BUDGET_LIMIT", raw.clone()))?;
            if limit < 0.0 {
                return Err(ConfigError::InvalidNumber("CORRAL_DEFAULT_BUDGET_LIMIT", raw));
            }
            Ok(limit)
        }
        None => Ok(100.0),
    }
}
