//! Configuration loader
//!
//! Loads [`ConduitConfig`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. A `.env` file in the working directory (or a parent) is applied first;
//!    variables already set in the process win
//! 2. If `CONDUIT_TOKEN` is set, configuration comes from the environment on
//!    top of the built-in defaults
//! 3. Otherwise a config file is loaded (`CONDUIT_CONFIG`, or the first probed
//!    path) and environment overrides are applied on top of it
//! 4. The result is validated before it is returned
//!
//! ## Environment Variables
//! - `CONDUIT_TOKEN`: Bot credential (required unless a file provides it)
//! - `CONDUIT_CONFIG`: Explicit config file path
//! - `CONDUIT_API_BASE_URL`: REST base URL
//! - `CONDUIT_USER_AGENT`: `User-Agent` sent on every request
//! - `CONDUIT_MAX_RETRIES`: Transient retry ceiling
//! - `CONDUIT_RATE_LIMIT_RETRIES`: Retries for 429 responses
//! - `CONDUIT_REQUEST_TIMEOUT_MS`: Per-request timeout in milliseconds
//! - `CONDUIT_GLOBAL_REQUESTS_PER_SECOND`: Global ceiling (`off` disables it)
//! - `CONDUIT_GATEWAY_URL`: Fixed gateway URL, skipping discovery
//! - `CONDUIT_INTENTS`: Gateway intents bitfield
//! - `CONDUIT_SHARD`: `id,count`
//! - `CONDUIT_HANDSHAKE_TIMEOUT_MS`: Bound on Hello and Ready/Resumed waits
//! - `CONDUIT_LOG_LEVEL`: `EnvFilter` directive
//! - `CONDUIT_LOG_JSON`: Emit JSON logs (true/false)
//!
//! ## File Locations
//! The loader probes the following names in the working directory and up to
//! two parents, then next to the executable:
//! `conduit.toml`, `conduit.json`, `config.toml`, `config.json`.
//! Durations in files are integer milliseconds.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use conduit_domain::{ConduitConfig, ConduitError, Result};
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_FILE_NAMES: [&str; 4] = ["conduit.toml", "conduit.json", "config.toml", "config.json"];

/// Why configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("no config file found in any of the standard locations")]
    NoConfigFile,

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {format} in {}: {message}", path.display())]
    Parse { format: &'static str, path: PathBuf, message: String },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

impl From<ConfigError> for ConduitError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `ConduitError::Config` if neither source yields a configuration,
/// a value fails to parse, or the result does not validate.
pub fn load() -> Result<ConduitConfig> {
    load_dotenv();

    let config = match load_from_env() {
        Ok(config) => {
            info!("Configuration loaded from environment variables");
            config
        }
        Err(err) => {
            debug!(error = %err, "Failed to load from environment, trying file");
            let path = std::env::var_os("CONDUIT_CONFIG").map(PathBuf::from);
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config
        }
    };

    config.validate()?;
    Ok(config)
}

/// Apply a `.env` file if one exists
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
        Err(err) if err.not_found() => {}
        Err(err) => debug!(error = %err, "Ignoring unreadable .env file"),
    }
}

/// Load configuration from environment variables over the defaults
///
/// # Errors
/// Returns `ConduitError::Config` if `CONDUIT_TOKEN` is missing or any
/// variable has an invalid value.
pub fn load_from_env() -> Result<ConduitConfig> {
    let token = env_var("CONDUIT_TOKEN").ok_or(ConfigError::MissingVar("CONDUIT_TOKEN"))?;
    let mut config = ConduitConfig { token, ..ConduitConfig::default() };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Overlay every `CONDUIT_*` variable that is set onto `config`
///
/// # Errors
/// Returns `ConduitError::Config` naming the first variable that fails to
/// parse.
pub fn apply_env_overrides(config: &mut ConduitConfig) -> Result<()> {
    if let Some(token) = env_var("CONDUIT_TOKEN") {
        config.token = token;
    }

    let rest = &mut config.rest;
    if let Some(url) = env_var("CONDUIT_API_BASE_URL") {
        rest.api_base_url = url;
    }
    if let Some(agent) = env_var("CONDUIT_USER_AGENT") {
        rest.user_agent = agent;
    }
    if let Some(retries) = env_parse("CONDUIT_MAX_RETRIES")? {
        rest.max_retries = retries;
    }
    if let Some(retries) = env_parse("CONDUIT_RATE_LIMIT_RETRIES")? {
        rest.rate_limit_retries = retries;
    }
    if let Some(timeout) = env_millis("CONDUIT_REQUEST_TIMEOUT_MS")? {
        rest.request_timeout = timeout;
    }
    if let Some(value) = env_var("CONDUIT_GLOBAL_REQUESTS_PER_SECOND") {
        rest.global_requests_per_second = if value.eq_ignore_ascii_case("off") {
            None
        } else {
            Some(parse_value("CONDUIT_GLOBAL_REQUESTS_PER_SECOND", &value)?)
        };
    }

    let gateway = &mut config.gateway;
    if let Some(url) = env_var("CONDUIT_GATEWAY_URL") {
        gateway.url = Some(url);
    }
    if let Some(intents) = env_parse("CONDUIT_INTENTS")? {
        gateway.intents = intents;
    }
    if let Some(shard) = env_var("CONDUIT_SHARD") {
        gateway.shard = Some(parse_shard(&shard)?);
    }
    if let Some(timeout) = env_millis("CONDUIT_HANDSHAKE_TIMEOUT_MS")? {
        gateway.handshake_timeout = timeout;
    }

    if let Some(level) = env_var("CONDUIT_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("CONDUIT_LOG_JSON", config.logging.json);

    Ok(())
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected by
/// extension.
///
/// # Errors
/// Returns `ConduitError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<ConduitConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound(p).into());
            }
            p
        }
        None => probe_config_paths().ok_or(ConfigError::NoConfigFile)?,
    };

    info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|source| ConfigError::Read { path: config_path.clone(), source })?;

    Ok(parse_config(&contents, &config_path)?)
}

/// Parse configuration from string content, by the extension of `path`
fn parse_config(contents: &str, path: &Path) -> std::result::Result<ConduitConfig, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
            format: "TOML",
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        "json" => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
            format: "JSON",
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// First existing config file among the standard locations
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Non-empty environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_value<T>(key: &'static str, value: &str) -> std::result::Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue { key, message: e.to_string() })
}

fn env_parse<T>(key: &'static str) -> std::result::Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key).map(|value| parse_value(key, &value)).transpose()
}

fn env_millis(key: &'static str) -> std::result::Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

fn parse_shard(value: &str) -> std::result::Result<[u32; 2], ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "CONDUIT_SHARD",
        message: format!("expected `id,count`, got {value:?}"),
    };
    let (id, count) = value.split_once(',').ok_or_else(invalid)?;
    let id = id.trim().parse().map_err(|_| invalid())?;
    let count = count.trim().parse().map_err(|_| invalid())?;
    Ok([id, count])
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    env_var(key)
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
