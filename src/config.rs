//! Runtime configuration: command-line flags with environment fallbacks, plus
//! an optional `.env` file loaded before parsing.

use crate::cache::DEFAULT_INITIAL_LOOKBACK_SECS;
use crate::client::{ClientConfig, Credentials, DEFAULT_BASE_URL};
use chrono::TimeDelta;
use clap::Parser;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:2112";
pub const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("either --refresh-token or both --username and --password must be provided")]
    MissingCredentials,
    #[error("{0}")]
    EnvFile(String),
}

#[derive(Debug, Clone, Parser)]
#[command(name = "netatmo-exporter", version, about = "Prometheus exporter for Netatmo Energy thermostats")]
pub struct Config {
    /// Netatmo API client ID.
    #[arg(long, env = "NETATMO_CLIENT_ID")]
    pub client_id: String,

    /// Netatmo API client secret.
    #[arg(long, env = "NETATMO_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Netatmo account username (password grant).
    #[arg(long, env = "NETATMO_USERNAME")]
    pub username: Option<String>,

    /// Netatmo account password (password grant).
    #[arg(long, env = "NETATMO_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// OAuth refresh token; takes precedence over username/password.
    #[arg(long, env = "NETATMO_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Address to listen on.
    #[arg(long, env = "NETATMO_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Base URL of the Netatmo API.
    #[arg(long, env = "NETATMO_API_URL", default_value = DEFAULT_BASE_URL)]
    pub api_url: String,

    /// How far back the first measurement window reaches, in seconds.
    #[arg(long = "initial-lookback", env = "NETATMO_INITIAL_LOOKBACK_SECS", value_name = "SECS", default_value_t = DEFAULT_INITIAL_LOOKBACK_SECS)]
    pub initial_lookback_secs: u64,

    /// Upper bound for one scrape pass, in seconds.
    #[arg(long = "scrape-timeout", env = "NETATMO_SCRAPE_TIMEOUT_SECS", value_name = "SECS", default_value_t = DEFAULT_SCRAPE_TIMEOUT_SECS)]
    pub scrape_timeout_secs: u64,

    /// Timeout for a single vendor API request, in seconds.
    #[arg(long = "request-timeout", env = "NETATMO_REQUEST_TIMEOUT_SECS", value_name = "SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Dotenv file to load before reading the environment (default: ./.env if present).
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
}

impl Config {
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let non_empty = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        if let Some(token) = non_empty(&self.refresh_token) {
            return Ok(Credentials::RefreshToken(token));
        }
        match (non_empty(&self.username), self.password.clone().filter(|p| !p.is_empty())) {
            (Some(username), Some(password)) => Ok(Credentials::Password { username, password }),
            _ => Err(ConfigError::MissingCredentials),
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            base_url: self.api_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            credentials: self.credentials()?,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }

    pub fn initial_lookback(&self) -> TimeDelta {
        i64::try_from(self.initial_lookback_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }
}

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    pub explicit: bool,
}

/// Find an `--env-file` argument ahead of full parsing, so that its variables
/// can feed the `env` fallbacks of the other flags.
pub fn env_file_from_args<I: IntoIterator<Item = OsString>>(args: I) -> Result<Option<PathBuf>, ConfigError> {
    let mut args = args.into_iter().skip(1); // skip program name
    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        let value = match arg.to_str() {
            Some("--env-file") => Some(
                args.next()
                    .ok_or_else(|| ConfigError::EnvFile("`--env-file` requires a path argument".to_string()))?,
            ),
            Some(s) if s.starts_with("--env-file=") => Some(OsString::from(&s["--env-file=".len()..])),
            Some("--") => break,
            _ => None,
        };
        if let Some(value) = value {
            if env_file.is_some() {
                return Err(ConfigError::EnvFile("`--env-file` provided more than once".to_string()));
            }
            if value.is_empty() {
                return Err(ConfigError::EnvFile("`--env-file` requires a path argument".to_string()));
            }
            env_file = Some(PathBuf::from(value));
        }
    }
    Ok(env_file)
}

/// Load the explicit env file, or `./.env` when it exists.
pub fn load_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::EnvFile(format!("env file not found: {}", path.display())));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| ConfigError::EnvFile(format!("unable to read current directory: {}", e)))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        load_env_file(&default_path)?;
        Ok(Some(LoadedEnvFile {
            path: default_path,
            explicit: false,
        }))
    } else {
        Ok(None)
    }
}

fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    for (key, value) in read_env_file(path)? {
        // Preserve any value that was already supplied via the process environment.
        if std::env::var_os(&key).is_none() {
            // Called from `main` before any other thread exists.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let file = File::open(path).map_err(|e| ConfigError::EnvFile(format!("failed to open {}: {}", path.display(), e)))?;
    let mut assignments = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ConfigError::EnvFile(format!("failed to read {} at line {}: {}", path.display(), index + 1, e)))?;
        match parse_env_assignment(&line) {
            Ok(Some(kv)) => assignments.push(kv),
            Ok(None) => {}
            Err(e) => return Err(ConfigError::EnvFile(format!("{}:{}: {}", path.display(), index + 1, e))),
        }
    }
    Ok(assignments)
}

/// Parse one `KEY=VALUE` line; blank lines and `#` comments yield `None`.
fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let line = line.strip_prefix("export ").unwrap_or(line);
    let Some((key, value)) = line.split_once('=') else {
        return Err("expected KEY=VALUE".to_string());
    };
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name {:?}", key));
    }

    Ok(Some((key.to_string(), parse_env_value(value)?)))
}

/// Values are taken literally. Matching single or double quotes may wrap a
/// value containing `#` or surrounding spaces; unquoted values end at ` #`.
fn parse_env_value(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    let Some(quote) = value.chars().next().filter(|c| matches!(c, '"' | '\'')) else {
        return Ok(value.split(" #").next().unwrap_or_default().trim_end().to_string());
    };

    let (inner, rest) = value[1..]
        .split_once(quote)
        .ok_or_else(|| format!("unterminated {}-quoted value", quote))?;
    let rest = rest.trim_start();
    if rest.is_empty() || rest.starts_with('#') {
        Ok(inner.to_string())
    } else {
        Err(format!("unexpected characters after closing {} quote", quote))
    }
}
