//! Relay configuration.
//!
//! Everything comes from the environment; the routes themselves live in the
//! routes file and are reloaded at runtime.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::proxy::DEFAULT_MAX_HEADER_BYTES;

/// Smallest accepted header region limit.
const MIN_MAX_HEADER_BYTES: usize = 64;

/// Routes file location relative to `$HOME`.
const DEFAULT_ROUTES_FILE: &str = ".config/reverse-proxy/config.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => bail!("unknown log format '{other}' (expected 'json' or 'text')"),
        }
    }
}

/// Relay configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,

    /// TOML routes file, watched for changes.
    pub routes_file: PathBuf,

    /// Upper bound for a connection's header region.
    pub max_header_bytes: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr: SocketAddr = lookup("RELAY_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("RELAY_LISTEN_ADDR must be a socket address (example: 127.0.0.1:8080).")?;

        let routes_file = match lookup("RELAY_ROUTES_FILE") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = lookup("HOME")
                    .context("HOME is not set. Set HOME or RELAY_ROUTES_FILE.")?;
                PathBuf::from(home).join(DEFAULT_ROUTES_FILE)
            }
        };

        let max_header_bytes: usize = lookup("RELAY_MAX_HEADER_BYTES")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("RELAY_MAX_HEADER_BYTES must be an integer (bytes).")?
            .unwrap_or(DEFAULT_MAX_HEADER_BYTES)
            .max(MIN_MAX_HEADER_BYTES);

        let log_level = lookup("RELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_format = lookup("RELAY_LOG_FORMAT")
            .map(|v| v.parse::<LogFormat>())
            .transpose()
            .context("RELAY_LOG_FORMAT is invalid.")?
            .unwrap_or(LogFormat::Json);

        Ok(Self {
            listen_addr,
            routes_file,
            max_header_bytes,
            log_level,
            log_format,
        })
    }
}
