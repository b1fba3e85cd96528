use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Frontend configuration, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct WebConfig {
    pub backend: BackendEndpoint,
    pub cache: CacheEndpoint,
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where the RPC backend lives, and how many pooled streams to keep.
#[derive(Debug, Deserialize)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_pool_cap")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct CacheEndpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_document_root")]
    pub document_root: String,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log file path; empty means stderr.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            path: String::new(),
            level: default_log_level(),
        }
    }
}

fn default_pool_cap() -> usize {
    100
}

fn default_document_root() -> String {
    "web".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WebConfig {
    pub fn load(path: &Path) -> Result<WebConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("failed to open log file {path}: {source}")]
    LogSink {
        path: String,
        source: std::io::Error,
    },
}

/// Install the global tracing subscriber per the log configuration.
pub fn init_logging(log: &LogConfig) -> Result<(), ConfigError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.path.is_empty() {
        builder.with_writer(std::io::stderr).init();
    } else {
        let file = File::options()
            .create(true)
            .append(true)
            .open(&log.path)
            .map_err(|source| ConfigError::LogSink {
                path: log.path.clone(),
                source,
            })?;
        builder.with_writer(Arc::new(file)).with_ansi(false).init();
    }
    Ok(())
}
