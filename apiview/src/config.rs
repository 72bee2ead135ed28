//! Server configuration loaded from a TOML file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppError, Result};

/// Raw file contents; every key is optional.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub listen: Option<String>,
    pub database: Option<String>,
    pub log_filter: Option<String>,
    pub user_header: Option<String>,
    pub code_file_cache: Option<bool>,
    pub code_file_cache_size: Option<usize>,
}

/// Resolved configuration with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen: SocketAddr,
    pub database: String,
    pub log_filter: String,
    pub user_header: String,
    pub code_file_cache: bool,
    pub code_file_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database: ".apiview/reviews.db".to_owned(),
            log_filter: "info".to_owned(),
            user_header: "x-apiview-user".to_owned(),
            code_file_cache: true,
            code_file_cache_size: 256,
        }
    }
}

/// Returns the path to the apiview config file.
///
/// `$APIVIEW_CONFIG` wins; otherwise prefers `$XDG_CONFIG_HOME/apiview/config.toml`
/// and falls back to `~/.config/apiview/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("APIVIEW_CONFIG") {
        return PathBuf::from(explicit);
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("apiview").join("config.toml")
}

impl Config {
    /// Loads the config at `path`, or the defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read, and a
    /// parse or validation error if its contents are invalid.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(merge(parse_config(&content)?))
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(ref listen) = config.listen {
        if listen.parse::<SocketAddr>().is_err() {
            return Err(AppError::ConfigValidation(format!(
                "listen must be an address like 127.0.0.1:5000, got {listen}"
            )));
        }
    }
    if let Some(ref header) = config.user_header {
        if axum::http::HeaderName::from_bytes(header.as_bytes()).is_err() {
            return Err(AppError::ConfigValidation(format!(
                "user_header is not a valid header name: {header}"
            )));
        }
    }
    if config.code_file_cache_size == Some(0) {
        return Err(AppError::ConfigValidation(
            "code_file_cache_size must be greater than zero".to_owned(),
        ));
    }
    Ok(())
}

fn merge(file: ConfigFile) -> Config {
    let defaults = Config::default();
    Config {
        listen: file
            .listen
            .and_then(|l| l.parse().ok())
            .unwrap_or(defaults.listen),
        database: file.database.unwrap_or(defaults.database),
        log_filter: file.log_filter.unwrap_or(defaults.log_filter),
        user_header: file
            .user_header
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or(defaults.user_header),
        code_file_cache: file.code_file_cache.unwrap_or(defaults.code_file_cache),
        code_file_cache_size: file
            .code_file_cache_size
            .unwrap_or(defaults.code_file_cache_size),
    }
}
