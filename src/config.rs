//! Configuration file parser for ~/.config/feedpipe/config.toml.
//!
//! The file is optional; a missing file yields `Config::default()`.
//! Every key supplies a default for the fetch options of each run.
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::fetch::{BasicAuth, FetchOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Top-level configuration. Any subset of keys may be given.
#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    /// User-Agent header; the crate default when unset.
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
    pub max_redirects: usize,
    /// Request gzip/deflate transfer compression.
    pub compress: bool,
    pub cookies: bool,
    /// Requests in flight per batch.
    pub max_concurrency: usize,
    pub auth: Option<AuthConfig>,
}

/// `[auth]` table for HTTP basic authentication.
#[derive(Deserialize)]
pub struct AuthConfig {
    pub username: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 30,
            max_redirects: 10,
            compress: true,
            cookies: false,
            max_concurrency: 10,
            auth: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_redirects", &self.max_redirects)
            .field("compress", &self.compress)
            .field("cookies", &self.cookies)
            .field("max_concurrency", &self.max_concurrency)
            .field("auth", &self.auth)
            .finish()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "user_agent",
        "timeout_secs",
        "max_redirects",
        "compress",
        "cookies",
        "max_concurrency",
        "auth",
    ];

    /// `~/.config/feedpipe/config.toml`, or `None` without a `HOME`.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("feedpipe")
                .join("config.toml"),
        )
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            timeout_secs = config.timeout_secs,
            max_concurrency = config.max_concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Default fetch options described by this configuration.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            user_agent: self.user_agent.clone(),
            compress: self.compress,
            timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            cookies: self.cookies,
            basic_auth: self.auth.as_ref().map(|auth| BasicAuth {
                username: auth.username.clone(),
                password: SecretString::from(auth.password.expose_secret().to_owned()),
            }),
            // zero would stall every batch
            max_concurrency: self.max_concurrency.max(1),
            ..FetchOptions::default()
        }
    }
}
