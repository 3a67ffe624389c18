// src/config.rs

//! Configuration and credential loading.
//!
//! Configuration is a TOML file; credentials and destination ids come from
//! the process environment.

use crate::error::{AppError, Result};
use crate::models::Config;
#[cfg(feature = "s3")]
use crate::storage::s3::S3Storage;

/// Environment variable holding the Discord bot token.
pub const BOT_TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";

/// Secrets needed for a delivering run.
#[derive(Clone)]
pub struct Credentials {
    pub bot_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bot_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup`. A missing or blank token is a
    /// configuration error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup(BOT_TOKEN_ENV)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::config(format!("{BOT_TOKEN_ENV} is not set")))?;
        Ok(Self { bot_token })
    }
}

/// Resolve the optional operator channel named by `pipeline.admin_channel_env`.
///
/// An unset variable disables operator notices; a set but non-numeric one
/// is a configuration error.
pub fn admin_channel<F>(config: &Config, lookup: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(var) = &config.pipeline.admin_channel_env else {
        return Ok(None);
    };
    match lookup(var).map(|v| v.trim().to_string()) {
        Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => Ok(Some(id)),
        Some(id) => Err(AppError::config(format!(
            "Invalid admin channel id in {var}: {id:?}"
        ))),
        None => {
            log::debug!("{} not set, operator notices disabled", var);
            Ok(None)
        }
    }
}

/// Config loader for Lambda environment.
///
/// `CONFIG_S3_KEY` selects an object in the storage bucket; otherwise the
/// file at `CONFIG_PATH` (default `config.toml`) is read from the bundle.
#[cfg(feature = "s3")]
pub struct LambdaConfigLoader<'a> {
    storage: &'a S3Storage,
}

#[cfg(feature = "s3")]
impl<'a> LambdaConfigLoader<'a> {
    pub fn new(storage: &'a S3Storage) -> Self {
        Self { storage }
    }

    pub async fn load_config(&self) -> Result<Config> {
        match std::env::var("CONFIG_S3_KEY") {
            Ok(key) => self.load_from_s3(&key).await,
            Err(_) => {
                let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
                log::info!("Loading config file from bundle: {}", path);
                Config::load(path)
            }
        }
    }

    async fn load_from_s3(&self, key: &str) -> Result<Config> {
        log::info!("Loading config file from S3: {}", key);
        let bytes = self
            .storage
            .read_object(key)
            .await?
            .ok_or_else(|| {
                AppError::config(format!(
                    "Config file not found in S3: s3://{}/{}",
                    self.storage.bucket(),
                    key
                ))
            })?;

        let s = String::from_utf8(bytes).map_err(|e| {
            AppError::config(format!("Config file {key} is not valid UTF-8: {e}"))
        })?;
        Config::from_toml_str(&s)
    }
}
