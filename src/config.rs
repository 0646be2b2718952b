use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::{Credentials, Destination, DispatcherConfig, RetryConfig, UploadOptions};

/// Flat upload configuration, stored as JSON
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub webdav_url: String,
    pub webdav_username: String,
    pub webdav_password: String,
    pub save_local_when_fail: bool,
    #[serde(rename = "delAfterUpload")]
    pub del_after_upload: bool,
    pub async_upload: bool,
    /// Root of the local fallback tree (`{output_dir}/upload-fail/...`)
    pub output_dir: PathBuf,
    pub max_upload_attempts: u32,
    pub retry_delay_ms: u64,
    pub delete_attempts: u32,
    pub delete_retry_delay_ms: u64,
    pub retry_file_uploads: bool,
    pub request_timeout_secs: u64,
    pub max_workers: usize,
    pub log_level: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            webdav_url: String::new(),
            webdav_username: String::new(),
            webdav_password: String::new(),
            save_local_when_fail: false,
            del_after_upload: false,
            async_upload: false,
            output_dir: PathBuf::from("output"),
            max_upload_attempts: 3,
            retry_delay_ms: 3000,
            delete_attempts: 3,
            delete_retry_delay_ms: 1000,
            retry_file_uploads: false,
            request_timeout_secs: 120,
            max_workers: 4,
            log_level: "info".to_string(),
        }
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("webdav_url", &self.webdav_url)
            .field("webdav_username", &self.webdav_username)
            .field("webdav_password", &"<redacted>")
            .field("save_local_when_fail", &self.save_local_when_fail)
            .field("del_after_upload", &self.del_after_upload)
            .field("async_upload", &self.async_upload)
            .field("output_dir", &self.output_dir)
            .field("max_upload_attempts", &self.max_upload_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("delete_attempts", &self.delete_attempts)
            .field("delete_retry_delay_ms", &self.delete_retry_delay_ms)
            .field("retry_file_uploads", &self.retry_file_uploads)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_workers", &self.max_workers)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl UploadConfig {
    /// Starting point written by `init`
    pub fn template() -> Self {
        Self {
            webdav_url: "http://example.com/webdav".to_string(),
            webdav_username: "username".to_string(),
            webdav_password: "password".to_string(),
            ..Self::default()
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.webdav_username, &self.webdav_password)
    }

    pub fn destination(&self) -> Destination {
        Destination::new(&self.webdav_url, self.credentials())
    }

    pub fn options(&self) -> UploadOptions {
        UploadOptions {
            save_local_when_fail: self.save_local_when_fail,
            delete_source_on_success: self.del_after_upload,
            run_detached: self.async_upload,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_upload_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
            delete_attempts: self.delete_attempts,
            delete_delay: Duration::from_millis(self.delete_retry_delay_ms),
            retry_file_uploads: self.retry_file_uploads,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_workers: self.max_workers,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn get_default_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("webdav-uploader");

    Ok(config_dir.join("config.json"))
}

/// Reads and validates the config at `path`
pub fn load_config(path: &Path) -> AppResult<UploadConfig> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let config_str = fs::read_to_string(path)?;
    let config: UploadConfig = serde_json::from_str(&config_str)?;

    validate_config(&config)?;

    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Loads `path` if given, else the default location if a file exists there,
/// else built-in defaults. The result is not validated so callers can apply
/// overrides first.
pub fn load_config_or_default(path: Option<&Path>) -> AppResult<UploadConfig> {
    let config_path = match path {
        Some(path) => {
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => {
            let default_path = get_default_config_path()?;
            if !default_path.exists() {
                log::debug!("No config file at {}, using defaults", default_path.display());
                return Ok(UploadConfig::default());
            }
            default_path
        }
    };

    let config_str = fs::read_to_string(&config_path)?;
    Ok(serde_json::from_str(&config_str)?)
}

pub fn save_config(config: &UploadConfig, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Create backup of existing config
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str)?;

    log::info!("Configuration saved to {}", path.display());
    Ok(())
}

pub fn validate_config(config: &UploadConfig) -> AppResult<()> {
    InputValidator::validate_webdav_url(&config.webdav_url)?;

    if config.max_upload_attempts == 0 || config.max_upload_attempts > 10 {
        return Err(AppError::validation("max_upload_attempts", "Must be between 1 and 10"));
    }

    if config.delete_attempts == 0 || config.delete_attempts > 10 {
        return Err(AppError::validation("delete_attempts", "Must be between 1 and 10"));
    }

    if config.max_workers == 0 || config.max_workers > 64 {
        return Err(AppError::validation("max_workers", "Must be between 1 and 64"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    if config.output_dir.as_os_str().is_empty() {
        return Err(AppError::validation("output_dir", "Cannot be empty"));
    }

    let valid_log_levels = ["off", "error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}
