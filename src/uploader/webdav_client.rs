use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::fmt;
use tokio::time::Duration;

use crate::errors::{AppError, AppResult};

/// Status codes a WebDAV server answers a successful PUT with.
pub const SUCCESS_STATUSES: [u16; 3] = [200, 201, 204];

pub fn is_upload_success(status: u16) -> bool {
    SUCCESS_STATUSES.contains(&status)
}

/// Fixed-delay retry policy. No exponential backoff and no jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total PUT attempts for image uploads, including the first one
    pub max_attempts: u32,
    pub delay: Duration,
    pub delete_attempts: u32,
    pub delete_delay: Duration,
    /// File uploads make a single attempt unless this is set
    pub retry_file_uploads: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
            delete_attempts: 3,
            delete_delay: Duration::from_secs(1),
            retry_file_uploads: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of one PUT, or of a whole retry sequence once it has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(u16),
    RetryableFailure(String),
    TerminalFailure(String),
}

impl AttemptOutcome {
    fn from_error(error: AppError) -> Self {
        if error.is_retryable() {
            AttemptOutcome::RetryableFailure(error.to_string())
        } else {
            AttemptOutcome::TerminalFailure(error.to_string())
        }
    }
}

/// Performs a single upload attempt. Implementations never retry on their own.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn put(
        &self,
        url: &str,
        body: Bytes,
        credentials: &Credentials,
        content_type: &str,
    ) -> AttemptOutcome;
}

/// WebDAV client doing HTTP PUT with basic auth
pub struct WebDavClient {
    client: Client,
}

impl WebDavClient {
    pub fn new() -> AppResult<Self> {
        Self::with_timeout(Duration::from_secs(120))
    }

    pub fn with_timeout(timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl UploadTransport for WebDavClient {
    async fn put(
        &self,
        url: &str,
        body: Bytes,
        credentials: &Credentials,
        content_type: &str,
    ) -> AttemptOutcome {
        let response = match self
            .client
            .put(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::from_error(e.into()),
        };

        let status = response.status().as_u16();
        if is_upload_success(status) {
            return AttemptOutcome::Success(status);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let error_text: String = error_text.chars().take(300).collect();

        AttemptOutcome::from_error(AppError::server_rejection(status, error_text))
    }
}
