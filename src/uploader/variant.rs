use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::AppResult;

use super::engine::{UploadEngine, UploadResult};
use super::path_namer::{Disambiguator, NameVariant, PathNamer, RemoteTarget};
use super::report::UploadEvent;
use super::webdav_client::{Credentials, RetryConfig};

pub const IMAGE_CONTENT_TYPE: &str = "image/png";
pub const FILE_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    File,
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadKind::Image => f.write_str("image"),
            UploadKind::File => f.write_str("file"),
        }
    }
}

/// WebDAV base URL plus the account used for it
#[derive(Debug, Clone)]
pub struct Destination {
    pub base_url: String,
    pub credentials: Credentials,
}

impl Destination {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// Image uploads only: write the payload under the output root after the last failed attempt
    pub save_local_when_fail: bool,
    /// File uploads only: remove the source once the server accepted it
    pub delete_source_on_success: bool,
    pub run_detached: bool,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Image { data: Bytes, suffix: Disambiguator },
    File { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub payload: Payload,
    pub destination: Destination,
    pub content_type: String,
    pub options: UploadOptions,
}

impl UploadRequest {
    pub fn image(data: impl Into<Bytes>, destination: Destination, options: UploadOptions) -> Self {
        Self::image_with_suffix(data, Disambiguator::Random, destination, options)
    }

    pub fn image_with_suffix(
        data: impl Into<Bytes>,
        suffix: Disambiguator,
        destination: Destination,
        options: UploadOptions,
    ) -> Self {
        Self {
            payload: Payload::Image {
                data: data.into(),
                suffix,
            },
            destination,
            content_type: IMAGE_CONTENT_TYPE.to_string(),
            options,
        }
    }

    pub fn file(path: impl Into<PathBuf>, destination: Destination, options: UploadOptions) -> Self {
        Self {
            payload: Payload::File { path: path.into() },
            destination,
            content_type: FILE_CONTENT_TYPE.to_string(),
            options,
        }
    }

    pub fn kind(&self) -> UploadKind {
        match self.payload {
            Payload::Image { .. } => UploadKind::Image,
            Payload::File { .. } => UploadKind::File,
        }
    }
}

impl Payload {
    pub(crate) fn into_variant(self) -> Box<dyn UploadVariant> {
        match self {
            Payload::Image { data, suffix } => Box::new(ImageUpload { data, suffix }),
            Payload::File { path } => Box::new(FileUpload { path }),
        }
    }
}

/// Per-variant behaviour around the shared attempt loop
#[async_trait]
pub(crate) trait UploadVariant: Send + Sync {
    fn kind(&self) -> UploadKind;

    /// On-disk source of the payload, if it has one
    fn source(&self) -> Option<&Path> {
        None
    }

    fn remote_target(
        &self,
        namer: &PathNamer,
        base_url: &str,
        now: NaiveDateTime,
    ) -> AppResult<RemoteTarget>;

    async fn body(&self) -> AppResult<Bytes>;

    fn max_attempts(&self, retry: &RetryConfig) -> u32;

    async fn on_success(
        &self,
        engine: &UploadEngine,
        options: &UploadOptions,
        result: &mut UploadResult,
    );

    async fn on_terminal_failure(
        &self,
        engine: &UploadEngine,
        target: &RemoteTarget,
        body: &Bytes,
        options: &UploadOptions,
        result: &mut UploadResult,
    );
}

/// In-memory PNG produced by the image pipeline
struct ImageUpload {
    data: Bytes,
    suffix: Disambiguator,
}

#[async_trait]
impl UploadVariant for ImageUpload {
    fn kind(&self) -> UploadKind {
        UploadKind::Image
    }

    fn remote_target(
        &self,
        namer: &PathNamer,
        base_url: &str,
        now: NaiveDateTime,
    ) -> AppResult<RemoteTarget> {
        namer.derive(base_url, now, NameVariant::Image(self.suffix))
    }

    async fn body(&self) -> AppResult<Bytes> {
        Ok(self.data.clone())
    }

    fn max_attempts(&self, retry: &RetryConfig) -> u32 {
        retry.max_attempts
    }

    async fn on_success(
        &self,
        _engine: &UploadEngine,
        _options: &UploadOptions,
        _result: &mut UploadResult,
    ) {
    }

    async fn on_terminal_failure(
        &self,
        engine: &UploadEngine,
        target: &RemoteTarget,
        body: &Bytes,
        options: &UploadOptions,
        result: &mut UploadResult,
    ) {
        if !options.save_local_when_fail {
            return;
        }

        if let Some(path) = engine.save_locally(target, body).await {
            result.locally_saved = true;
            result.local_path = Some(path);
        }
    }
}

/// Existing file on disk, uploaded as-is
struct FileUpload {
    path: PathBuf,
}

#[async_trait]
impl UploadVariant for FileUpload {
    fn kind(&self) -> UploadKind {
        UploadKind::File
    }

    fn source(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn remote_target(
        &self,
        namer: &PathNamer,
        base_url: &str,
        now: NaiveDateTime,
    ) -> AppResult<RemoteTarget> {
        namer.derive(base_url, now, NameVariant::File(&self.path))
    }

    async fn body(&self) -> AppResult<Bytes> {
        let contents = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(contents))
    }

    fn max_attempts(&self, retry: &RetryConfig) -> u32 {
        if retry.retry_file_uploads {
            retry.max_attempts
        } else {
            1
        }
    }

    async fn on_success(
        &self,
        engine: &UploadEngine,
        options: &UploadOptions,
        result: &mut UploadResult,
    ) {
        if options.delete_source_on_success {
            result.source_deleted = engine.delete_source(&self.path).await;
        }
    }

    async fn on_terminal_failure(
        &self,
        engine: &UploadEngine,
        _target: &RemoteTarget,
        _body: &Bytes,
        _options: &UploadOptions,
        _result: &mut UploadResult,
    ) {
        engine.reporter().report(&UploadEvent::SourceKept {
            path: self.path.clone(),
        });
    }
}
