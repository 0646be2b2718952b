use bytes::Bytes;
use chrono::{Local, NaiveDateTime};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::sleep;

use crate::config::UploadConfig;
use crate::errors::{AppError, AppResult};

use super::path_namer::{PathNamer, RemoteTarget};
use super::report::{LogReporter, UploadEvent, UploadReporter};
use super::variant::UploadRequest;
use super::webdav_client::{AttemptOutcome, Credentials, RetryConfig, UploadTransport, WebDavClient};

/// Removes an uploaded source file. Defaults to `std::fs::remove_file`.
pub type SourceRemover = Arc<dyn Fn(&Path) -> io::Result<()> + Send + Sync>;

/// Terminal status of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResult {
    pub succeeded: bool,
    pub locally_saved: bool,
    pub local_path: Option<PathBuf>,
    pub source_deleted: bool,
    /// Network attempts made, 0 when the request never reached the network
    pub attempts: u32,
    pub remote_url: Option<String>,
}

/// Upload-with-retry-and-fallback engine.
///
/// Never returns an error: every fault is reported through the injected
/// [`UploadReporter`] and summarised in the [`UploadResult`].
pub struct UploadEngine {
    transport: Arc<dyn UploadTransport>,
    namer: PathNamer,
    retry: RetryConfig,
    reporter: Arc<dyn UploadReporter>,
    remover: SourceRemover,
}

impl UploadEngine {
    pub fn new(transport: Arc<dyn UploadTransport>, namer: PathNamer, retry: RetryConfig) -> Self {
        Self {
            transport,
            namer,
            retry,
            reporter: Arc::new(LogReporter),
            remover: Arc::new(|path: &Path| std::fs::remove_file(path)),
        }
    }

    /// Engine talking to a real WebDAV server, tuned by `config`
    pub fn from_config(config: &UploadConfig) -> AppResult<Self> {
        let client = WebDavClient::with_timeout(config.request_timeout())?;
        Ok(Self::new(
            Arc::new(client),
            PathNamer::new(&config.output_dir),
            config.retry_config(),
        ))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn UploadReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_remover(mut self, remover: SourceRemover) -> Self {
        self.remover = remover;
        self
    }

    pub fn reporter(&self) -> &Arc<dyn UploadReporter> {
        &self.reporter
    }

    /// One PUT against `target`, no retry
    pub async fn attempt(
        &self,
        body: Bytes,
        target: &RemoteTarget,
        credentials: &Credentials,
        content_type: &str,
    ) -> AttemptOutcome {
        self.transport
            .put(&target.full_url, body, credentials, content_type)
            .await
    }

    pub async fn upload_with_retry(&self, request: UploadRequest) -> UploadResult {
        self.upload_at(request, Local::now().naive_local()).await
    }

    /// Same as [`upload_with_retry`](Self::upload_with_retry) with an explicit clock reading
    pub async fn upload_at(&self, request: UploadRequest, now: NaiveDateTime) -> UploadResult {
        let UploadRequest {
            payload,
            destination,
            content_type,
            options,
        } = request;
        let variant = payload.into_variant();
        let mut result = UploadResult::default();

        let target = match variant.remote_target(&self.namer, &destination.base_url, now) {
            Ok(target) => target,
            Err(e) => {
                self.reporter.report(&UploadEvent::Rejected {
                    kind: variant.kind(),
                    reason: e.to_string(),
                });
                return result;
            }
        };
        result.remote_url = Some(target.full_url.clone());

        let body = match variant.body().await {
            Ok(body) => body,
            Err(e) => {
                self.reporter.report(&UploadEvent::SourceUnreadable {
                    path: variant.source().map(Path::to_path_buf).unwrap_or_default(),
                    reason: e.to_string(),
                });
                return result;
            }
        };

        let max_attempts = variant.max_attempts(&self.retry).max(1);
        let (outcome, attempts) = self
            .attempt_with_retry(&body, &target, &destination.credentials, &content_type, max_attempts)
            .await;
        result.attempts = attempts;

        match outcome {
            AttemptOutcome::Success(_) => {
                result.succeeded = true;
                variant.on_success(self, &options, &mut result).await;
            }
            AttemptOutcome::RetryableFailure(reason) | AttemptOutcome::TerminalFailure(reason) => {
                let error = AppError::upload_failed(reason);
                self.reporter.report(&UploadEvent::TerminalFailure {
                    url: target.full_url.clone(),
                    attempts,
                    reason: error.to_string(),
                });
                variant
                    .on_terminal_failure(self, &target, &body, &options, &mut result)
                    .await;
            }
        }

        result
    }

    /// Runs attempts in order with a fixed pause between them. Returns either
    /// `Success` or `TerminalFailure` together with the number of attempts made.
    async fn attempt_with_retry(
        &self,
        body: &Bytes,
        target: &RemoteTarget,
        credentials: &Credentials,
        content_type: &str,
        max_attempts: u32,
    ) -> (AttemptOutcome, u32) {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.reporter.report(&UploadEvent::AttemptStarted {
                url: target.full_url.clone(),
                attempt,
                max_attempts,
            });

            match self
                .attempt(body.clone(), target, credentials, content_type)
                .await
            {
                AttemptOutcome::Success(status) => {
                    self.reporter.report(&UploadEvent::Uploaded {
                        url: target.full_url.clone(),
                        status,
                        attempt,
                    });
                    return (AttemptOutcome::Success(status), attempt);
                }
                AttemptOutcome::RetryableFailure(reason) if attempt < max_attempts => {
                    self.reporter.report(&UploadEvent::AttemptFailed {
                        url: target.full_url.clone(),
                        attempt,
                        reason,
                        retry_in: Some(self.retry.delay),
                    });
                    sleep(self.retry.delay).await;
                }
                AttemptOutcome::RetryableFailure(reason)
                | AttemptOutcome::TerminalFailure(reason) => {
                    self.reporter.report(&UploadEvent::AttemptFailed {
                        url: target.full_url.clone(),
                        attempt,
                        reason: reason.clone(),
                        retry_in: None,
                    });
                    return (AttemptOutcome::TerminalFailure(reason), attempt);
                }
            }
        }
    }

    /// Writes `body` to the fallback path of `target`. Not retried.
    pub(crate) async fn save_locally(&self, target: &RemoteTarget, body: &Bytes) -> Option<PathBuf> {
        let path = self.namer.local_fallback_path(target);

        match write_fallback(&path, body).await {
            Ok(()) => {
                self.reporter
                    .report(&UploadEvent::SavedLocally { path: path.clone() });
                Some(path)
            }
            Err(source) => {
                let error = AppError::LocalWrite {
                    path: path.clone(),
                    source,
                };
                self.reporter.report(&UploadEvent::LocalSaveFailed {
                    path,
                    reason: error.to_string(),
                });
                None
            }
        }
    }

    /// Deletes an uploaded source file. Any removal error, a missing file included,
    /// is retried up to `delete_attempts` times before the file is abandoned.
    pub(crate) async fn delete_source(&self, path: &Path) -> bool {
        let max_attempts = self.retry.delete_attempts.max(1);

        for attempt in 1..=max_attempts {
            let error = match (self.remover)(path) {
                Ok(()) => {
                    self.reporter.report(&UploadEvent::SourceDeleted {
                        path: path.to_path_buf(),
                        attempt,
                    });
                    return true;
                }
                Err(e) => e,
            };

            if attempt == max_attempts {
                let error = AppError::Delete {
                    path: path.to_path_buf(),
                    reason: error.to_string(),
                };
                self.reporter.report(&UploadEvent::DeleteAbandoned {
                    path: path.to_path_buf(),
                    attempts: attempt,
                    reason: error.to_string(),
                });
                return false;
            }

            self.reporter.report(&UploadEvent::DeleteRetry {
                path: path.to_path_buf(),
                attempt,
                reason: error.to_string(),
                retry_in: self.retry.delete_delay,
            });
            sleep(self.retry.delete_delay).await;
        }

        false
    }
}

/// Directory creation is idempotent so concurrent tasks can share a date folder.
async fn write_fallback(path: &Path, body: &Bytes) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::path_namer::Disambiguator;
    use crate::uploader::report::RecordingReporter;
    use crate::uploader::variant::{Destination, UploadOptions};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::{Duration, Instant};

    /// Replays scripted outcomes, then answers with `fallback`
    struct ScriptedTransport {
        script: Mutex<VecDeque<AttemptOutcome>>,
        fallback: AttemptOutcome,
        calls: Mutex<Vec<(String, Bytes, String)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<AttemptOutcome>, fallback: AttemptOutcome) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn always(outcome: AttemptOutcome) -> Arc<Self> {
            Self::new(Vec::new(), outcome)
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl UploadTransport for ScriptedTransport {
        async fn put(
            &self,
            url: &str,
            body: Bytes,
            _credentials: &Credentials,
            content_type: &str,
        ) -> AttemptOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), body, content_type.to_string()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    fn destination() -> Destination {
        Destination::new("http://x/webdav", Credentials::new("user", "pass"))
    }

    fn engine_with(
        transport: Arc<ScriptedTransport>,
        output_dir: &Path,
    ) -> (UploadEngine, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let engine = UploadEngine::new(transport, PathNamer::new(output_dir), RetryConfig::default())
            .with_reporter(reporter.clone());
        (engine, reporter)
    }

    fn rejected() -> AttemptOutcome {
        AttemptOutcome::RetryableFailure("Server rejected upload with status 500: boom".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_has_no_delay_and_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::always(AttemptOutcome::Success(201));
        let (engine, reporter) = engine_with(transport.clone(), dir.path());

        let options = UploadOptions {
            save_local_when_fail: true,
            ..Default::default()
        };
        let request = UploadRequest::image_with_suffix(
            b"png-bytes".to_vec(),
            Disambiguator::Sequence(7),
            destination(),
            options,
        );

        let start = Instant::now();
        let result = engine.upload_at(request, fixed_time()).await;

        assert!(result.succeeded);
        assert!(!result.locally_saved);
        assert_eq!(result.attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!dir.path().join("upload-fail").exists());

        let calls = transport.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            "http://x/webdav/2024-01-02/20240102_030405_007.png"
        );
        assert_eq!(calls[0].1, Bytes::from_static(b"png-bytes"));
        assert_eq!(calls[0].2, "image/png");
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::Uploaded { status: 201, .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_retries_three_times_with_fixed_delay() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::always(rejected());
        let (engine, reporter) = engine_with(transport.clone(), dir.path());

        let start = Instant::now();
        let result = engine
            .upload_at(
                UploadRequest::image(b"png".to_vec(), destination(), UploadOptions::default()),
                fixed_time(),
            )
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.call_count(), 3);
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::AttemptFailed { retry_in: Some(_), .. })),
            2
        );
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::TerminalFailure { attempts: 3, .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(
            vec![
                AttemptOutcome::RetryableFailure("connection refused".to_string()),
                rejected(),
            ],
            AttemptOutcome::Success(204),
        );
        let (engine, _reporter) = engine_with(transport.clone(), dir.path());

        let options = UploadOptions {
            save_local_when_fail: true,
            ..Default::default()
        };
        let result = engine
            .upload_at(
                UploadRequest::image(b"png".to_vec(), destination(), options),
                fixed_time(),
            )
            .await;

        assert!(result.succeeded);
        assert_eq!(result.attempts, 3);
        assert!(!result.locally_saved);
        assert!(!dir.path().join("upload-fail").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_outcome_stops_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            ScriptedTransport::always(AttemptOutcome::TerminalFailure("bad url".to_string()));
        let (engine, _reporter) = engine_with(transport.clone(), dir.path());

        let result = engine
            .upload_at(
                UploadRequest::image(b"png".to_vec(), destination(), UploadOptions::default()),
                fixed_time(),
            )
            .await;

        assert!(!result.succeeded);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_image_is_saved_locally_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::always(rejected());
        let (engine, reporter) = engine_with(transport, dir.path());

        let options = UploadOptions {
            save_local_when_fail: true,
            ..Default::default()
        };
        let payload = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
        let result = engine
            .upload_at(
                UploadRequest::image_with_suffix(
                    payload.clone(),
                    Disambiguator::Sequence(7),
                    destination(),
                    options,
                ),
                fixed_time(),
            )
            .await;

        let expected = dir
            .path()
            .join("upload-fail")
            .join("2024-01-02")
            .join("20240102_030405_007.png");
        assert!(result.locally_saved);
        assert_eq!(result.local_path.as_deref(), Some(expected.as_path()));
        assert_eq!(std::fs::read(&expected).unwrap(), payload);

        let saved: Vec<_> = std::fs::read_dir(expected.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(saved.len(), 1);
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::SavedLocally { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_image_without_fallback_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::always(rejected());
        let (engine, _reporter) = engine_with(transport, dir.path());

        let result = engine
            .upload_at(
                UploadRequest::image(b"png".to_vec(), destination(), UploadOptions::default()),
                fixed_time(),
            )
            .await;

        assert!(!result.succeeded);
        assert!(!result.locally_saved);
        assert!(result.local_path.is_none());
        assert!(!dir.path().join("upload-fail").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the output directory should be.
        let blocked = dir.path().join("output");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let transport = ScriptedTransport::always(rejected());
        let (engine, reporter) = engine_with(transport, &blocked);

        let options = UploadOptions {
            save_local_when_fail: true,
            ..Default::default()
        };
        let result = engine
            .upload_at(
                UploadRequest::image(b"png".to_vec(), destination(), options),
                fixed_time(),
            )
            .await;

        assert!(!result.succeeded);
        assert!(!result.locally_saved);
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::LocalSaveFailed { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload_makes_single_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"video").unwrap();

        let transport = ScriptedTransport::always(rejected());
        let (engine, reporter) = engine_with(transport.clone(), dir.path());

        let options = UploadOptions {
            save_local_when_fail: true,
            delete_source_on_success: true,
            ..Default::default()
        };
        let result = engine
            .upload_at(UploadRequest::file(&source, destination(), options), fixed_time())
            .await;

        assert!(!result.succeeded);
        assert_eq!(transport.call_count(), 1);
        assert!(!result.locally_saved);
        assert!(!result.source_deleted);
        assert!(source.exists());
        assert!(!dir.path().join("upload-fail").exists());
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::SourceKept { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload_retries_when_unified() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"video").unwrap();

        let transport = ScriptedTransport::always(rejected());
        let retry = RetryConfig {
            retry_file_uploads: true,
            ..Default::default()
        };
        let engine = UploadEngine::new(transport.clone(), PathNamer::new(dir.path()), retry);

        let result = engine
            .upload_at(
                UploadRequest::file(&source, destination(), UploadOptions::default()),
                fixed_time(),
            )
            .await;

        assert!(!result.succeeded);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload_success_deletes_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"hello").unwrap();

        let transport = ScriptedTransport::always(AttemptOutcome::Success(201));
        let (engine, _reporter) = engine_with(transport.clone(), dir.path());

        let options = UploadOptions {
            delete_source_on_success: true,
            ..Default::default()
        };
        let result = engine
            .upload_at(UploadRequest::file(&source, destination(), options), fixed_time())
            .await;

        assert!(result.succeeded);
        assert!(result.source_deleted);
        assert!(!source.exists());

        let calls = transport.calls.lock().unwrap().clone();
        assert_eq!(
            calls[0].0,
            "http://x/webdav/2024-01-02/20240102_030405_notes.txt"
        );
        assert_eq!(calls[0].1, Bytes::from_static(b"hello"));
        assert_eq!(calls[0].2, "application/octet-stream");
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload_success_keeps_source_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"hello").unwrap();

        let transport = ScriptedTransport::always(AttemptOutcome::Success(200));
        let (engine, _reporter) = engine_with(transport, dir.path());

        let result = engine
            .upload_at(
                UploadRequest::file(&source, destination(), UploadOptions::default()),
                fixed_time(),
            )
            .await;

        assert!(result.succeeded);
        assert!(!result.source_deleted);
        assert!(source.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_source_delete_is_abandoned_after_three_tries() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("locked.bin");
        std::fs::write(&source, b"busy").unwrap();

        let transport = ScriptedTransport::always(AttemptOutcome::Success(201));
        let (engine, reporter) = engine_with(transport, dir.path());
        let tries = Arc::new(Mutex::new(0u32));
        let counter = tries.clone();
        let engine = engine.with_remover(Arc::new(move |_path: &Path| -> io::Result<()> {
            *counter.lock().unwrap() += 1;
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is being used by another process",
            ))
        }));

        let options = UploadOptions {
            delete_source_on_success: true,
            ..Default::default()
        };
        let start = Instant::now();
        let result = engine
            .upload_at(UploadRequest::file(&source, destination(), options), fixed_time())
            .await;

        assert!(result.succeeded);
        assert!(!result.source_deleted);
        assert!(source.exists());
        assert_eq!(*tries.lock().unwrap(), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::DeleteRetry { .. })),
            2
        );
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::DeleteAbandoned { attempts: 3, .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_source_delete_is_retried_then_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::always(AttemptOutcome::Success(201));
        let (engine, reporter) = engine_with(transport, dir.path());

        let start = Instant::now();
        let deleted = engine.delete_source(&dir.path().join("gone.bin")).await;

        assert!(!deleted);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::DeleteRetry { .. })),
            2
        );
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::DeleteAbandoned { attempts: 3, .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_name_failures_overwrite_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::always(rejected());
        let (engine, reporter) = engine_with(transport, dir.path());

        let options = UploadOptions {
            save_local_when_fail: true,
            ..Default::default()
        };
        let mut results = Vec::new();
        for payload in [b"first".to_vec(), b"second".to_vec()] {
            let request = UploadRequest::image_with_suffix(
                payload,
                Disambiguator::Sequence(7),
                destination(),
                options,
            );
            results.push(engine.upload_at(request, fixed_time()).await);
        }

        assert!(results.iter().all(|r| r.locally_saved));
        assert_eq!(results[0].local_path, results[1].local_path);
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::LocalSaveFailed { .. })),
            0
        );

        let folder = dir.path().join("upload-fail").join("2024-01-02");
        let saved: Vec<_> = std::fs::read_dir(&folder).unwrap().collect();
        assert_eq!(saved.len(), 1);
        assert_eq!(
            std::fs::read(folder.join("20240102_030405_007.png")).unwrap(),
            b"second"
        );
    }

    #[tokio::test]
    async fn test_missing_file_never_reaches_network() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::always(AttemptOutcome::Success(201));
        let (engine, reporter) = engine_with(transport.clone(), dir.path());

        let result = engine
            .upload_at(
                UploadRequest::file(dir.path().join("missing.bin"), destination(), UploadOptions::default()),
                fixed_time(),
            )
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.attempts, 0);
        assert_eq!(transport.call_count(), 0);
        assert_eq!(
            reporter.count(|e| matches!(e, UploadEvent::SourceUnreadable { .. })),
            1
        );
    }
}
