use std::path::PathBuf;
use std::sync::Mutex;
use tokio::time::Duration;
use uuid::Uuid;

use super::variant::UploadKind;

/// Diagnostic event emitted by the engine and dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The request could not be turned into a remote target
    Rejected { kind: UploadKind, reason: String },
    SourceUnreadable { path: PathBuf, reason: String },
    AttemptStarted {
        url: String,
        attempt: u32,
        max_attempts: u32,
    },
    AttemptFailed {
        url: String,
        attempt: u32,
        reason: String,
        retry_in: Option<Duration>,
    },
    Uploaded { url: String, status: u16, attempt: u32 },
    TerminalFailure {
        url: String,
        attempts: u32,
        reason: String,
    },
    SavedLocally { path: PathBuf },
    LocalSaveFailed { path: PathBuf, reason: String },
    /// File upload failed; the source stays where it was
    SourceKept { path: PathBuf },
    SourceDeleted { path: PathBuf, attempt: u32 },
    DeleteRetry {
        path: PathBuf,
        attempt: u32,
        reason: String,
        retry_in: Duration,
    },
    DeleteAbandoned {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },
    TaskQueued { task_id: Uuid, kind: UploadKind },
    TaskDropped { task_id: Uuid, reason: String },
    TaskFinished { task_id: Uuid, succeeded: bool },
}

/// Receives every diagnostic event. Injected into the engine.
pub trait UploadReporter: Send + Sync {
    fn report(&self, event: &UploadEvent);
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl UploadReporter for LogReporter {
    fn report(&self, event: &UploadEvent) {
        match event {
            UploadEvent::Rejected { kind, reason } => {
                log::error!("Rejected {} upload: {}", kind, reason);
            }
            UploadEvent::SourceUnreadable { path, reason } => {
                log::error!("Failed to read {}: {}", path.display(), reason);
            }
            UploadEvent::AttemptStarted {
                url,
                attempt,
                max_attempts,
            } => {
                log::info!("Uploading to {} (attempt {}/{})", url, attempt, max_attempts);
            }
            UploadEvent::AttemptFailed {
                url,
                attempt,
                reason,
                retry_in: Some(delay),
            } => {
                log::warn!(
                    "Upload attempt {} to {} failed, retrying in {:?}: {}",
                    attempt,
                    url,
                    delay,
                    reason
                );
            }
            UploadEvent::AttemptFailed {
                url,
                attempt,
                reason,
                retry_in: None,
            } => {
                log::warn!("Upload attempt {} to {} failed: {}", attempt, url, reason);
            }
            UploadEvent::Uploaded {
                url,
                status,
                attempt,
            } => {
                log::info!(
                    "Successfully uploaded to {} (status {}, attempt {})",
                    url,
                    status,
                    attempt
                );
            }
            UploadEvent::TerminalFailure {
                url,
                attempts,
                reason,
            } => {
                log::error!(
                    "Giving up on {} after {} attempt(s): {}",
                    url,
                    attempts,
                    reason
                );
            }
            UploadEvent::SavedLocally { path } => {
                log::info!("Saved failed upload locally at {}", path.display());
            }
            UploadEvent::LocalSaveFailed { path, reason } => {
                log::error!("Failed to save {} locally: {}", path.display(), reason);
            }
            UploadEvent::SourceKept { path } => {
                log::info!("Source file left in place: {}", path.display());
            }
            UploadEvent::SourceDeleted { path, attempt } => {
                log::info!("Deleted {} after upload (attempt {})", path.display(), attempt);
            }
            UploadEvent::DeleteRetry {
                path,
                attempt,
                reason,
                retry_in,
            } => {
                log::warn!(
                    "Delete attempt {} for {} failed, retrying in {:?}: {}",
                    attempt,
                    path.display(),
                    retry_in,
                    reason
                );
            }
            UploadEvent::DeleteAbandoned {
                path,
                attempts,
                reason,
            } => {
                log::error!(
                    "Gave up deleting {} after {} attempt(s): {}",
                    path.display(),
                    attempts,
                    reason
                );
            }
            UploadEvent::TaskQueued { task_id, kind } => {
                log::debug!("Queued {} upload task {}", kind, task_id);
            }
            UploadEvent::TaskDropped { task_id, reason } => {
                log::error!("Upload task {} was dropped: {}", task_id, reason);
            }
            UploadEvent::TaskFinished { task_id, succeeded } => {
                log::debug!("Upload task {} finished (succeeded: {})", task_id, succeeded);
            }
        }
    }
}

/// Keeps events in memory and forwards them to the log
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<UploadEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UploadEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(e) => {
                log::error!("Failed to acquire event log lock (non-critical): {}", e);
                Vec::new()
            }
        }
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&UploadEvent) -> bool,
    {
        self.events().iter().filter(|event| predicate(event)).count()
    }
}

impl UploadReporter for RecordingReporter {
    fn report(&self, event: &UploadEvent) {
        LogReporter.report(event);
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(e) => log::error!("Failed to record upload event (non-critical): {}", e),
        }
    }
}
