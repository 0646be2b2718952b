//! Runs uploads inline or hands them to a fixed pool of background workers.
//!
//! Shutdown: [`TaskDispatcher::shutdown`] closes the queue and waits until every
//! queued upload has run to completion. There is no cancellation.
//!
//! Remote names are fixed when a request is dispatched, not when a worker runs it.

use bytes::Bytes;
use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::engine::{UploadEngine, UploadResult};
use super::report::UploadEvent;
use super::variant::{Destination, UploadOptions, UploadRequest};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Ran on the caller's task
    Completed(UploadResult),
    /// Queued for a worker; the result is not observable by the caller
    Detached(Uuid),
    /// Could not be queued
    Dropped(Uuid),
}

impl DispatchOutcome {
    pub fn result(&self) -> Option<&UploadResult> {
        match self {
            DispatchOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// Local wall-clock source used to stamp requests at dispatch
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

struct QueuedUpload {
    task_id: Uuid,
    request: UploadRequest,
    dispatched_at: NaiveDateTime,
}

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<QueuedUpload>>>;

pub struct TaskDispatcher {
    engine: Arc<UploadEngine>,
    queue_tx: mpsc::UnboundedSender<QueuedUpload>,
    workers: Vec<JoinHandle<()>>,
    clock: Clock,
}

impl TaskDispatcher {
    /// Spawns the worker pool. Must be called from within a tokio runtime.
    pub fn new(engine: Arc<UploadEngine>, config: DispatcherConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx: SharedReceiver = Arc::new(Mutex::new(queue_rx));

        let workers = (0..config.max_workers.max(1))
            .map(|worker_id| {
                tokio::spawn(Self::worker_loop(
                    worker_id,
                    engine.clone(),
                    queue_rx.clone(),
                ))
            })
            .collect();

        log::debug!(
            "Started upload dispatcher with {} worker(s)",
            config.max_workers.max(1)
        );

        Self {
            engine,
            queue_tx,
            workers,
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs `request` inline, or queues it when `run_detached` is set.
    /// The clock is read here for inline and queued runs alike.
    pub async fn run(&self, request: UploadRequest) -> DispatchOutcome {
        let dispatched_at = (self.clock)();

        if !request.options.run_detached {
            return DispatchOutcome::Completed(self.engine.upload_at(request, dispatched_at).await);
        }

        self.enqueue(request, dispatched_at)
    }

    fn enqueue(&self, request: UploadRequest, dispatched_at: NaiveDateTime) -> DispatchOutcome {
        let task_id = Uuid::new_v4();
        let kind = request.kind();

        let queued = QueuedUpload {
            task_id,
            request,
            dispatched_at,
        };
        match self.queue_tx.send(queued) {
            Ok(()) => {
                self.engine
                    .reporter()
                    .report(&UploadEvent::TaskQueued { task_id, kind });
                DispatchOutcome::Detached(task_id)
            }
            Err(_) => {
                self.engine.reporter().report(&UploadEvent::TaskDropped {
                    task_id,
                    reason: crate::errors::AppError::QueueClosed.to_string(),
                });
                DispatchOutcome::Dropped(task_id)
            }
        }
    }

    /// One independent request per image, all sharing `options`.
    /// The images are handed back untouched whatever happens to the uploads.
    pub async fn dispatch_images(
        &self,
        images: Vec<Bytes>,
        destination: &Destination,
        options: UploadOptions,
    ) -> (Vec<Bytes>, Vec<DispatchOutcome>) {
        let mut outcomes = Vec::with_capacity(images.len());

        for image in &images {
            let request = UploadRequest::image(image.clone(), destination.clone(), options);
            outcomes.push(self.run(request).await);
        }

        (images, outcomes)
    }

    /// Uploads one file and hands its original path back.
    pub async fn dispatch_file(
        &self,
        path: PathBuf,
        destination: &Destination,
        options: UploadOptions,
    ) -> (PathBuf, DispatchOutcome) {
        let request = UploadRequest::file(path.clone(), destination.clone(), options);
        let outcome = self.run(request).await;
        (path, outcome)
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn shutdown(self) {
        let TaskDispatcher {
            queue_tx, workers, ..
        } = self;
        drop(queue_tx);

        for worker in workers {
            if let Err(e) = worker.await {
                log::error!("Upload worker terminated abnormally: {}", e);
            }
        }

        log::debug!("Upload dispatcher drained");
    }

    async fn worker_loop(worker_id: usize, engine: Arc<UploadEngine>, queue_rx: SharedReceiver) {
        loop {
            let next = {
                let mut rx = queue_rx.lock().await;
                rx.recv().await
            };

            let Some(QueuedUpload {
                task_id,
                request,
                dispatched_at,
            }) = next
            else {
                break;
            };

            log::debug!("Worker {} picked up upload task {}", worker_id, task_id);
            let result = engine.upload_at(request, dispatched_at).await;
            engine.reporter().report(&UploadEvent::TaskFinished {
                task_id,
                succeeded: result.succeeded,
            });
        }

        log::debug!("Upload worker {} stopped", worker_id);
    }
}
