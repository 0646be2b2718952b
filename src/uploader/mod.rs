// Main uploader module - path naming, the retry engine and task dispatch
//
// This module is responsible for delivering payloads to a WebDAV server

pub mod dispatcher;
pub mod engine;
pub mod path_namer;
pub mod report;
pub mod variant;
pub mod webdav_client;

pub use dispatcher::{Clock, DispatchOutcome, DispatcherConfig, TaskDispatcher};
pub use engine::{SourceRemover, UploadEngine, UploadResult};
pub use path_namer::{Disambiguator, NameVariant, PathNamer, RemoteTarget};
pub use report::{LogReporter, RecordingReporter, UploadEvent, UploadReporter};
pub use variant::{Destination, Payload, UploadKind, UploadOptions, UploadRequest};
pub use webdav_client::{AttemptOutcome, Credentials, RetryConfig, UploadTransport, WebDavClient};
