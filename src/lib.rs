pub mod config;
pub mod errors;
pub mod security;
pub mod shutdown;
pub mod uploader;

pub use config::UploadConfig;
pub use errors::{AppError, AppResult};
