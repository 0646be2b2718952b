use regex::Regex;
use std::path::Path;
use crate::errors::{AppError, AppResult};

pub struct InputValidator;

impl InputValidator {
    /// Checks the shape of a WebDAV base URL. The URL is otherwise used verbatim:
    /// trailing slashes and special characters are passed through to the request.
    pub fn validate_webdav_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("webdav_url", "WebDAV URL cannot be empty"));
        }

        if trimmed.len() > 2048 {
            return Err(AppError::validation("webdav_url", "WebDAV URL too long"));
        }

        let url_pattern = Regex::new(r"^https?://[^\s/?#]+[^\s]*$").unwrap();
        if !url_pattern.is_match(trimmed) {
            return Err(AppError::validation(
                "webdav_url",
                "WebDAV URL must start with http:// or https:// and contain a host",
            ));
        }

        Ok(())
    }

    pub fn validate_source_file(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }

        if !path_obj.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        if path_obj.file_name().is_none() {
            return Err(AppError::validation("file_path", "Path has no file name"));
        }

        Ok(())
    }
}
