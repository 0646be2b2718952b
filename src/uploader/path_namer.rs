use chrono::NaiveDateTime;
use rand::Rng;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};

/// Folder under the output root that receives payloads whose upload failed.
pub const UPLOAD_FAIL_DIR: &str = "upload-fail";

/// Suffix appended to image file names to separate uploads made within the same second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disambiguator {
    /// Random value in `0..=999`
    Random,
    /// Caller supplied index, rendered modulo 1000
    Sequence(u32),
}

impl Disambiguator {
    fn render(self) -> String {
        let value = match self {
            Disambiguator::Random => rand::rng().random_range(0..1000u32),
            Disambiguator::Sequence(index) => index % 1000,
        };
        format!("{:03}", value)
    }
}

/// Which naming rule applies to a payload.
#[derive(Debug, Clone, Copy)]
pub enum NameVariant<'a> {
    Image(Disambiguator),
    File(&'a Path),
}

/// Where a single payload goes on the WebDAV server. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub date_folder: String,
    pub file_name: String,
    pub full_url: String,
}

/// Derives time-partitioned remote names and the matching local fallback paths.
///
/// Names are not checked for existence on either side: two uploads that land on the
/// same name overwrite each other.
#[derive(Debug, Clone)]
pub struct PathNamer {
    output_dir: PathBuf,
}

impl PathNamer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Builds `{base_url}/{YYYY-MM-DD}/{file_name}` by plain concatenation.
    pub fn derive(
        &self,
        base_url: &str,
        now: NaiveDateTime,
        variant: NameVariant<'_>,
    ) -> AppResult<RemoteTarget> {
        let date_folder = now.format("%Y-%m-%d").to_string();
        let time_str = now.format("%Y%m%d_%H%M%S").to_string();

        let file_name = match variant {
            NameVariant::Image(suffix) => format!("{}_{}.png", time_str, suffix.render()),
            NameVariant::File(source) => {
                let base_name = source.file_name().ok_or_else(|| {
                    AppError::validation("file_path", "Source path has no file name")
                })?;
                let base_name = base_name.to_str().ok_or_else(|| {
                    AppError::validation("file_path", "Source file name is not valid UTF-8")
                })?;
                format!("{}_{}", time_str, base_name)
            }
        };

        let full_url = format!("{}/{}/{}", base_url, date_folder, file_name);
        log::debug!("Generated remote target: {}", full_url);

        Ok(RemoteTarget {
            date_folder,
            file_name,
            full_url,
        })
    }

    /// `{output_dir}/upload-fail/{date_folder}/{file_name}`
    pub fn local_fallback_path(&self, target: &RemoteTarget) -> PathBuf {
        self.output_dir
            .join(UPLOAD_FAIL_DIR)
            .join(&target.date_folder)
            .join(&target.file_name)
    }
}

impl Default for PathNamer {
    fn default() -> Self {
        Self::new("output")
    }
}
