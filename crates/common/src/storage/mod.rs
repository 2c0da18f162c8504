//! Extract file storage
//!
//! Owns the data directory extract files are written to. File names embed
//! the survey id and a second-resolution timestamp so the newest extract
//! for a survey can be recovered from the name alone.

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Timestamp layout embedded in extract file names
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A freshly stored extract file
#[derive(Debug, Clone)]
pub struct StoredExtract {
    pub file_name: String,
    pub path: PathBuf,
    pub byte_size: usize,
    pub content_hash: String,
}

/// Store for downloaded extract files
#[derive(Debug, Clone)]
pub struct ExtractStore {
    data_dir: PathBuf,
    file_prefix: String,
}

impl ExtractStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            file_prefix: config.file_prefix.clone(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// File name for an extract generated at the given instant
    pub fn generate_file_name(&self, survey_id: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{}.csv",
            self.file_prefix,
            survey_id,
            at.format(FILE_TIMESTAMP_FORMAT)
        )
    }

    /// Write extract bytes under a generated timestamped name
    ///
    /// A re-extract within the same second overwrites the previous file.
    pub async fn store_extract(
        &self,
        survey_id: &str,
        bytes: &[u8],
        at: DateTime<Utc>,
    ) -> Result<StoredExtract> {
        let file_name = self.generate_file_name(survey_id, at);
        let path = self.data_dir.join(&file_name);

        fs::create_dir_all(&self.data_dir).await?;
        fs::write(&path, bytes).await?;

        Ok(StoredExtract {
            file_name,
            path,
            byte_size: bytes.len(),
            content_hash: Self::sha256_hex(bytes),
        })
    }

    /// Find the most recent extract file for a survey by its embedded timestamp
    pub async fn latest_extract_path(&self, survey_id: &str) -> Result<PathBuf> {
        let timestamp_pattern = regex_lite::Regex::new(r"_(\d{14})\.csv$").unwrap();

        let mut latest: Option<(String, PathBuf)> = None;
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.no_extract_found(survey_id));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();

            if !file_name.contains(survey_id) {
                continue;
            }

            let Some(captures) = timestamp_pattern.captures(&file_name) else {
                continue;
            };
            let timestamp = captures[1].to_string();

            match &latest {
                Some((best, _)) if *best >= timestamp => {}
                _ => latest = Some((timestamp, entry.path())),
            }
        }

        latest
            .map(|(_, path)| path)
            .ok_or_else(|| self.no_extract_found(survey_id))
    }

    fn no_extract_found(&self, survey_id: &str) -> AppError {
        AppError::NotFound {
            resource_type: "extract file".to_string(),
            id: survey_id.to_string(),
        }
    }
}
