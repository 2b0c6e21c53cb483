//! On-disk record store.
//!
//! Layout under the output directory:
//! - `records/{agency_id}/{file_stem}.json` - one [`DatasetRecord`] each
//! - `data/{agency_id}/{file_stem}.json` - downloaded data payloads

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::crawler::RecordSink;
use crate::models::DatasetRecord;

pub const RECORDS_SUBDIR: &str = "records";
pub const DATA_SUBDIR: &str = "data";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid record {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Background write failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory-safe form of an agency id.
fn agency_dir(agency_id: &str) -> String {
    let cleaned: String = agency_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Write `bytes` to `path` through a temporary file in the same directory.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    tmp.write_all(bytes).map_err(io_error(path))?;
    tmp.persist(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_SUBDIR)
    }

    pub fn record_path(&self, record: &DatasetRecord) -> PathBuf {
        self.records_dir()
            .join(agency_dir(&record.agency_id))
            .join(format!("{}.json", record.file_stem()))
    }

    pub fn data_path(&self, agency_id: &str, file_stem: &str) -> PathBuf {
        self.root
            .join(DATA_SUBDIR)
            .join(agency_dir(agency_id))
            .join(format!("{}.json", file_stem))
    }

    /// Write a record, replacing any earlier version with the same stem.
    pub async fn save(&self, record: &DatasetRecord) -> Result<PathBuf, StoreError> {
        let path = self.record_path(record);
        let json = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        self.write(path, json).await
    }

    /// Write a data payload for a record.
    pub async fn save_data(
        &self,
        agency_id: &str,
        file_stem: &str,
        bytes: Vec<u8>,
    ) -> Result<PathBuf, StoreError> {
        self.write(self.data_path(agency_id, file_stem), bytes).await
    }

    async fn write(&self, path: PathBuf, bytes: Vec<u8>) -> Result<PathBuf, StoreError> {
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes)).await??;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// All stored records for an agency, ordered by file name.
    pub async fn load_agency(&self, agency_id: &str) -> Result<Vec<DatasetRecord>, StoreError> {
        let dir = self.records_dir().join(agency_dir(agency_id));
        let mut paths = match json_files(&dir).await {
            Ok(paths) => paths,
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path).await.map_err(io_error(&path))?;
            let record = serde_json::from_slice(&bytes)
                .map_err(|source| StoreError::Json { path, source })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Agency ids with at least one stored record directory.
    pub async fn agencies(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.records_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let mut agencies = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            if entry.path().is_dir() {
                agencies.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        agencies.sort();
        Ok(agencies)
    }
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error(dir))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    Ok(paths)
}

#[async_trait]
impl RecordSink for RecordStore {
    async fn accept(&mut self, record: DatasetRecord) -> Result<(), StoreError> {
        self.save(&record).await.map(|_| ())
    }
}
