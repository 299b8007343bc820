use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lore_core::{current_unix_timestamp_ms, write_text_atomic};
use serde::{Deserialize, Serialize};

use crate::{GraphStoreError, WatermarkStore};

const WATERMARK_FILE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WatermarkFile {
    schema_version: u32,
    #[serde(default)]
    streams: BTreeMap<String, WatermarkRecord>,
}

impl Default for WatermarkFile {
    fn default() -> Self {
        Self {
            schema_version: WATERMARK_FILE_SCHEMA_VERSION,
            streams: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WatermarkRecord {
    last_processed_at: DateTime<Utc>,
    updated_unix_ms: u64,
}

/// Watermarks kept in a standalone JSON file, for graph backends that should not carry
/// cursor state themselves.
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get_watermark(
        &self,
        stream_id: &str,
    ) -> Result<Option<DateTime<Utc>>, GraphStoreError> {
        let state = load_watermark_file(&self.path).map_err(file_error)?;
        Ok(state
            .streams
            .get(stream_id)
            .map(|record| record.last_processed_at))
    }

    async fn set_watermark(
        &self,
        stream_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GraphStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GraphStoreError::WatermarkFile("watermark lock poisoned".to_string()))?;
        let mut state = load_watermark_file(&self.path).map_err(file_error)?;
        state.streams.insert(
            stream_id.to_string(),
            WatermarkRecord {
                last_processed_at: timestamp,
                updated_unix_ms: current_unix_timestamp_ms(),
            },
        );
        save_watermark_file(&self.path, &state).map_err(file_error)
    }
}

fn file_error(error: anyhow::Error) -> GraphStoreError {
    GraphStoreError::WatermarkFile(format!("{error:#}"))
}

fn load_watermark_file(path: &Path) -> Result<WatermarkFile> {
    if !path.exists() {
        return Ok(WatermarkFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read watermark file {}", path.display()))?;
    let parsed = serde_json::from_str::<WatermarkFile>(&raw)
        .with_context(|| format!("failed to parse watermark file {}", path.display()))?;
    if parsed.schema_version != WATERMARK_FILE_SCHEMA_VERSION {
        bail!(
            "unsupported watermark schema_version {} in {} (expected {})",
            parsed.schema_version,
            path.display(),
            WATERMARK_FILE_SCHEMA_VERSION
        );
    }
    Ok(parsed)
}

fn save_watermark_file(path: &Path, state: &WatermarkFile) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(state).context("failed to encode watermark file")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write watermark file {}", path.display()))
}
