use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_UPLOAD_CONCURRENCY};

/// Tunables of the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of upload chunks in bytes. Fixed per transfer at creation.
    pub chunk_size: u64,
    /// Maximum concurrent chunk operations per upload.
    pub upload_concurrency: usize,
    /// Persist a download resume checkpoint every this many bytes.
    /// `None` checkpoints only when a download fails or parks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_checkpoint_bytes: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            download_checkpoint_bytes: None,
        }
    }
}

impl EngineConfig {
    /// Checks the values a handler relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be positive".into());
        }
        if self.upload_concurrency == 0 {
            return Err("upload_concurrency must be at least 1".into());
        }
        if self.download_checkpoint_bytes == Some(0) {
            return Err("download_checkpoint_bytes must be positive when set".into());
        }
        Ok(())
    }
}
