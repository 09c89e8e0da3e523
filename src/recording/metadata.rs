use crate::analyzer::MotionEvent;
use crate::config::EncodeMode;
use crate::error::RecordingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// JSON sidecar written next to a motion recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub camera_id: String,
    pub camera_name: String,
    pub started_at: DateTime<Utc>,
    pub last_motion: DateTime<Utc>,
    pub duration_ms: u64,
    pub pre_capture_frames: usize,
    pub total_frames: usize,
    pub merges: u32,
    /// File name of the recording, relative to the sidecar
    pub recording: String,
    pub encode_mode: EncodeMode,
}

impl EventMetadata {
    /// Describe `event` before its frames are consumed
    pub fn from_event(event: &MotionEvent, camera_name: &str, encode_mode: EncodeMode) -> Self {
        Self {
            event_id: event.id(),
            camera_id: event.camera_id().to_string(),
            camera_name: camera_name.to_string(),
            started_at: event.started_at().into(),
            last_motion: event.last_motion().into(),
            duration_ms: event.duration().as_millis() as u64,
            pre_capture_frames: event.pre_capture_frames(),
            total_frames: event.frame_count(),
            merges: event.merges(),
            recording: String::new(),
            encode_mode,
        }
    }

    /// Sidecar path for a recording: same stem, `.json`
    pub fn sidecar_path(recording: &Path) -> PathBuf {
        recording.with_extension("json")
    }

    /// Write the sidecar for `recording`, returning its path
    pub async fn save(mut self, recording: &Path) -> Result<PathBuf, RecordingError> {
        self.recording = recording
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let path = Self::sidecar_path(recording);
        let json = serde_json::to_vec_pretty(&self).map_err(|e| RecordingError::Finalize {
            path: path.clone(),
            details: format!("failed to serialize event metadata: {}", e),
        })?;

        fs::write(&path, json)
            .await
            .map_err(|source| RecordingError::WriteFailure {
                path: path.clone(),
                source,
            })?;

        debug!("Saved event metadata to {}", path.display());
        Ok(path)
    }
}
