use crate::config::{CameraConfig, EncodeMode, EncoderConfig, OutputConfig};
use crate::encode::{ConvertJob, EncodeDispatcher, EncoderCommand, EncoderSettings, JobStatus};
use crate::frame::CameraId;
use crate::registry::InUseRegistry;
use chrono_tz::Tz;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Which recorder a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingKind {
    Continuous,
    Motion,
}

impl fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingKind::Continuous => write!(f, "continuous"),
            RecordingKind::Motion => write!(f, "motion"),
        }
    }
}

/// Everything a recorder needs to name, write and encode its files
#[derive(Clone)]
pub struct RecorderOutput {
    pub kind: RecordingKind,
    pub camera_id: CameraId,
    /// Normalized camera name used as the file name prefix
    pub camera_name: String,
    /// Per-camera directory files are written into
    pub directory: PathBuf,
    pub mode: EncodeMode,
    pub settings: Option<EncoderSettings>,
    pub keep_intermediate: bool,
    pub save_metadata: bool,
    pub timezone: Tz,
    pub command: EncoderCommand,
    pub finalize_timeout: Duration,
    pub registry: InUseRegistry,
    pub dispatcher: Arc<EncodeDispatcher>,
}

impl RecorderOutput {
    pub fn new(
        kind: RecordingKind,
        camera: &CameraConfig,
        output: &OutputConfig,
        encoder: &EncoderConfig,
        timezone: Tz,
        registry: InUseRegistry,
        dispatcher: Arc<EncodeDispatcher>,
    ) -> Self {
        let camera_name = camera.normalized_name();
        Self {
            kind,
            camera_id: Arc::from(camera.id.as_str()),
            directory: output.directory().join(&camera_name),
            camera_name,
            mode: output.encode_to_h264,
            settings: EncoderSettings::from_output(output, camera.target_fps),
            keep_intermediate: output.keep_intermediate,
            save_metadata: output.save_metadata,
            timezone,
            command: EncoderCommand::from_config(encoder),
            finalize_timeout: Duration::from_secs(encoder.finalize_timeout_seconds),
            registry,
            dispatcher,
        }
    }

    /// Extension of the file written while recording
    pub fn extension(&self) -> &'static str {
        match self.mode {
            EncodeMode::Mjpeg | EncodeMode::Convert => "mjpeg",
            EncodeMode::Pipe => "mp4",
        }
    }

    /// Extensions a new stem must not collide with
    pub fn reserved_extensions(&self) -> &'static [&'static str] {
        match self.mode {
            EncodeMode::Mjpeg => &["mjpeg"],
            EncodeMode::Convert => &["mjpeg", "mp4"],
            EncodeMode::Pipe => &["mp4"],
        }
    }

    /// Queue mode 1 conversion of a closed file; other modes are done already.
    ///
    /// The job outcome is logged when it arrives.
    pub async fn dispatch(&self, path: &Path) {
        if self.mode != EncodeMode::Convert {
            return;
        }
        let Some(settings) = self.settings.clone() else {
            warn!(
                "No encoder settings for {} recordings of camera {}, keeping {}",
                self.kind,
                self.camera_id,
                path.display()
            );
            return;
        };

        let job = ConvertJob {
            input: path.to_path_buf(),
            output: path.with_extension("mp4"),
            settings,
            keep_intermediate: self.keep_intermediate,
        };

        match self.dispatcher.submit(job).await {
            Ok(handle) => {
                tokio::spawn(async move {
                    let report = handle.wait().await;
                    match report.status {
                        JobStatus::Converted => {
                            info!("Recording available as {}", report.output.display())
                        }
                        JobStatus::KeptIntermediate { reason } => warn!(
                            "Conversion failed after {} attempt(s), kept {}: {}",
                            report.attempts,
                            report.input.display(),
                            reason
                        ),
                        JobStatus::Abandoned => warn!(
                            "Conversion of {} abandoned at shutdown",
                            report.input.display()
                        ),
                    }
                });
            }
            Err(e) => error!(
                "Could not queue conversion of {}: {}; keeping MJPEG file",
                path.display(),
                e
            ),
        }
    }
}
