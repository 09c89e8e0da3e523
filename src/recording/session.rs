use super::naming;
use super::output::{RecorderOutput, RecordingKind};
use crate::config::EncodeMode;
use crate::encode::EncoderProcess;
use crate::error::{EncodeError, RecordingError};
use crate::frame::FrameData;
use crate::registry::PathLease;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

/// JPEG quality used when raw frames are recorded
const RECORDING_JPEG_QUALITY: u8 = 90;

enum SessionSink {
    /// Concatenated JPEG frames (modes 0 and 1)
    Mjpeg(BufWriter<File>),
    /// Frames piped to a live encoder (mode 2)
    Encoder(EncoderProcess),
}

/// A file that was closed cleanly
#[derive(Debug)]
pub struct FinishedRecording {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: u64,
    pub lease: PathLease,
}

/// One open recording file and its single writer
pub struct RecordingSession {
    kind: RecordingKind,
    path: PathBuf,
    started_at: SystemTime,
    rotate_at: Option<SystemTime>,
    sink: SessionSink,
    frames_written: u64,
    bytes_written: u64,
    _lease: PathLease,
}

impl RecordingSession {
    /// Create the next file for `output`, named after `started_at`
    pub async fn open(
        output: &RecorderOutput,
        started_at: SystemTime,
        rotate_at: Option<SystemTime>,
    ) -> Result<Self, RecordingError> {
        tokio::fs::create_dir_all(&output.directory)
            .await
            .map_err(|source| RecordingError::Open {
                path: output.directory.clone(),
                source,
            })?;

        let base = naming::file_stem(&output.camera_name, started_at, output.timezone);
        let stem = naming::unique_stem(&output.directory, &base, output.reserved_extensions()).await;
        let path = naming::path_for(&output.directory, &stem, output.extension());
        let lease = output.registry.lease(&path);

        let sink = match output.mode {
            EncodeMode::Mjpeg | EncodeMode::Convert => {
                let file = File::create(&path)
                    .await
                    .map_err(|source| RecordingError::Open {
                        path: path.clone(),
                        source,
                    })?;
                SessionSink::Mjpeg(BufWriter::new(file))
            }
            EncodeMode::Pipe => {
                let settings = output.settings.as_ref().ok_or_else(|| {
                    RecordingError::EncoderFailed {
                        path: path.clone(),
                        source: EncodeError::Fatal {
                            details: "no encoder configured for mode 2".to_string(),
                        },
                    }
                })?;
                let process = EncoderProcess::spawn(
                    &output.command,
                    settings,
                    &path,
                    output.finalize_timeout,
                )
                .map_err(|source| RecordingError::EncoderFailed {
                    path: path.clone(),
                    source,
                })?;
                SessionSink::Encoder(process)
            }
        };

        info!(
            "Camera {}: opened {} recording {}",
            output.camera_id,
            output.kind,
            path.display()
        );

        Ok(Self {
            kind: output.kind,
            path,
            started_at,
            rotate_at,
            sink,
            frames_written: 0,
            bytes_written: 0,
            _lease: lease,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Time at which the continuous recorder moves to a new file
    pub fn rotate_at(&self) -> Option<SystemTime> {
        self.rotate_at
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub async fn write_frame(&mut self, frame: &FrameData) -> Result<(), RecordingError> {
        let jpeg = frame.to_jpeg(RECORDING_JPEG_QUALITY)?;

        match &mut self.sink {
            SessionSink::Mjpeg(writer) => {
                writer
                    .write_all(&jpeg)
                    .await
                    .map_err(|source| RecordingError::WriteFailure {
                        path: self.path.clone(),
                        source,
                    })?;
            }
            SessionSink::Encoder(process) => {
                process
                    .write_frame(&jpeg)
                    .await
                    .map_err(|source| RecordingError::EncoderFailed {
                        path: self.path.clone(),
                        source,
                    })?;
            }
        }

        self.frames_written += 1;
        self.bytes_written += jpeg.len() as u64;
        Ok(())
    }

    /// Flush and close the file. A piped encoder is given its finalize
    /// timeout; if it fails the file is renamed `*.corrupt.mp4`.
    pub async fn finish(self) -> Result<FinishedRecording, RecordingError> {
        let Self {
            kind,
            path,
            sink,
            frames_written,
            bytes_written,
            _lease: lease,
            ..
        } = self;

        match sink {
            SessionSink::Mjpeg(mut writer) => {
                let flushed = async {
                    writer.flush().await?;
                    writer.get_mut().sync_all().await
                };
                flushed
                    .await
                    .map_err(|source| RecordingError::WriteFailure {
                        path: path.clone(),
                        source,
                    })?;
            }
            SessionSink::Encoder(process) => {
                if let Err(source) = process.finish().await {
                    mark_corrupt(&path).await;
                    return Err(RecordingError::EncoderFailed { path, source });
                }
            }
        }

        info!(
            "Closed {} recording {} ({} frames, {} bytes)",
            kind,
            path.display(),
            frames_written,
            bytes_written
        );

        Ok(FinishedRecording {
            path,
            frames: frames_written,
            bytes: bytes_written,
            lease,
        })
    }

    /// Give up on the file after a failure; whatever reached disk stays
    pub async fn abort(self) {
        warn!(
            "Aborting {} recording {} after {} frame(s)",
            self.kind,
            self.path.display(),
            self.frames_written
        );

        match self.sink {
            SessionSink::Mjpeg(mut writer) => {
                if let Err(e) = writer.flush().await {
                    debug!("Flush of aborted {} failed: {}", self.path.display(), e);
                }
            }
            SessionSink::Encoder(process) => {
                process.abort().await;
                mark_corrupt(&self.path).await;
            }
        }
    }
}

/// Rename a broken mode 2 file to `<stem>.corrupt.mp4`
async fn mark_corrupt(path: &Path) {
    let corrupt = path.with_extension("corrupt.mp4");
    match tokio::fs::rename(path, &corrupt).await {
        Ok(()) => warn!("Marked {} as corrupt", corrupt.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No output to mark corrupt at {}", path.display())
        }
        Err(e) => error!("Failed to mark {} corrupt: {}", path.display(), e),
    }
}
