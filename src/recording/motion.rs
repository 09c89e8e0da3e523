use super::metadata::EventMetadata;
use super::output::RecorderOutput;
use super::session::RecordingSession;
use crate::analyzer::MotionEvent;
use crate::error::RecordingError;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct MotionRecorderStats {
    pub events_recorded: u64,
    pub frames_written: u64,
    pub failures: u64,
}

/// Turns each closed motion event into one recording file
pub struct MotionRecorder {
    output: RecorderOutput,
    stats: MotionRecorderStats,
}

impl MotionRecorder {
    pub fn new(output: RecorderOutput) -> Self {
        Self {
            output,
            stats: MotionRecorderStats::default(),
        }
    }

    pub fn stats(&self) -> &MotionRecorderStats {
        &self.stats
    }

    /// Write the event's frames in capture order, close the file, then
    /// save the sidecar and queue conversion.
    pub async fn record_event(&mut self, event: MotionEvent) -> Result<PathBuf, RecordingError> {
        let metadata = self.output.save_metadata.then(|| {
            EventMetadata::from_event(&event, &self.output.camera_name, self.output.mode)
        });
        let event_id = event.id();
        let started_at = event.started_at();

        let mut frames = event.into_frames();
        if frames.is_empty() {
            return Err(RecordingError::Finalize {
                path: self.output.directory.clone(),
                details: format!("motion event {} has no frames", event_id),
            });
        }
        frames.sort_by_key(|frame| (frame.timestamp, frame.seq));

        let mut session = RecordingSession::open(&self.output, started_at, None).await?;
        for frame in &frames {
            match session.write_frame(frame).await {
                Ok(()) => {}
                Err(RecordingError::FrameEncoding { details }) => {
                    warn!("Event {}: skipping frame: {}", event_id, details);
                }
                Err(e) => {
                    session.abort().await;
                    return Err(e);
                }
            }
        }

        let finished = session.finish().await?;
        self.stats.frames_written += finished.frames;

        if let Some(metadata) = metadata {
            if let Err(e) = metadata.save(&finished.path).await {
                warn!("Event {}: metadata not saved: {}", event_id, e);
            }
        }

        self.output.dispatch(&finished.path).await;
        Ok(finished.path)
    }

    /// Record events from `events` until the channel closes. The sender
    /// side is the motion task, which delivers its last event on stop.
    pub fn spawn(mut self, mut events: mpsc::Receiver<MotionEvent>) -> JoinHandle<MotionRecorderStats> {
        tokio::spawn(async move {
            debug!(
                "Motion recorder started for camera {}",
                self.output.camera_id
            );

            while let Some(event) = events.recv().await {
                let event_id = event.id();
                let frames = event.frame_count();
                match self.record_event(event).await {
                    Ok(path) => {
                        self.stats.events_recorded += 1;
                        info!(
                            "Camera {}: motion event {} recorded to {} ({} frames)",
                            self.output.camera_id,
                            event_id,
                            path.display(),
                            frames
                        );
                    }
                    Err(e) => {
                        self.stats.failures += 1;
                        error!(
                            "Camera {}: motion event {} not recorded: {}",
                            self.output.camera_id, event_id, e
                        );
                    }
                }
            }

            info!(
                "Motion recorder stopped for camera {}: {:?}",
                self.output.camera_id, self.stats
            );
            self.stats
        })
    }
}
