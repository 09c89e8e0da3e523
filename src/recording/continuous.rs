use super::naming;
use super::output::RecorderOutput;
use super::session::RecordingSession;
use crate::error::RecordingError;
use crate::frame::FrameData;
use crate::hub::QueueSubscription;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FRAME_WAIT: Duration = Duration::from_millis(500);

/// Counters reported when a continuous recorder stops
#[derive(Debug, Clone, Default)]
pub struct ContinuousStats {
    pub frames_written: u64,
    /// Frames not recorded while suspended after a failure
    pub frames_skipped: u64,
    /// Frames the hub discarded because the recorder fell behind
    pub frames_missed: u64,
    pub files_closed: u64,
    pub write_failures: u64,
}

/// Hour-rotated recording of every frame a camera delivers.
///
/// The frame whose timestamp reaches the rotation boundary closes the
/// current file and becomes the first frame of the next one. After a
/// write failure nothing is recorded until the next boundary.
pub struct ContinuousRecorder {
    output: RecorderOutput,
    session: Option<RecordingSession>,
    suspended_until: Option<SystemTime>,
    stats: ContinuousStats,
}

impl ContinuousRecorder {
    pub fn new(output: RecorderOutput) -> Self {
        Self {
            output,
            session: None,
            suspended_until: None,
            stats: ContinuousStats::default(),
        }
    }

    pub fn stats(&self) -> &ContinuousStats {
        &self.stats
    }

    /// Whether a file is currently open
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub async fn handle_frame(&mut self, frame: &FrameData) {
        if let Some(until) = self.suspended_until {
            if frame.timestamp < until {
                self.stats.frames_skipped += 1;
                return;
            }
            info!(
                "Camera {}: resuming continuous recording",
                self.output.camera_id
            );
            self.suspended_until = None;
        }

        let rotate = self
            .session
            .as_ref()
            .and_then(|session| session.rotate_at())
            .is_some_and(|at| frame.timestamp >= at);
        if rotate {
            debug!(
                "Camera {}: hour boundary reached at frame {}",
                self.output.camera_id, frame.seq
            );
            self.close().await;
        }

        if self.session.is_none() {
            let rotate_at = naming::next_hour_boundary(frame.timestamp, self.output.timezone);
            match RecordingSession::open(&self.output, frame.timestamp, Some(rotate_at)).await {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    error!(
                        "Camera {}: cannot open continuous recording: {}",
                        self.output.camera_id, e
                    );
                    self.stats.write_failures += 1;
                    self.stats.frames_skipped += 1;
                    self.suspended_until = Some(rotate_at);
                    return;
                }
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.write_frame(frame).await {
            Ok(()) => self.stats.frames_written += 1,
            Err(RecordingError::FrameEncoding { details }) => {
                warn!(
                    "Camera {}: skipping unrecordable frame: {}",
                    self.output.camera_id, details
                );
                self.stats.frames_skipped += 1;
            }
            Err(e) => {
                error!(
                    "Camera {}: continuous recording failed, suspended until next hour: {}",
                    self.output.camera_id, e
                );
                self.stats.write_failures += 1;
                self.stats.frames_skipped += 1;
                self.suspended_until = session.rotate_at();
                if let Some(session) = self.session.take() {
                    session.abort().await;
                }
            }
        }
    }

    /// Close the open file, if any, and queue its conversion
    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match session.finish().await {
            Ok(finished) => {
                self.stats.files_closed += 1;
                self.output.dispatch(&finished.path).await;
            }
            Err(e) => {
                self.stats.write_failures += 1;
                error!(
                    "Camera {}: failed to close continuous recording: {}",
                    self.output.camera_id, e
                );
            }
        }
    }

    /// Record frames from `frames` until `cancel` fires, then record what
    /// is still queued and close the file.
    pub fn spawn(
        mut self,
        mut frames: QueueSubscription,
        cancel: CancellationToken,
    ) -> JoinHandle<ContinuousStats> {
        tokio::spawn(async move {
            info!(
                "Continuous recorder started for camera {} in {}",
                self.output.camera_id,
                self.output.directory.display()
            );

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = frames.next_timeout(FRAME_WAIT) => {
                        if let Some(frame) = frame {
                            self.handle_frame(&frame).await;
                        }
                    }
                }
            }

            let mut drained = 0usize;
            while let Some(frame) = frames.poll() {
                self.handle_frame(&frame).await;
                drained += 1;
            }
            if drained > 0 {
                debug!(
                    "Camera {}: recorded {} queued frame(s) after stop",
                    self.output.camera_id, drained
                );
            }

            self.close().await;
            self.stats.frames_missed = frames.frames_missed();

            info!(
                "Continuous recorder stopped for camera {}: {:?}",
                self.output.camera_id, self.stats
            );
            self.stats
        })
    }
}
