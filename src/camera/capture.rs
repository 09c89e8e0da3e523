use super::source::FrameSource;
use crate::error::CameraError;
use crate::hub::FrameHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Why a capture loop ended
#[derive(Debug)]
pub enum CaptureExit {
    /// Shutdown requested
    Stopped { frames: u64 },
    /// The device is gone; this camera's pipeline is over
    DeviceLost(CameraError),
}

/// Running capture loop for one camera
pub struct CaptureHandle {
    camera_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<CaptureExit>>,
}

impl CaptureHandle {
    /// Start reading `source` into `hub` until cancelled or the device is lost
    pub fn spawn(source: FrameSource, hub: Arc<FrameHub>, cancel: CancellationToken) -> Self {
        let camera_id = source.camera_id().to_string();
        let task = tokio::spawn(run_capture_loop(source, hub, cancel.clone()));

        Self {
            camera_id,
            cancel,
            task: Some(task),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Stop the loop and wait for the device to be released
    pub async fn stop(&mut self) -> Option<CaptureExit> {
        self.cancel.cancel();

        let task = self.task.take()?;
        match tokio::time::timeout(Duration::from_secs(3), task).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                error!("Capture task for {} failed: {}", self.camera_id, e);
                None
            }
            Err(_) => {
                warn!(
                    "Capture task for {} did not stop within timeout",
                    self.camera_id
                );
                None
            }
        }
    }
}

async fn run_capture_loop(
    mut source: FrameSource,
    hub: Arc<FrameHub>,
    cancel: CancellationToken,
) -> CaptureExit {
    info!("Capture loop started for camera {}", source.camera_id());

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break CaptureExit::Stopped { frames: source.frames_delivered() };
            }
            result = source.next_frame() => match result {
                Ok(frame) => hub.publish(frame),
                Err(e) => {
                    error!("Camera {} stopped: {}", source.camera_id(), e);
                    break CaptureExit::DeviceLost(e);
                }
            }
        }
    };

    info!(
        "Capture loop for camera {} ended after {} frame(s) ({} skipped)",
        source.camera_id(),
        source.frames_delivered(),
        source.frames_skipped()
    );
    // dropping the source releases the device
    drop(source);
    exit
}
