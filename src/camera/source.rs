use super::device::{CaptureDevice, SyntheticDevice};
use crate::config::{CameraConfig, CaptureConfig};
use crate::error::CameraError;
use crate::frame::{CameraId, FrameData};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

/// Time-based frame admission to hold the delivered rate at `target_fps`
#[derive(Debug)]
pub struct FrameThrottle {
    interval: Duration,
    slack: Duration,
    next_due: Option<SystemTime>,
}

impl FrameThrottle {
    pub fn new(target_fps: u32) -> Self {
        let interval = Duration::from_micros(1_000_000 / target_fps.max(1) as u64);
        Self {
            interval,
            slack: interval / 4,
            next_due: None,
        }
    }

    /// Whether a frame captured at `timestamp` should be delivered
    pub fn admit(&mut self, timestamp: SystemTime) -> bool {
        let due = match self.next_due {
            None => {
                self.next_due = Some(timestamp + self.interval);
                return true;
            }
            Some(due) => due,
        };

        if timestamp + self.slack < due {
            return false;
        }

        // resync instead of bursting after a stall
        self.next_due = Some(if timestamp > due + self.interval {
            timestamp + self.interval
        } else {
            due + self.interval
        });
        true
    }
}

/// Bounded exponential delay between failed reads
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Sequenced, rate-limited frames from one exclusively owned device
pub struct FrameSource {
    camera_id: CameraId,
    device: Box<dyn CaptureDevice>,
    throttle: FrameThrottle,
    backoff: Backoff,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    next_seq: u64,
    frames_skipped: u64,
}

impl FrameSource {
    /// Open the configured device
    pub async fn open(camera: &CameraConfig, capture: &CaptureConfig) -> Result<Self, CameraError> {
        info!(
            "Opening camera '{}' ({}) on {}",
            camera.name, camera.id, camera.device
        );

        let device: Box<dyn CaptureDevice> = if camera.device == "synthetic" {
            Box::new(SyntheticDevice::from_config(camera))
        } else {
            open_hardware(camera, capture)?
        };

        Ok(Self::with_device(camera, capture, device))
    }

    /// Wrap an already opened device
    pub fn with_device(
        camera: &CameraConfig,
        capture: &CaptureConfig,
        device: Box<dyn CaptureDevice>,
    ) -> Self {
        debug!("Frame source for {} uses {}", camera.id, device.describe());

        Self {
            camera_id: Arc::from(camera.id.as_str()),
            device,
            throttle: FrameThrottle::new(camera.target_fps),
            backoff: Backoff::new(
                Duration::from_millis(capture.retry_backoff_initial_ms),
                Duration::from_millis(capture.retry_backoff_max_ms),
            ),
            max_consecutive_failures: capture.max_consecutive_failures.max(1),
            consecutive_failures: 0,
            next_seq: 0,
            frames_skipped: 0,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Next frame at the target rate.
    ///
    /// Transient read failures are retried with backoff; once
    /// `max_consecutive_failures` is reached this returns `DeviceLost`.
    pub async fn next_frame(&mut self) -> Result<FrameData, CameraError> {
        loop {
            match self.device.read_frame().await {
                Ok(raw) => {
                    if self.consecutive_failures > 0 {
                        info!(
                            "Camera {} recovered after {} failed read(s)",
                            self.camera_id, self.consecutive_failures
                        );
                    }
                    self.consecutive_failures = 0;
                    self.backoff.reset();

                    if !self.throttle.admit(raw.captured_at) {
                        self.frames_skipped += 1;
                        trace!("Camera {} skipped frame above target rate", self.camera_id);
                        continue;
                    }

                    let seq = self.next_seq;
                    self.next_seq += 1;
                    return Ok(FrameData::new(
                        self.camera_id.clone(),
                        seq,
                        raw.captured_at,
                        raw.data,
                        raw.width,
                        raw.height,
                        raw.format,
                    ));
                }
                Err(CameraError::DeviceLost { .. }) => {
                    return Err(CameraError::DeviceLost {
                        camera: self.camera_id.to_string(),
                        failures: self.consecutive_failures,
                    });
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= self.max_consecutive_failures {
                        return Err(CameraError::DeviceLost {
                            camera: self.camera_id.to_string(),
                            failures: self.consecutive_failures,
                        });
                    }

                    let delay = self.backoff.next_delay();
                    warn!(
                        "Camera {} read failed ({}/{}): {}; retrying in {:?}",
                        self.camera_id,
                        self.consecutive_failures,
                        self.max_consecutive_failures,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Frames delivered so far
    pub fn frames_delivered(&self) -> u64 {
        self.next_seq
    }

    /// Frames dropped to meet the target rate
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn open_hardware(
    camera: &CameraConfig,
    capture: &CaptureConfig,
) -> Result<Box<dyn CaptureDevice>, CameraError> {
    let device = super::gst::GstDevice::open(
        camera,
        Duration::from_millis(capture.read_timeout_ms),
    )?;
    Ok(Box::new(device))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn open_hardware(
    camera: &CameraConfig,
    _capture: &CaptureConfig,
) -> Result<Box<dyn CaptureDevice>, CameraError> {
    Err(CameraError::DeviceOpen {
        device: camera.device.clone(),
        details: "hardware capture requires the `camera` feature on Linux".to_string(),
    })
}
