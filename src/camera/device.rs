use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::FrameFormat;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::info;

/// Frame as delivered by a device, before sequencing
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub captured_at: SystemTime,
}

/// Exclusive handle on a capture device. Dropping it releases the device.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Block until the device produces its next frame
    async fn read_frame(&mut self) -> Result<RawFrame, CameraError>;

    fn describe(&self) -> String;
}

/// Built-in moving test pattern.
///
/// A bright square drifts across a gradient for a few seconds at the start
/// of every cycle and sits still otherwise, so motion detection has
/// something to find.
pub struct SyntheticDevice {
    width: u32,
    height: u32,
    fps: u32,
    frame_index: u64,
    ticker: Interval,
}

const SYNTHETIC_CYCLE_SECONDS: u64 = 20;
const SYNTHETIC_MOTION_SECONDS: u64 = 3;

impl SyntheticDevice {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let fps = fps.max(1);
        let mut ticker = interval(Duration::from_micros(1_000_000 / fps as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Synthetic capture device {}x{} @ {}fps",
            width, height, fps
        );

        Self {
            width: width.max(16),
            height: height.max(16),
            fps,
            frame_index: 0,
            ticker,
        }
    }

    pub fn from_config(camera: &CameraConfig) -> Self {
        Self::new(
            camera.width.unwrap_or(320),
            camera.height.unwrap_or(240),
            camera.source_fps.unwrap_or(camera.target_fps),
        )
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as u64, self.height as u64);
        let fps = self.fps as u64;
        let phase = self.frame_index % (SYNTHETIC_CYCLE_SECONDS * fps);
        let offset = phase.min(SYNTHETIC_MOTION_SECONDS * fps) * 4;

        let size = (w / 6).max(4);
        let x0 = offset % (w - size);
        let y0 = (h - size) / 2;

        let mut pixels = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let inside = x >= x0 && x < x0 + size && y >= y0 && y < y0 + size;
                pixels.push(if inside { 240 } else { (x * 64 / w) as u8 + 16 });
            }
        }
        pixels
    }
}

#[async_trait]
impl CaptureDevice for SyntheticDevice {
    async fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        self.ticker.tick().await;

        let data = self.render();
        self.frame_index += 1;

        Ok(RawFrame {
            data,
            width: self.width,
            height: self.height,
            format: FrameFormat::Gray8,
            captured_at: SystemTime::now(),
        })
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}@{}", self.width, self.height, self.fps)
    }
}

/// Device node for a configured device string (`0` -> `/dev/video0`)
pub(crate) fn device_path(device: &str) -> String {
    match device.parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => device.to_string(),
    }
}

/// GStreamer description for a V4L2 camera
#[cfg_attr(
    not(all(feature = "camera", target_os = "linux")),
    allow(dead_code)
)]
pub(crate) fn pipeline_description(
    camera: &CameraConfig,
) -> Result<(String, FrameFormat), CameraError> {
    let (media, format) = match camera.source_format.as_deref().unwrap_or("MJPG") {
        "MJPG" => ("image/jpeg".to_string(), FrameFormat::Mjpeg),
        "YUYV" => ("video/x-raw,format=YUY2".to_string(), FrameFormat::Yuyv),
        other => {
            return Err(CameraError::Unsupported {
                details: format!("source_format '{}' (use MJPG or YUYV)", other),
            })
        }
    };

    let mut caps = media;
    if let Some(width) = camera.width {
        caps.push_str(&format!(",width={}", width));
    }
    if let Some(height) = camera.height {
        caps.push_str(&format!(",height={}", height));
    }
    if let Some(fps) = camera.source_fps {
        caps.push_str(&format!(",framerate={}/1", fps));
    }

    let description = format!(
        "v4l2src device={} do-timestamp=true ! {} ! \
         queue max-size-buffers=4 leaky=downstream ! \
         appsink name=sink sync=false max-buffers=4 drop=true emit-signals=false",
        device_path(&camera.device),
        caps
    );

    Ok((description, format))
}
