use super::device::{pipeline_description, CaptureDevice, RawFrame};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::FrameFormat;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// V4L2 camera read through a GStreamer appsink
pub struct GstDevice {
    device: String,
    pipeline: Pipeline,
    rx: mpsc::Receiver<RawFrame>,
    read_timeout: Duration,
}

impl GstDevice {
    pub fn open(camera: &CameraConfig, read_timeout: Duration) -> Result<Self, CameraError> {
        let open_error = |details: String| CameraError::DeviceOpen {
            device: camera.device.clone(),
            details,
        };

        gstreamer::init().map_err(|e| open_error(format!("Failed to initialize GStreamer: {}", e)))?;

        let (description, format) = pipeline_description(camera)?;
        info!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| open_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| open_error("Failed to downcast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| open_error("Pipeline has no appsink".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| open_error("Failed to downcast to AppSink".to_string()))?;

        let (tx, rx) = mpsc::channel(4);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    match raw_from_sample(&sample, format) {
                        Some(raw) => {
                            if tx.try_send(raw).is_err() {
                                trace!("Capture reader busy, dropping sample");
                            }
                        }
                        None => debug!("Discarding malformed sample"),
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_error(format!("Failed to start pipeline: {}", e)))?;

        info!("GStreamer capture started on {}", camera.device);

        Ok(Self {
            device: camera.device.clone(),
            pipeline,
            rx,
            read_timeout,
        })
    }
}

fn raw_from_sample(sample: &gstreamer::Sample, format: FrameFormat) -> Option<RawFrame> {
    let buffer = sample.buffer()?;
    let structure = sample.caps()?.structure(0)?;
    let width = structure.get::<i32>("width").ok()?;
    let height = structure.get::<i32>("height").ok()?;
    let map = buffer.map_readable().ok()?;

    Some(RawFrame {
        data: map.as_slice().to_vec(),
        width: width as u32,
        height: height as u32,
        format,
        captured_at: SystemTime::now(),
    })
}

#[async_trait]
impl CaptureDevice for GstDevice {
    async fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        if let Some(bus) = self.pipeline.bus() {
            if let Some(message) = bus.pop_filtered(&[gstreamer::MessageType::Error]) {
                if let gstreamer::MessageView::Error(err) = message.view() {
                    return Err(CameraError::Device {
                        details: format!("{}: {}", self.device, err.error()),
                    });
                }
            }
        }

        match tokio::time::timeout(self.read_timeout, self.rx.recv()).await {
            Ok(Some(raw)) => Ok(raw),
            Ok(None) => Err(CameraError::DeviceLost {
                camera: self.device.clone(),
                failures: 0,
            }),
            Err(_) => Err(CameraError::Device {
                details: format!(
                    "{}: no frame within {:?}",
                    self.device, self.read_timeout
                ),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("v4l2 {}", self.device)
    }
}

impl Drop for GstDevice {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to release {}: {}", self.device, e);
        } else {
            debug!("Released capture device {}", self.device);
        }
    }
}
