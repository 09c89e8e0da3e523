use super::context::AppContext;
use crate::analyzer::{MotionAnalysisMetrics, MotionTask};
use crate::camera::{CaptureExit, CaptureHandle, FrameSource};
use crate::config::CameraConfig;
use crate::frame::CameraId;
use crate::hub::{FrameHub, SubscriberKind};
use crate::recording::{
    ContinuousRecorder, ContinuousStats, MotionRecorder, MotionRecorderStats, RecordingKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time a recorder gets to write out what it holds at shutdown
const RECORDER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

struct ContinuousTask {
    cancel: CancellationToken,
    task: JoinHandle<ContinuousStats>,
}

#[cfg(feature = "streaming")]
struct StreamTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Every task serving one camera: capture, hub, motion detection, the
/// two recorders and the stream server.
pub struct CameraPipeline {
    camera_id: CameraId,
    hub: Arc<FrameHub>,
    capture: CaptureHandle,
    motion: Option<MotionTask>,
    motion_recorder: Option<JoinHandle<MotionRecorderStats>>,
    continuous: Option<ContinuousTask>,
    #[cfg(feature = "streaming")]
    stream: Option<StreamTask>,
}

impl CameraPipeline {
    /// Wire consumers to a hub, then start capture from `source`
    pub fn start(context: &AppContext, camera: &CameraConfig, source: FrameSource) -> Self {
        let camera_id: CameraId = Arc::from(camera.id.as_str());
        let config = &context.config;
        let hub = Arc::new(FrameHub::new(
            camera_id.clone(),
            config.capture.recorder_queue_depth,
        ));

        // consumers subscribe before the first frame is published
        let continuous = config.recordings.save.then(|| {
            let cancel = CancellationToken::new();
            let output = context.recorder_output(RecordingKind::Continuous, camera);
            let queue = hub.subscribe(SubscriberKind::Recorder).into_queued();
            queue.map(|queue| ContinuousTask {
                task: ContinuousRecorder::new(output).spawn(queue, cancel.clone()),
                cancel,
            })
        });
        let continuous = continuous.flatten();

        let (motion, motion_recorder) = if camera.motion.enabled && config.motion.save {
            let (tx, rx) = mpsc::channel(config.capture.motion_event_queue.max(1));
            let output = context.recorder_output(RecordingKind::Motion, camera);
            let recorder = MotionRecorder::new(output).spawn(rx);
            let task = MotionTask::spawn(
                camera_id.clone(),
                &camera.motion,
                hub.subscribe(SubscriberKind::Motion),
                tx,
                CancellationToken::new(),
            );
            (Some(task), Some(recorder))
        } else {
            info!("Camera {}: motion recording disabled", camera_id);
            (None, None)
        };

        #[cfg(feature = "streaming")]
        let stream = Some(start_stream(camera, Arc::clone(&hub)));

        let capture = CaptureHandle::spawn(source, Arc::clone(&hub), CancellationToken::new());

        info!(
            "Camera {} pipeline started (continuous: {}, motion: {})",
            camera_id,
            continuous.is_some(),
            motion.is_some()
        );

        Self {
            camera_id,
            hub,
            capture,
            motion,
            motion_recorder,
            continuous,
            #[cfg(feature = "streaming")]
            stream,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Newest frame accessor shared with the stream server
    pub fn hub(&self) -> &Arc<FrameHub> {
        &self.hub
    }

    /// The capture loop ended on its own, i.e. the device was lost
    pub fn capture_finished(&self) -> bool {
        self.capture.is_finished()
    }

    pub fn has_motion(&self) -> bool {
        self.motion.is_some()
    }

    pub fn has_motion_recorder(&self) -> bool {
        self.motion_recorder.is_some()
    }

    pub fn has_continuous(&self) -> bool {
        self.continuous.is_some()
    }

    #[cfg(feature = "streaming")]
    pub async fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.cancel.cancel();
            if tokio::time::timeout(Duration::from_secs(5), stream.task)
                .await
                .is_err()
            {
                warn!("Stream server for {} did not stop in time", self.camera_id);
            }
        }
    }

    pub async fn stop_capture(&mut self) -> Option<CaptureExit> {
        self.capture.stop().await
    }

    /// Stop detection; an open event is closed and handed to the recorder
    pub async fn stop_motion(&mut self) -> Option<MotionAnalysisMetrics> {
        let mut motion = self.motion.take()?;
        motion.stop().await
    }

    /// Wait for the motion recorder to write every delivered event
    pub async fn stop_motion_recorder(&mut self) -> Option<MotionRecorderStats> {
        let task = self.motion_recorder.take()?;
        join_recorder(&self.camera_id, "motion", task).await
    }

    /// Stop the continuous recorder after it drains its queue
    pub async fn stop_continuous(&mut self) -> Option<ContinuousStats> {
        let continuous = self.continuous.take()?;
        continuous.cancel.cancel();
        join_recorder(&self.camera_id, "continuous", continuous.task).await
    }
}

async fn join_recorder<T>(camera_id: &CameraId, kind: &str, task: JoinHandle<T>) -> Option<T> {
    match tokio::time::timeout(RECORDER_STOP_TIMEOUT, task).await {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            error!("{} recorder for camera {} failed: {}", kind, camera_id, e);
            None
        }
        Err(_) => {
            warn!(
                "{} recorder for camera {} did not finish within {:?}",
                kind, camera_id, RECORDER_STOP_TIMEOUT
            );
            None
        }
    }
}

#[cfg(feature = "streaming")]
fn start_stream(camera: &CameraConfig, hub: Arc<FrameHub>) -> StreamTask {
    let cancel = CancellationToken::new();
    let server = crate::streaming::StreamServer::new(camera, hub, cancel.clone());
    let camera_id = camera.id.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = server.serve("0.0.0.0").await {
            error!("Stream server for camera {} failed: {}", camera_id, e);
        }
    });
    StreamTask { cancel, task }
}
