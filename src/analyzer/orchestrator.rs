use crate::analyzer::motion::{MotionAnalyzer, MotionSignal};
use crate::analyzer::state::{MotionEvent, MotionStateMachine};
use crate::config::MotionConfig;
use crate::error::AnalyzerError;
use crate::frame::{CameraId, FrameData};
use crate::hub::Subscription;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FRAME_WAIT: Duration = Duration::from_millis(500);

/// Counters reported when a motion task ends
#[derive(Debug, Clone, Default)]
pub struct MotionAnalysisMetrics {
    pub frames_analyzed: u64,
    pub analysis_errors: u64,
    pub events_emitted: u64,
    /// Analyzers rebuilt after a panic during analysis
    pub analyzer_restarts: u64,
}

type AnalyzeFn = fn(&mut MotionAnalyzer, &FrameData) -> Result<MotionSignal, AnalyzerError>;

/// Outcome of one frame analysed on the blocking pool
enum Analysis {
    Signal(Result<MotionSignal, AnalyzerError>),
    Panicked(String),
}

/// Motion detection for one camera: analyzer plus event state machine.
///
/// Closed events go to the motion recorder over `events`. On cancellation
/// any open event is closed with the frames buffered so far and sent, then
/// the sender is dropped so the recorder can drain and stop.
pub struct MotionTask {
    camera_id: CameraId,
    cancel: CancellationToken,
    task: Option<JoinHandle<MotionAnalysisMetrics>>,
}

impl MotionTask {
    pub fn spawn(
        camera_id: CameraId,
        config: &MotionConfig,
        subscription: Subscription,
        events: mpsc::Sender<MotionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let analyzer = MotionAnalyzer::new(config);
        let machine = MotionStateMachine::new(camera_id.clone(), config);
        let task = tokio::spawn(run_motion_loop(
            camera_id.clone(),
            config.clone(),
            analyzer,
            machine,
            subscription,
            events,
            cancel.clone(),
        ));

        Self {
            camera_id,
            cancel,
            task: Some(task),
        }
    }

    /// Request shutdown and wait for the final event to be handed off
    pub async fn stop(&mut self) -> Option<MotionAnalysisMetrics> {
        self.cancel.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                error!("Motion task for camera {} failed: {}", self.camera_id, e);
                None
            }
        }
    }
}

async fn run_motion_loop(
    camera_id: CameraId,
    config: MotionConfig,
    mut analyzer: MotionAnalyzer,
    mut machine: MotionStateMachine,
    mut subscription: Subscription,
    events: mpsc::Sender<MotionEvent>,
    cancel: CancellationToken,
) -> MotionAnalysisMetrics {
    info!("Motion analysis task started for camera {}", camera_id);
    let mut metrics = MotionAnalysisMetrics::default();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = subscription.next_timeout(FRAME_WAIT) => frame,
        };
        let Some(frame) = frame else {
            continue;
        };

        let (returned, analysis) =
            analyze_off_thread(analyzer, frame.clone(), &config, MotionAnalyzer::analyze).await;
        analyzer = returned;

        let positive = match analysis {
            Analysis::Signal(Ok(signal)) => {
                metrics.frames_analyzed += 1;
                signal.positive
            }
            Analysis::Signal(Err(e)) => {
                metrics.frames_analyzed += 1;
                metrics.analysis_errors += 1;
                warn!("Camera {}: motion analysis failed: {}", camera_id, e);
                false
            }
            Analysis::Panicked(reason) => {
                metrics.analysis_errors += 1;
                metrics.analyzer_restarts += 1;
                error!(
                    "Camera {}: motion analysis panicked, restarting analyzer: {}",
                    camera_id, reason
                );
                false
            }
        };

        if let Some(event) = machine.process(frame, positive) {
            if deliver(&camera_id, &events, event).await {
                metrics.events_emitted += 1;
            }
        }
    }

    if let Some(event) = machine.finish() {
        info!(
            "Camera {}: finalizing open motion event {} for shutdown",
            camera_id,
            event.id()
        );
        if deliver(&camera_id, &events, event).await {
            metrics.events_emitted += 1;
        }
    }

    debug!(
        "Motion analysis task for camera {} stopped: {:?}",
        camera_id, metrics
    );
    metrics
}

/// Run `analyze` on the blocking pool. A panic loses the analyzer, so a
/// fresh one built from `config` is handed back in its place.
async fn analyze_off_thread(
    mut analyzer: MotionAnalyzer,
    frame: FrameData,
    config: &MotionConfig,
    analyze: AnalyzeFn,
) -> (MotionAnalyzer, Analysis) {
    let outcome = tokio::task::spawn_blocking(move || {
        let signal = analyze(&mut analyzer, &frame);
        (analyzer, signal)
    })
    .await;

    match outcome {
        Ok((analyzer, signal)) => (analyzer, Analysis::Signal(signal)),
        Err(e) => (MotionAnalyzer::new(config), Analysis::Panicked(e.to_string())),
    }
}

async fn deliver(camera_id: &CameraId, events: &mpsc::Sender<MotionEvent>, event: MotionEvent) -> bool {
    let id = event.id();
    match events.send(event).await {
        Ok(()) => true,
        Err(_) => {
            warn!(
                "Camera {}: motion recorder gone, event {} not recorded",
                camera_id, id
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameData, FrameFormat};
    use crate::hub::{FrameHub, SubscriberKind};
    use std::sync::Arc;
    use std::time::SystemTime;

    fn frame(seq: u64, square: bool) -> FrameData {
        let (w, h) = (64u32, 48u32);
        let mut pixels = vec![40u8; (w * h) as usize];
        if square {
            // position moves with seq so consecutive frames differ
            let x0 = (seq as u32 * 7) % (w - 16);
            for y in 16..32 {
                for x in x0..x0 + 16 {
                    pixels[(y * w + x) as usize] = 220;
                }
            }
        }
        FrameData::new(
            Arc::from("cam"),
            seq,
            SystemTime::UNIX_EPOCH + Duration::from_millis(seq * 100),
            pixels,
            w,
            h,
            FrameFormat::Gray8,
        )
    }

    fn config() -> MotionConfig {
        MotionConfig {
            enabled: true,
            minimum_motion_frames: 2,
            pre_capture: 2,
            post_capture: 2,
            event_gap: 60,
            ..MotionConfig::default()
        }
    }

    /// Publish one frame and give the task time to consume it
    async fn publish(hub: &FrameHub, frame: FrameData) {
        hub.publish(frame);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_open_event_is_flushed_on_stop() {
        let hub = FrameHub::new(Arc::from("cam"), 4);
        let (tx, mut rx) = mpsc::channel(4);
        let mut task = MotionTask::spawn(
            Arc::from("cam"),
            &config(),
            hub.subscribe(SubscriberKind::Motion),
            tx,
            CancellationToken::new(),
        );

        for seq in 0..3 {
            publish(&hub, frame(seq, false)).await;
        }
        for seq in 3..7 {
            publish(&hub, frame(seq, true)).await;
        }

        let metrics = task.stop().await.unwrap();
        assert_eq!(metrics.events_emitted, 1);
        assert_eq!(metrics.analysis_errors, 0);

        let event = rx.recv().await.unwrap();
        assert!(event.is_closed());
        assert!(event.frame_count() >= 2);
        // the sender was dropped with the task
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_quiet_scene_emits_nothing() {
        let hub = FrameHub::new(Arc::from("cam"), 4);
        let (tx, mut rx) = mpsc::channel(4);
        let mut task = MotionTask::spawn(
            Arc::from("cam"),
            &config(),
            hub.subscribe(SubscriberKind::Motion),
            tx,
            CancellationToken::new(),
        );

        for seq in 0..5 {
            publish(&hub, frame(seq, false)).await;
        }

        let metrics = task.stop().await.unwrap();
        assert!(metrics.frames_analyzed >= 1);
        assert_eq!(metrics.events_emitted, 0);
        assert!(rx.recv().await.is_none());
    }

    fn panicking_analyze(_: &mut MotionAnalyzer, _: &FrameData) -> Result<MotionSignal, AnalyzerError> {
        panic!("corrupt frame");
    }

    #[tokio::test]
    async fn test_panicking_analysis_returns_fresh_analyzer() {
        let config = config();
        let analyzer = MotionAnalyzer::new(&config);

        let (analyzer, analysis) =
            analyze_off_thread(analyzer, frame(0, false), &config, panicking_analyze).await;
        assert!(matches!(analysis, Analysis::Panicked(_)));

        // the replacement keeps working on later frames
        let (_, analysis) =
            analyze_off_thread(analyzer, frame(1, false), &config, MotionAnalyzer::analyze).await;
        match analysis {
            Analysis::Signal(Ok(signal)) => assert!(!signal.positive),
            _ => panic!("expected a signal from the rebuilt analyzer"),
        }
    }
}
