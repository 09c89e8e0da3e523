use super::*;
use crate::config::{CameraConfig, CaptureConfig, MotionConfig};
use crate::error::CameraError;
use crate::frame::FrameFormat;
use crate::hub::{FrameHub, SubscriberKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

fn create_test_camera_config(target_fps: u32) -> CameraConfig {
    CameraConfig {
        id: "test".to_string(),
        name: "Test Camera".to_string(),
        device: "synthetic".to_string(),
        port: 18081,
        target_fps,
        stream_quality: 80,
        show_fps: false,
        source_format: None,
        width: Some(32),
        height: Some(24),
        source_fps: None,
        motion: MotionConfig::default(),
    }
}

fn fast_capture_config(max_failures: u32) -> CaptureConfig {
    CaptureConfig {
        max_consecutive_failures: max_failures,
        retry_backoff_initial_ms: 1,
        retry_backoff_max_ms: 4,
        ..CaptureConfig::default()
    }
}

/// Device replaying a fixed script of reads
struct ScriptedDevice {
    script: VecDeque<Result<RawFrame, CameraError>>,
}

impl ScriptedDevice {
    fn new(script: Vec<Result<RawFrame, CameraError>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

fn raw_at(millis: u64) -> RawFrame {
    RawFrame {
        data: vec![0u8; 4],
        width: 2,
        height: 2,
        format: FrameFormat::Gray8,
        captured_at: SystemTime::UNIX_EPOCH + Duration::from_millis(millis),
    }
}

fn read_error() -> CameraError {
    CameraError::Device {
        details: "bad read".to_string(),
    }
}

#[async_trait]
impl CaptureDevice for ScriptedDevice {
    async fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        match self.script.pop_front() {
            Some(step) => step,
            None => {
                // idle like a stalled camera
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(read_error())
            }
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[test]
fn test_throttle_halves_double_rate_source() {
    // 20fps source, 10fps target
    let mut throttle = FrameThrottle::new(10);
    let base = SystemTime::UNIX_EPOCH;

    let admitted: Vec<u64> = (0..20)
        .map(|i| i * 50)
        .filter(|ms| throttle.admit(base + Duration::from_millis(*ms)))
        .collect();

    assert_eq!(admitted.len(), 10);
    assert_eq!(admitted[..3], [0, 100, 200]);
}

#[test]
fn test_throttle_passes_slower_source_unchanged() {
    let mut throttle = FrameThrottle::new(30);
    let base = SystemTime::UNIX_EPOCH;

    assert!((0..10).all(|i| throttle.admit(base + Duration::from_millis(i * 100))));
}

#[test]
fn test_throttle_resyncs_after_stall() {
    let mut throttle = FrameThrottle::new(10);
    let base = SystemTime::UNIX_EPOCH;

    assert!(throttle.admit(base));
    // five second gap, then a burst at source rate
    assert!(throttle.admit(base + Duration::from_secs(5)));
    assert!(!throttle.admit(base + Duration::from_millis(5_020)));
    assert!(!throttle.admit(base + Duration::from_millis(5_050)));
    assert!(throttle.admit(base + Duration::from_millis(5_100)));
}

#[test]
fn test_backoff_doubles_up_to_cap() {
    let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(300));

    let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_millis() as u64).collect();
    assert_eq!(delays, vec![50, 100, 200, 300, 300]);

    backoff.reset();
    assert_eq!(backoff.next_delay(), Duration::from_millis(50));
}

#[tokio::test]
async fn test_source_retries_transient_failures() {
    let camera = create_test_camera_config(100);
    let device = ScriptedDevice::new(vec![
        Ok(raw_at(0)),
        Err(read_error()),
        Err(read_error()),
        Ok(raw_at(100)),
        Ok(raw_at(200)),
    ]);
    let mut source = FrameSource::with_device(&camera, &fast_capture_config(5), Box::new(device));

    let seqs = [
        source.next_frame().await.unwrap().seq,
        source.next_frame().await.unwrap().seq,
        source.next_frame().await.unwrap().seq,
    ];

    assert_eq!(seqs, [0, 1, 2]);
    assert_eq!(source.frames_delivered(), 3);
    assert_eq!(&**source.camera_id(), "test");
}

#[tokio::test]
async fn test_source_sequence_counts_emitted_frames_only() {
    let camera = create_test_camera_config(10);
    let device = ScriptedDevice::new((0..6).map(|i| Ok(raw_at(i * 50))).collect());
    let mut source = FrameSource::with_device(&camera, &fast_capture_config(3), Box::new(device));

    let first = source.next_frame().await.unwrap();
    let second = source.next_frame().await.unwrap();

    assert_eq!((first.seq, second.seq), (0, 1));
    assert_eq!(second.timestamp, SystemTime::UNIX_EPOCH + Duration::from_millis(100));
    assert_eq!(source.frames_skipped(), 1);
}

#[tokio::test]
async fn test_source_reports_device_lost() {
    let camera = create_test_camera_config(10);
    let device = ScriptedDevice::new(vec![Ok(raw_at(0))]);
    let mut source = FrameSource::with_device(&camera, &fast_capture_config(3), Box::new(device));

    assert!(source.next_frame().await.is_ok());
    match source.next_frame().await {
        Err(CameraError::DeviceLost { camera, failures }) => {
            assert_eq!(camera, "test");
            assert_eq!(failures, 3);
        }
        other => panic!("expected DeviceLost, got {:?}", other.map(|f| f.seq)),
    }
}

#[tokio::test]
async fn test_device_lost_from_device_is_immediate() {
    let camera = create_test_camera_config(10);
    let device = ScriptedDevice::new(vec![Err(CameraError::DeviceLost {
        camera: "/dev/video9".to_string(),
        failures: 0,
    })]);
    let mut source = FrameSource::with_device(&camera, &fast_capture_config(10), Box::new(device));

    assert!(matches!(
        source.next_frame().await,
        Err(CameraError::DeviceLost { .. })
    ));
}

#[tokio::test]
async fn test_synthetic_source_produces_frames() {
    let camera = create_test_camera_config(50);
    let mut source = FrameSource::open(&camera, &CaptureConfig::default())
        .await
        .unwrap();

    let frame = source.next_frame().await.unwrap();
    assert_eq!((frame.width, frame.height), (32, 24));
    assert_eq!(frame.format, FrameFormat::Gray8);
    assert!(frame.validate_size());
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
#[tokio::test]
async fn test_hardware_device_requires_camera_feature() {
    let mut camera = create_test_camera_config(10);
    camera.device = "/dev/video0".to_string();

    match FrameSource::open(&camera, &CaptureConfig::default()).await {
        Err(CameraError::DeviceOpen { device, .. }) => assert_eq!(device, "/dev/video0"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("hardware device opened without the camera feature"),
    }
}

#[test]
fn test_pipeline_description_formats() {
    let mut camera = create_test_camera_config(10);
    camera.device = "2".to_string();
    camera.source_format = Some("YUYV".to_string());
    camera.source_fps = Some(30);

    let (description, format) = device::pipeline_description(&camera).unwrap();
    assert_eq!(format, FrameFormat::Yuyv);
    assert!(description.contains("device=/dev/video2"));
    assert!(description.contains("video/x-raw,format=YUY2,width=32,height=24,framerate=30/1"));

    camera.source_format = Some("H264".to_string());
    assert!(matches!(
        device::pipeline_description(&camera),
        Err(CameraError::Unsupported { .. })
    ));
}

#[tokio::test]
async fn test_capture_loop_publishes_until_stopped() {
    let camera = create_test_camera_config(50);
    let source = FrameSource::open(&camera, &CaptureConfig::default())
        .await
        .unwrap();
    let hub = Arc::new(FrameHub::new(Arc::from("test"), 16));
    let mut recorder = hub.subscribe(SubscriberKind::Recorder);

    let mut handle = CaptureHandle::spawn(source, Arc::clone(&hub), CancellationToken::new());

    let first = recorder.next_timeout(Duration::from_secs(2)).await.unwrap();
    let second = recorder.next_timeout(Duration::from_secs(2)).await.unwrap();
    assert!(second.seq > first.seq);

    match handle.stop().await {
        Some(CaptureExit::Stopped { frames }) => assert!(frames >= 2),
        other => panic!("unexpected exit: {:?}", other),
    }
    assert!(handle.is_finished());
}

#[tokio::test]
async fn test_capture_loop_ends_on_device_lost() {
    let camera = create_test_camera_config(10);
    let device = ScriptedDevice::new(vec![Ok(raw_at(0))]);
    let source = FrameSource::with_device(&camera, &fast_capture_config(2), Box::new(device));
    let hub = Arc::new(FrameHub::new(Arc::from("test"), 4));

    let mut handle = CaptureHandle::spawn(source, Arc::clone(&hub), CancellationToken::new());

    tokio::time::timeout(Duration::from_secs(2), async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(matches!(handle.stop().await, Some(CaptureExit::DeviceLost(_))));
    assert_eq!(hub.stats().frames_published, 1);
}
