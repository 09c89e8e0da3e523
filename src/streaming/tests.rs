use super::handlers::encode_for_stream;
use super::StreamServer;
use crate::config::{CamwatchConfig, CameraConfig};
use crate::frame::{FrameData, FrameFormat};
use crate::hub::FrameHub;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const TINY_JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xD9];

fn camera(show_fps: bool) -> CameraConfig {
    let mut camera = CamwatchConfig::example().cameras.remove(0);
    camera.name = "Front <Door>".to_string();
    camera.target_fps = 50;
    camera.show_fps = show_fps;
    camera
}

fn frame(seq: u64, format: FrameFormat) -> FrameData {
    let data = match format {
        FrameFormat::Mjpeg => TINY_JPEG.to_vec(),
        FrameFormat::Yuyv => vec![128u8; 64 * 48 * 2],
        FrameFormat::Rgb24 => vec![0u8; 64 * 48 * 3],
        FrameFormat::Gray8 => vec![0u8; 64 * 48],
    };
    FrameData::new(Arc::from("front"), seq, SystemTime::now(), data, 64, 48, format)
}

fn server(show_fps: bool) -> (StreamServer, Arc<FrameHub>, CancellationToken) {
    let hub = Arc::new(FrameHub::new(Arc::from("front"), 4));
    let shutdown = CancellationToken::new();
    let server = StreamServer::new(&camera(show_fps), Arc::clone(&hub), shutdown.clone());
    (server, hub, shutdown)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_mjpeg_frames_are_streamed_unchanged() {
    let jpeg = encode_for_stream(frame(1, FrameFormat::Mjpeg), 80).await.unwrap();
    assert_eq!(jpeg.as_slice(), &TINY_JPEG);
}

#[tokio::test]
async fn test_raw_frames_are_jpeg_encoded() {
    for format in [FrameFormat::Yuyv, FrameFormat::Rgb24, FrameFormat::Gray8] {
        let jpeg = encode_for_stream(frame(1, format), 80).await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}

#[tokio::test]
async fn test_snapshot_waits_for_first_frame() {
    let (server, hub, _shutdown) = server(false);

    let response = server.router().oneshot(get("/snapshot.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    hub.publish(frame(7, FrameFormat::Mjpeg));
    let response = server.router().oneshot(get("/snapshot.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(body.as_ref(), &TINY_JPEG);
}

#[tokio::test]
async fn test_health_reports_hub_state() {
    let (server, hub, _shutdown) = server(false);
    hub.publish(frame(3, FrameFormat::Mjpeg));

    let response = server.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["frames_available"], true);
    assert_eq!(health["latest_frame_seq"], 3);
    assert_eq!(health["hub"]["frames_published"], 1);
}

#[tokio::test]
async fn test_viewer_page_escapes_camera_name() {
    let (server, _hub, _shutdown) = server(false);

    let response = server.router().oneshot(get("/")).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();

    assert!(html.contains("Front &lt;Door&gt;"));
    assert!(html.contains("/stream.mjpg"));
}

#[tokio::test]
async fn test_stream_sends_multipart_frames() {
    let (server, hub, shutdown) = server(true);
    hub.publish(frame(1, FrameFormat::Mjpeg));

    let response = server.router().oneshot(get("/stream.mjpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=FRAME"
    );

    let mut body = response.into_body().into_data_stream();
    let part = body.next().await.unwrap().unwrap();
    let part = String::from_utf8(part.to_vec()).unwrap();
    assert!(part.starts_with("--FRAME\r\n"));
    assert!(part.contains("Content-Length: 4\r\n"));
    assert!(part.contains("X-Stream-Fps: "));

    let jpeg = body.next().await.unwrap().unwrap();
    assert_eq!(jpeg.as_ref(), &TINY_JPEG);

    assert_eq!(server.stats().active_connections.load(std::sync::atomic::Ordering::Relaxed), 1);

    // shutdown ends the stream
    shutdown.cancel();
    let rest = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(chunk) = body.next().await {
            chunk.unwrap();
        }
    })
    .await;
    assert!(rest.is_ok());
}
