use crate::error::RecordingError;
use crate::frame::FrameData;
use crate::hub::SubscriberKind;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::server::ServerState;
use super::stats::{ConnectionGuard, FpsMeter};

/// JPEG bytes for a frame; raw frames are encoded off the async runtime
pub(crate) async fn encode_for_stream(
    frame: FrameData,
    quality: u8,
) -> Result<Arc<Vec<u8>>, RecordingError> {
    if frame.format.is_compressed() {
        return frame.to_jpeg(quality);
    }

    tokio::task::spawn_blocking(move || frame.to_jpeg(quality))
        .await
        .map_err(|e| RecordingError::FrameEncoding {
            details: format!("encoder task failed: {}", e),
        })?
}

/// Handler for MJPEG streaming endpoint
pub async fn mjpeg_stream_handler(State(state): State<ServerState>) -> impl IntoResponse {
    info!("New MJPEG stream client for camera {}", state.camera_name);

    let stream = async_stream::stream! {
        let _connection = ConnectionGuard::new(Arc::clone(&state.stats));
        let mut frames = state.hub.subscribe(SubscriberKind::Stream);
        let mut last_frame: Option<FrameData> = state.hub.latest_frame();
        let mut last_jpeg: Option<(u64, Arc<Vec<u8>>)> = None;
        let mut frame_interval = interval(state.target_frame_interval);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fps = FpsMeter::new();

        loop {
            tokio::select! {
                biased;
                _ = state.shutdown.cancelled() => break,
                _ = frame_interval.tick() => {}
            }

            if let Some(frame) = frames.poll() {
                last_frame = Some(frame);
            }
            let Some(frame) = last_frame.clone() else {
                trace!("No frames available for streaming");
                continue;
            };

            // a frame repeated between captures is only encoded once
            let cached = last_jpeg
                .as_ref()
                .filter(|(seq, _)| *seq == frame.seq)
                .map(|(_, jpeg)| Arc::clone(jpeg));
            let jpeg = match cached {
                Some(jpeg) => jpeg,
                None => {
                    let seq = frame.seq;
                    match encode_for_stream(frame, state.quality).await {
                        Ok(jpeg) => {
                            last_jpeg = Some((seq, Arc::clone(&jpeg)));
                            jpeg
                        }
                        Err(e) => {
                            warn!("Failed to prepare frame {} for streaming: {}", seq, e);
                            state.stats.errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    }
                }
            };

            let mut part = format!(
                "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n",
                jpeg.len()
            );
            let rate = fps.tick();
            if state.show_fps {
                part.push_str(&format!("X-Stream-Fps: {:.1}\r\n", rate));
            }
            part.push_str("\r\n");

            state.stats.frames_streamed.fetch_add(1, Ordering::Relaxed);
            state
                .stats
                .bytes_streamed
                .fetch_add(jpeg.len() as u64, Ordering::Relaxed);

            yield Ok::<_, axum::Error>(Bytes::from(part));
            yield Ok(Bytes::from(jpeg.as_ref().clone()));
            yield Ok(Bytes::from_static(b"\r\n"));
        }

        debug!("MJPEG stream for camera {} closed", state.camera_name);
    };

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=FRAME"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
        ],
        axum::body::Body::from_stream(stream),
    )
}

/// Newest frame as a single JPEG
pub async fn snapshot_handler(State(state): State<ServerState>) -> Response {
    let Some(frame) = state.hub.latest_frame() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no frame captured yet").into_response();
    };

    match encode_for_stream(frame, state.quality).await {
        Ok(jpeg) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache, private"),
            ],
            jpeg.as_ref().clone(),
        )
            .into_response(),
        Err(e) => {
            state.stats.errors.fetch_add(1, Ordering::Relaxed);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let latest_frame = state.hub.latest_frame();
    let hub = state.hub.stats();

    let health_info = serde_json::json!({
        "status": "healthy",
        "camera": state.camera_name,
        "frames_available": latest_frame.is_some(),
        "latest_frame_seq": latest_frame.map(|f| f.seq),
        "hub": {
            "frames_published": hub.frames_published,
            "recorder_frames_dropped": hub.recorder_frames_dropped,
            "recorder_subscribers": hub.recorder_subscribers,
        },
        "stream": state.stats.snapshot(),
    });

    (StatusCode::OK, axum::Json(health_info))
}

/// Viewer page for the camera's stream
pub async fn stream_page_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{name}</title>
    <style>
        :root {{ color-scheme: dark; }}
        body {{
            margin: 0;
            background: #000;
            display: flex;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
        }}
        img.stream {{
            display: block;
            max-width: 100vw;
            max-height: 100vh;
            object-fit: contain;
        }}
    </style>
</head>
<body>
    <img class="stream" src="/stream.mjpg" alt="{name}">
</body>
</html>
"#,
        name = html_escape(&state.camera_name),
    );

    Html(html)
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
