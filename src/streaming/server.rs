use crate::config::CameraConfig;
use crate::error::StreamError;
use crate::hub::FrameHub;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{health_handler, mjpeg_stream_handler, snapshot_handler, stream_page_handler};
use super::stats::StreamStats;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) hub: Arc<FrameHub>,
    pub(crate) camera_name: String,
    pub(crate) target_frame_interval: Duration,
    pub(crate) quality: u8,
    pub(crate) show_fps: bool,
    pub(crate) stats: Arc<StreamStats>,
    /// Ends open streams so graceful shutdown can complete
    pub(crate) shutdown: CancellationToken,
}

/// Per-camera MJPEG server reading the hub's newest frame
pub struct StreamServer {
    pub(crate) port: u16,
    pub(crate) state: ServerState,
}

impl StreamServer {
    pub fn new(camera: &CameraConfig, hub: Arc<FrameHub>, shutdown: CancellationToken) -> Self {
        let target_frame_interval =
            Duration::from_micros(1_000_000u64 / camera.target_fps.max(1) as u64);

        Self {
            port: camera.port,
            state: ServerState {
                hub,
                camera_name: camera.name.clone(),
                target_frame_interval,
                quality: camera.stream_quality,
                show_fps: camera.show_fps,
                stats: Arc::new(StreamStats::default()),
                shutdown,
            },
        }
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.state.stats)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(stream_page_handler))
            .route("/stream.mjpg", get(mjpeg_stream_handler))
            .route("/snapshot.jpg", get(snapshot_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until the shutdown token fires
    pub async fn serve(self, ip: &str) -> Result<(), StreamError> {
        let addr = format!("{}:{}", ip, self.port);
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| StreamError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        info!(
            "MJPEG server for camera {} listening on {}",
            self.state.camera_name, addr
        );

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| StreamError::Server {
                details: format!("Server error: {}", e),
            })?;

        info!("MJPEG server on {} stopped", addr);
        Ok(())
    }
}
