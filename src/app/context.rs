use crate::config::{CameraConfig, CamwatchConfig};
use crate::encode::EncodeDispatcher;
use crate::error::Result;
use crate::recording::{RecorderOutput, RecordingKind};
use crate::registry::InUseRegistry;
use crate::retention::RetentionPolicy;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::info;

/// Shared state built once at startup and handed to every component
pub struct AppContext {
    pub config: CamwatchConfig,
    pub timezone: Tz,
    /// Paths being written or converted; retention skips them
    pub registry: InUseRegistry,
    pub dispatcher: Arc<EncodeDispatcher>,
}

impl AppContext {
    /// Resolve the timezone and start the encoder pool. Needs a tokio runtime.
    pub fn new(config: CamwatchConfig) -> Result<Self> {
        let timezone = config.timezone()?;
        let registry = InUseRegistry::new();
        let dispatcher = Arc::new(EncodeDispatcher::start(&config.encoder, registry.clone()));

        info!(
            "Application context ready ({} camera(s), timezone {})",
            config.cameras.len(),
            timezone
        );

        Ok(Self {
            config,
            timezone,
            registry,
            dispatcher,
        })
    }

    /// Output settings for one of a camera's recorders
    pub fn recorder_output(&self, kind: RecordingKind, camera: &CameraConfig) -> RecorderOutput {
        let output = match kind {
            RecordingKind::Continuous => &self.config.recordings,
            RecordingKind::Motion => &self.config.motion,
        };
        RecorderOutput::new(
            kind,
            camera,
            output,
            &self.config.encoder,
            self.timezone,
            self.registry.clone(),
            Arc::clone(&self.dispatcher),
        )
    }

    /// Retention policies for every saved output directory
    pub fn retention_policies(&self) -> Vec<RetentionPolicy> {
        [
            RetentionPolicy::from_output("recordings", &self.config.recordings),
            RetentionPolicy::from_output("motion", &self.config.motion),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
