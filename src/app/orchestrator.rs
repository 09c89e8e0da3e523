use super::context::AppContext;
use super::keyboard::KeyboardShutdown;
use super::pipeline::CameraPipeline;
use super::types::{ComponentState, ShutdownReason, ShutdownTrigger};
use crate::config::CamwatchConfig;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Main application coordinator owning every camera pipeline and the
/// shared services behind them
pub struct CamwatchOrchestrator {
    pub(super) context: Arc<AppContext>,

    // Components
    pub(super) pipelines: Vec<CameraPipeline>,
    pub(super) retention_task: Option<JoinHandle<()>>,
    pub(super) retention_cancel: CancellationToken,
    pub(super) keyboard: Option<KeyboardShutdown>,
    pub(super) keyboard_enabled: bool,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_trigger: ShutdownTrigger,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
}

impl CamwatchOrchestrator {
    /// Create a new orchestrator with the given configuration
    pub async fn new(config: CamwatchConfig) -> Result<Self> {
        let keyboard_enabled = config.system.keyboard_shutdown;
        let context = Arc::new(AppContext::new(config)?);
        let (shutdown_trigger, shutdown_receiver) = ShutdownTrigger::new();

        Ok(Self {
            context,
            pipelines: Vec::new(),
            retention_task: None,
            retention_cancel: CancellationToken::new(),
            keyboard: None,
            keyboard_enabled,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_trigger,
            shutdown_receiver: Some(shutdown_receiver),
        })
    }

    /// Enable or disable the keyboard stop handler
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Handle for requesting shutdown from outside the run loop
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown_trigger.clone()
    }

    /// Ids of cameras whose pipelines are running
    pub fn running_cameras(&self) -> Vec<String> {
        self.pipelines
            .iter()
            .map(|p| p.camera_id().to_string())
            .collect()
    }
}
