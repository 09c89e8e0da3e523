use super::pipeline::CameraPipeline;
use super::{CamwatchOrchestrator, ComponentState};
use crate::camera::FrameSource;
use crate::error::{CamwatchError, Result};
use crate::retention::RetentionScheduler;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

impl CamwatchOrchestrator {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing camwatch components");

        let mut states = self.component_states.lock().await;
        for camera in &self.context.config.cameras {
            states.insert(Self::camera_component(&camera.id), ComponentState::Stopped);
        }
        states.insert("encoder".to_string(), ComponentState::Running);
        states.insert("retention".to_string(), ComponentState::Stopped);
        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Open every camera and start its pipeline, then the retention
    /// scheduler. A camera that fails to open is marked failed and the
    /// rest keep running; startup only fails when no camera opens.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting camwatch");
        let context = Arc::clone(&self.context);

        for camera in &context.config.cameras {
            self.set_camera_state(&camera.id, ComponentState::Starting)
                .await;

            match FrameSource::open(camera, &context.config.capture).await {
                Ok(source) => {
                    let pipeline = CameraPipeline::start(&context, camera, source);
                    self.pipelines.push(pipeline);
                    self.set_camera_state(&camera.id, ComponentState::Running)
                        .await;
                }
                Err(e) => {
                    error!("Failed to open camera {}: {}", camera.id, e);
                    self.set_camera_state(&camera.id, ComponentState::Failed)
                        .await;
                }
            }
        }

        if self.pipelines.is_empty() && !context.config.cameras.is_empty() {
            return Err(CamwatchError::System {
                message: "no camera could be opened".to_string(),
            });
        }

        self.start_retention().await;

        if self.keyboard_enabled {
            self.start_keyboard().await;
        }

        info!(
            "camwatch started ({} of {} camera(s) running)",
            self.pipelines.len(),
            context.config.cameras.len()
        );
        Ok(())
    }

    async fn start_retention(&mut self) {
        let policies = self.context.retention_policies();
        if policies.is_empty() {
            info!("No saved outputs, retention scheduler not started");
            return;
        }

        self.set_component_state("retention", ComponentState::Starting)
            .await;

        let system = &self.context.config.system;
        let scheduler = Arc::new(RetentionScheduler::new(
            policies,
            self.context.registry.clone(),
            self.context.timezone,
        ));
        let task = scheduler.spawn(
            Duration::from_secs(system.retention_initial_delay_seconds),
            Duration::from_secs(system.retention_interval_seconds.max(1)),
            self.retention_cancel.clone(),
        );
        self.retention_task = Some(task);

        self.set_component_state("retention", ComponentState::Running)
            .await;
    }

    async fn start_keyboard(&mut self) {
        self.set_component_state("keyboard", ComponentState::Starting)
            .await;

        match super::keyboard::KeyboardShutdown::start(self.shutdown_trigger.clone()) {
            Ok(keyboard) => {
                self.keyboard = Some(keyboard);
                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
            Err(e) => {
                warn!("Keyboard stop handler unavailable: {}", e);
                self.set_component_state("keyboard", ComponentState::Failed)
                    .await;
            }
        }
    }
}
