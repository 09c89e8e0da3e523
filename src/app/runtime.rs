use super::{CamwatchOrchestrator, ComponentState, ShutdownReason};
use crate::error::{CamwatchError, Result};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

impl CamwatchOrchestrator {
    /// Run until a shutdown request arrives, then shut down gracefully
    pub async fn run(&mut self) -> Result<i32> {
        info!("camwatch is running");

        let mut shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| CamwatchError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        self.setup_signal_handlers();

        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let shutdown_reason = loop {
            tokio::select! {
                reason = &mut shutdown_receiver => {
                    break reason.map_err(|_| CamwatchError::System {
                        message: "Shutdown channel closed unexpectedly".to_string(),
                    })?;
                }
                _ = health.tick() => self.check_pipelines().await,
            }
        };

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("camwatch shutdown complete");
        Ok(exit_code)
    }

    /// Mark cameras whose capture loop ended on its own as failed
    async fn check_pipelines(&self) {
        for pipeline in &self.pipelines {
            if !pipeline.capture_finished() {
                continue;
            }
            let camera_id = pipeline.camera_id();
            if self
                .transition_camera(camera_id, ComponentState::Running, ComponentState::Failed)
                .await
            {
                warn!(
                    "Camera {} stopped delivering frames, other cameras continue",
                    camera_id
                );
            }
        }
    }

    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let trigger = self.shutdown_trigger.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            trigger.fire(ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        let trigger = self.shutdown_trigger.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    trigger.fire(ShutdownReason::Signal("SIGINT".to_string()));
                }
                Err(e) => error!("Failed to register SIGINT handler: {}", e),
            }
        });
    }
}
