use super::{CamwatchOrchestrator, ComponentState};
use crate::camera::CaptureExit;
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl CamwatchOrchestrator {
    /// Stop every component in order. Producers stop before consumers so
    /// recorders see every captured frame, and the encoder pool drains
    /// after the recorders have handed over their last files.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        let mut exit_code = 0;

        if let Some(keyboard) = self.keyboard.take() {
            self.set_component_state("keyboard", ComponentState::Stopping)
                .await;
            keyboard.stop().await;
            self.set_component_state("keyboard", ComponentState::Stopped)
                .await;
        }

        #[cfg(feature = "streaming")]
        for pipeline in &mut self.pipelines {
            pipeline.stop_stream().await;
        }

        for i in 0..self.pipelines.len() {
            self.set_camera_state(self.pipelines[i].camera_id(), ComponentState::Stopping)
                .await;

            match self.pipelines[i].stop_capture().await {
                Some(CaptureExit::Stopped { frames }) => {
                    info!("Camera {} captured {} frames", self.pipelines[i].camera_id(), frames);
                }
                Some(CaptureExit::DeviceLost(e)) => {
                    warn!("Camera {} had already stopped: {}", self.pipelines[i].camera_id(), e);
                    self.set_camera_state(self.pipelines[i].camera_id(), ComponentState::Failed)
                        .await;
                }
                None => exit_code = 1,
            }
        }

        for pipeline in &mut self.pipelines {
            if let Some(metrics) = pipeline.stop_motion().await {
                info!(
                    "Camera {} motion: {} frames analyzed, {} events, {} analyzer restarts",
                    pipeline.camera_id(),
                    metrics.frames_analyzed,
                    metrics.events_emitted,
                    metrics.analyzer_restarts
                );
            }
        }

        for pipeline in &mut self.pipelines {
            if !pipeline.has_motion_recorder() {
                continue;
            }
            match pipeline.stop_motion_recorder().await {
                Some(stats) => info!(
                    "Camera {} motion recorder: {} events, {} failures",
                    pipeline.camera_id(),
                    stats.events_recorded,
                    stats.failures
                ),
                None => exit_code = 1,
            }
        }

        for pipeline in &mut self.pipelines {
            if !pipeline.has_continuous() {
                continue;
            }
            match pipeline.stop_continuous().await {
                Some(stats) => info!(
                    "Camera {} continuous recorder: {} frames in {} files, {} missed",
                    pipeline.camera_id(),
                    stats.frames_written,
                    stats.files_closed,
                    stats.frames_missed
                ),
                None => exit_code = 1,
            }
        }

        for pipeline in &self.pipelines {
            self.transition_camera(
                pipeline.camera_id(),
                ComponentState::Stopping,
                ComponentState::Stopped,
            )
            .await;
        }

        self.set_component_state("encoder", ComponentState::Stopping)
            .await;
        let grace = Duration::from_secs(self.context.config.encoder.shutdown_grace_seconds);
        if self.context.dispatcher.shutdown(grace).await {
            self.set_component_state("encoder", ComponentState::Stopped)
                .await;
        } else {
            warn!("Encoder jobs still running after {:?}, abandoned", grace);
            self.set_component_state("encoder", ComponentState::Failed)
                .await;
            exit_code = 1;
        }

        self.stop_retention().await;

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_retention(&mut self) {
        let Some(task) = self.retention_task.take() else {
            return;
        };

        self.set_component_state("retention", ComponentState::Stopping)
            .await;
        self.retention_cancel.cancel();

        match timeout(Duration::from_secs(10), task).await {
            Ok(Ok(())) => {
                self.set_component_state("retention", ComponentState::Stopped)
                    .await;
            }
            Ok(Err(e)) => {
                error!("Retention task failed: {}", e);
                self.set_component_state("retention", ComponentState::Failed)
                    .await;
            }
            Err(_) => {
                error!("Retention scheduler stop timeout");
                self.set_component_state("retention", ComponentState::Failed)
                    .await;
            }
        }
    }
}
