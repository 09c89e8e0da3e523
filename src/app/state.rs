use super::{CamwatchOrchestrator, ComponentState};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

const CAMERA_PREFIX: &str = "camera:";

impl CamwatchOrchestrator {
    pub(super) fn camera_component(camera_id: &str) -> String {
        format!("{}{}", CAMERA_PREFIX, camera_id)
    }

    /// Record a component's state and return the one it replaced.
    /// Only actual changes are logged.
    pub async fn set_component_state(
        &self,
        component: &str,
        state: ComponentState,
    ) -> Option<ComponentState> {
        let previous = self
            .component_states
            .lock()
            .await
            .insert(component.to_string(), state.clone());

        if previous.as_ref() != Some(&state) {
            if state == ComponentState::Failed {
                warn!("Component '{}' failed (was {:?})", component, previous);
            } else {
                debug!("Component '{}': {:?} -> {:?}", component, previous, state);
            }
        }
        previous
    }

    pub(super) async fn set_camera_state(
        &self,
        camera_id: &str,
        state: ComponentState,
    ) -> Option<ComponentState> {
        self.set_component_state(&Self::camera_component(camera_id), state)
            .await
    }

    /// Move a camera to `to` only while it is in `from`
    pub(super) async fn transition_camera(
        &self,
        camera_id: &str,
        from: ComponentState,
        to: ComponentState,
    ) -> bool {
        let component = Self::camera_component(camera_id);
        {
            let mut states = self.component_states.lock().await;
            match states.get_mut(&component) {
                Some(current) if *current == from => *current = to.clone(),
                _ => return false,
            }
        }
        debug!("Camera {}: {:?} -> {:?}", camera_id, from, to);
        true
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().await.clone()
    }

    /// Camera states keyed by camera id, in id order
    pub async fn camera_states(&self) -> BTreeMap<String, ComponentState> {
        self.component_states
            .lock()
            .await
            .iter()
            .filter_map(|(component, state)| {
                component
                    .strip_prefix(CAMERA_PREFIX)
                    .map(|id| (id.to_string(), state.clone()))
            })
            .collect()
    }
}
