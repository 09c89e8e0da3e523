mod context;
mod keyboard;
mod orchestrator;
mod pipeline;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use context::AppContext;
pub use keyboard::KeyboardShutdown;
pub use orchestrator::CamwatchOrchestrator;
pub use pipeline::CameraPipeline;
pub use types::{ComponentState, ShutdownReason, ShutdownTrigger};
