pub mod motion;
pub mod orchestrator;
pub mod state;

pub use motion::{MotionAnalyzer, MotionSignal};
pub use orchestrator::{MotionAnalysisMetrics, MotionTask};
pub use state::{DetectorState, EventState, MotionEvent, MotionStateMachine};
