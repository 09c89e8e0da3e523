pub mod analyzer;
pub mod app;
pub mod camera;
pub mod config;
pub mod encode;
pub mod error;
pub mod frame;
pub mod hub;
pub mod recording;
pub mod registry;
pub mod retention;
pub mod ring_buffer;

#[cfg(feature = "streaming")]
pub mod streaming;

pub use analyzer::{MotionEvent, MotionStateMachine, MotionTask};
pub use app::{AppContext, CamwatchOrchestrator, ComponentState, ShutdownReason};
pub use camera::{CaptureHandle, FrameSource};
pub use config::CamwatchConfig;
pub use encode::EncodeDispatcher;
pub use error::{CamwatchError, Result};
pub use frame::{CameraId, FrameData, FrameFormat};
pub use hub::{FrameHub, SubscriberKind, Subscription};
pub use recording::{ContinuousRecorder, MotionRecorder};
pub use registry::InUseRegistry;
pub use retention::{CleanupResult, RetentionScheduler};

#[cfg(feature = "streaming")]
pub use streaming::{StreamServer, StreamStats};
