//! Continuous and motion recording: file naming, sessions and encode-mode
//! dispatch.

mod continuous;
mod metadata;
mod motion;
pub mod naming;
mod output;
mod session;

pub use continuous::{ContinuousRecorder, ContinuousStats};
pub use metadata::EventMetadata;
pub use motion::{MotionRecorder, MotionRecorderStats};
pub use output::{RecorderOutput, RecordingKind};
pub use session::{FinishedRecording, RecordingSession};
