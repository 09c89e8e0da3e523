//! External H.264 encoder: command lines, piped encoders and the
//! conversion worker pool.

mod command;
mod dispatcher;
mod probe;
mod process;

pub use command::{EncoderCommand, EncoderSettings};
pub use dispatcher::{ConvertJob, EncodeDispatcher, JobHandle, JobReport, JobStatus};
pub use probe::{probe_encoders, ProbeResult};
pub use process::EncoderProcess;
