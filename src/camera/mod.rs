mod capture;
mod device;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod gst;
mod source;
#[cfg(test)]
mod tests;

pub use capture::{CaptureExit, CaptureHandle};
pub use device::{CaptureDevice, RawFrame, SyntheticDevice};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gst::GstDevice;
pub use source::{Backoff, FrameSource, FrameThrottle};
