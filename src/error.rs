use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Motion analysis error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Streaming error: {0}")]
    Stream(#[from] StreamError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl CamwatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Capture device failures.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The device could not be opened or configured.
    #[error("Failed to open device '{device}': {details}")]
    DeviceOpen { device: String, details: String },

    /// A single read failed; the source retries.
    #[error("Device error: {details}")]
    Device { details: String },

    /// Too many consecutive failures; fatal to this camera only.
    #[error("Device lost for camera '{camera}' after {failures} consecutive failures")]
    DeviceLost { camera: String, failures: u32 },

    #[error("Unsupported capture configuration: {details}")]
    Unsupported { details: String },
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Failed to decode frame {frame}: {details}")]
    Decode { frame: u64, details: String },

    #[error("Frame processing failed: {details}")]
    FrameProcessing { details: String },
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to open recording {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failure on {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to finalize {}: {details}", path.display())]
    Finalize { path: PathBuf, details: String },

    /// The piped encoder behind a mode 2 session failed; the file is corrupt.
    #[error("Encoder failed for {}: {source}", path.display())]
    EncoderFailed {
        path: PathBuf,
        #[source]
        source: EncodeError,
    },

    #[error("Frame encoding failed: {details}")]
    FrameEncoding { details: String },
}

/// Outcome classes of the external encoder.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Retryable failure (non-zero exit, missing output, broken pipe).
    #[error("Encode failure: {details}")]
    Failure { details: String },

    /// Not worth retrying (encoder binary missing, input gone).
    #[error("Fatal encode failure: {details}")]
    Fatal { details: String },

    #[error("Encoder did not finish within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Encode dispatcher is shut down")]
    DispatcherClosed,
}

impl EncodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EncodeError::Failure { .. } | EncodeError::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to bind stream server to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream server failed: {details}")]
    Server { details: String },
}

pub type Result<T> = std::result::Result<T, CamwatchError>;
