use crate::error::{CamwatchError, Result};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CamwatchConfig {
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    pub recordings: OutputConfig,
    pub motion: OutputConfig,
    pub encoder: EncoderConfig,
    pub capture: CaptureConfig,
    pub system: SystemConfig,
    pub logs: LogsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Stable identifier used in logs and lookups
    pub id: String,

    /// Display name; its normalized form names output files and directories
    pub name: String,

    /// Device path, index, or "synthetic" for the built-in test pattern
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Port of the per-camera stream server
    #[serde(default = "default_camera_port")]
    pub port: u16,

    /// Frames per second delivered to consumers
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    /// JPEG quality for streamed frames that are not already MJPEG
    #[serde(default = "default_stream_quality")]
    pub stream_quality: u8,

    #[serde(default)]
    pub show_fps: bool,

    /// Four character code requested from the device (MJPG, YUYV)
    #[serde(default)]
    pub source_format: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub source_fps: Option<u32>,

    #[serde(default)]
    pub motion: MotionConfig,
}

impl CameraConfig {
    /// Lowercase name with spaces replaced, used for directories and filenames
    pub fn normalized_name(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Per-pixel intensity delta treated as noise (1-255)
    #[serde(default = "default_noise_level")]
    pub noise_level: u32,

    /// Percentage of changed pixels that makes a frame motion-positive
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: f64,

    /// Percentage of the frame covered by the largest changed region
    #[serde(default = "default_object_threshold")]
    pub object_threshold: f64,

    #[serde(default = "default_minimum_motion_frames")]
    pub minimum_motion_frames: u32,

    /// Frames kept before the motion run
    #[serde(default = "default_pre_capture")]
    pub pre_capture: u32,

    /// Frames kept after the last motion-positive frame
    #[serde(default = "default_post_capture")]
    pub post_capture: u32,

    /// Seconds without motion before an event closes
    #[serde(default = "default_event_gap")]
    pub event_gap: u64,
}

impl MotionConfig {
    pub fn event_gap(&self) -> Duration {
        Duration::from_secs(self.event_gap)
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            noise_level: default_noise_level(),
            pixel_threshold: default_pixel_threshold(),
            object_threshold: default_object_threshold(),
            minimum_motion_frames: default_minimum_motion_frames(),
            pre_capture: default_pre_capture(),
            post_capture: default_post_capture(),
            event_gap: default_event_gap(),
        }
    }
}

/// How recordings are turned into H.264
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EncodeMode {
    /// 0: MJPEG stream only
    Mjpeg,
    /// 1: MJPEG stream converted after the file closes
    Convert,
    /// 2: frames piped to a live encoder
    Pipe,
}

impl EncodeMode {
    pub fn needs_encoder(&self) -> bool {
        !matches!(self, EncodeMode::Mjpeg)
    }
}

impl TryFrom<u8> for EncodeMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(EncodeMode::Mjpeg),
            1 => Ok(EncodeMode::Convert),
            2 => Ok(EncodeMode::Pipe),
            other => Err(format!("encode_to_h264 must be 0, 1 or 2 (got {})", other)),
        }
    }
}

impl From<EncodeMode> for u8 {
    fn from(mode: EncodeMode) -> Self {
        match mode {
            EncodeMode::Mjpeg => 0,
            EncodeMode::Convert => 1,
            EncodeMode::Pipe => 2,
        }
    }
}

/// Output settings shared by the continuous and motion recorders
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    pub save: bool,

    /// Root directory; each camera writes into a subdirectory
    pub directory: String,

    pub max_days_to_save: u32,

    pub encode_to_h264: EncodeMode,

    /// ffmpeg encoder name (libx264, h264_vaapi, h264_v4l2m2m, ...)
    #[serde(default)]
    pub h264_encoder: Option<String>,

    /// Target bitrate in kbit/s
    #[serde(default)]
    pub bitrate: Option<u32>,

    /// Keep the MJPEG intermediate after a successful mode 1 conversion
    #[serde(default)]
    pub keep_intermediate: bool,

    /// Write a JSON sidecar next to each motion recording
    #[serde(default)]
    pub save_metadata: bool,
}

impl OutputConfig {
    pub fn directory(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_days_to_save as u64 * 24 * 3600)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if !self.save {
            return Ok(());
        }

        if self.directory.trim().is_empty() {
            return Err(invalid(format!("{}.directory must not be empty", section)));
        }

        if self.max_days_to_save < 1 {
            return Err(invalid(format!(
                "{}.max_days_to_save must be at least 1",
                section
            )));
        }

        if self.encode_to_h264.needs_encoder() {
            match self.h264_encoder.as_deref() {
                Some(encoder) if !encoder.trim().is_empty() => {}
                _ => {
                    return Err(invalid(format!(
                        "{}.h264_encoder is required when encode_to_h264 is 1 or 2",
                        section
                    )))
                }
            }

            match self.bitrate {
                Some(bitrate) if bitrate >= 1 => {}
                _ => {
                    return Err(invalid(format!(
                        "{}.bitrate must be at least 1 when encode_to_h264 is 1 or 2",
                        section
                    )))
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EncoderConfig {
    /// Encoder executable
    pub program: String,

    /// Arguments placed before the generated encoder arguments
    #[serde(default)]
    pub program_args: Vec<String>,

    /// Concurrent conversion jobs
    pub workers: usize,

    /// Extra attempts after a retryable failure
    pub max_retries: u32,

    pub retry_backoff_ms: u64,

    /// Time in-flight conversions get to finish on shutdown
    pub shutdown_grace_seconds: u64,

    /// Time a piped encoder gets to finalize its container
    pub finalize_timeout_seconds: u64,

    /// Scheduling priority applied to encoder processes (unix)
    pub niceness: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Frames buffered for each continuous recorder before the oldest drop
    pub recorder_queue_depth: usize,

    pub max_consecutive_failures: u32,

    pub retry_backoff_initial_ms: u64,

    pub retry_backoff_max_ms: u64,

    /// Read timeout for hardware devices
    pub read_timeout_ms: u64,

    /// Closed motion events waiting for the motion recorder
    pub motion_event_queue: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// IANA zone used for filenames and hour boundaries
    pub timezone: String,

    pub retention_interval_seconds: u64,

    pub retention_initial_delay_seconds: u64,

    /// Stop on 'q' or Esc from the controlling terminal
    pub keyboard_shutdown: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogsConfig {
    pub save: bool,
    pub directory: String,
    /// minutely, hourly, daily or never
    pub rotation: String,
    pub max_files: usize,
}

impl CamwatchConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_file("camwatch.toml")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("recordings.save", true)?
            .set_default("recordings.directory", default_recordings_directory())?
            .set_default("recordings.max_days_to_save", default_max_days())?
            .set_default("recordings.encode_to_h264", 0)?
            .set_default("motion.save", true)?
            .set_default("motion.directory", default_motion_directory())?
            .set_default("motion.max_days_to_save", default_max_days())?
            .set_default("motion.encode_to_h264", 0)?
            .set_default("encoder.program", default_encoder_program())?
            .set_default("encoder.workers", default_encoder_workers() as i64)?
            .set_default("encoder.max_retries", default_encoder_retries())?
            .set_default("encoder.retry_backoff_ms", default_retry_backoff_ms())?
            .set_default("encoder.shutdown_grace_seconds", default_shutdown_grace())?
            .set_default(
                "encoder.finalize_timeout_seconds",
                default_finalize_timeout(),
            )?
            .set_default("encoder.niceness", default_niceness())?
            .set_default(
                "capture.recorder_queue_depth",
                default_recorder_queue_depth() as i64,
            )?
            .set_default(
                "capture.max_consecutive_failures",
                default_max_consecutive_failures(),
            )?
            .set_default("capture.retry_backoff_initial_ms", default_backoff_initial())?
            .set_default("capture.retry_backoff_max_ms", default_backoff_max())?
            .set_default("capture.read_timeout_ms", default_read_timeout())?
            .set_default(
                "capture.motion_event_queue",
                default_motion_event_queue() as i64,
            )?
            .set_default("system.timezone", default_timezone())?
            .set_default(
                "system.retention_interval_seconds",
                default_retention_interval(),
            )?
            .set_default(
                "system.retention_initial_delay_seconds",
                default_retention_initial_delay(),
            )?
            .set_default("system.keyboard_shutdown", false)?
            .set_default("logs.save", false)?
            .set_default("logs.directory", default_logs_directory())?
            .set_default("logs.rotation", default_logs_rotation())?
            .set_default("logs.max_files", default_logs_max_files() as i64)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("CAMWATCH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: CamwatchConfig = settings.try_deserialize()?;

        info!(
            "Configuration loaded with {} camera(s)",
            config.cameras.len()
        );
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut ports = HashSet::new();

        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err(invalid("camera id must not be empty"));
            }
            if !ids.insert(camera.id.as_str()) {
                return Err(invalid(format!("duplicate camera id '{}'", camera.id)));
            }
            if camera.name.trim().is_empty() {
                return Err(invalid(format!("camera '{}' has an empty name", camera.id)));
            }
            if !names.insert(camera.normalized_name()) {
                return Err(invalid(format!("duplicate camera name '{}'", camera.name)));
            }
            if camera.port == 0 {
                return Err(invalid(format!("camera '{}' port must be positive", camera.id)));
            }
            if !ports.insert(camera.port) {
                return Err(invalid(format!("duplicate port number {}", camera.port)));
            }
            if camera.target_fps == 0 {
                return Err(invalid(format!(
                    "camera '{}' target_fps must be positive",
                    camera.id
                )));
            }
            if camera.stream_quality > 100 {
                return Err(invalid(format!(
                    "camera '{}' stream_quality must be between 0 and 100",
                    camera.id
                )));
            }
            if let Some(format) = &camera.source_format {
                if format.chars().count() != 4 {
                    return Err(invalid(format!(
                        "camera '{}' source_format must be a 4-character code",
                        camera.id
                    )));
                }
            }
            for (field, value) in [
                ("width", camera.width),
                ("height", camera.height),
                ("source_fps", camera.source_fps),
            ] {
                if value == Some(0) {
                    return Err(invalid(format!(
                        "camera '{}' {} must be positive",
                        camera.id, field
                    )));
                }
            }

            validate_motion(&camera.id, &camera.motion)?;
        }

        self.recordings.validate("recordings")?;
        if self.cameras.iter().any(|c| c.motion.enabled) {
            self.motion.validate("motion")?;
        }

        if self.encoder.program.trim().is_empty() {
            return Err(invalid("encoder.program must not be empty"));
        }
        if self.encoder.workers == 0 {
            return Err(invalid("encoder.workers must be at least 1"));
        }

        if self.capture.recorder_queue_depth == 0 {
            return Err(invalid("capture.recorder_queue_depth must be at least 1"));
        }
        if self.capture.max_consecutive_failures == 0 {
            return Err(invalid("capture.max_consecutive_failures must be at least 1"));
        }
        if self.capture.motion_event_queue == 0 {
            return Err(invalid("capture.motion_event_queue must be at least 1"));
        }

        self.timezone()?;

        if self.logs.save {
            if self.logs.max_files == 0 {
                return Err(invalid("logs.max_files must be at least 1"));
            }
            if !matches!(
                self.logs.rotation.as_str(),
                "minutely" | "hourly" | "daily" | "never"
            ) {
                return Err(invalid(format!(
                    "logs.rotation must be minutely, hourly, daily or never (got '{}')",
                    self.logs.rotation
                )));
            }
        }

        Ok(())
    }

    /// Configured timezone for filenames and rotation boundaries
    pub fn timezone(&self) -> Result<Tz> {
        self.system.timezone.parse::<Tz>().map_err(|_| {
            invalid(format!(
                "system.timezone '{}' is not a known timezone",
                self.system.timezone
            ))
        })
    }

    /// Sample configuration used by `--print-config`
    pub fn example() -> Self {
        let mut config = Self::default();
        config.cameras.push(CameraConfig {
            id: "front".to_string(),
            name: "Front Door".to_string(),
            device: default_camera_device(),
            port: default_camera_port(),
            target_fps: default_target_fps(),
            stream_quality: default_stream_quality(),
            show_fps: false,
            source_format: Some("MJPG".to_string()),
            width: Some(1280),
            height: Some(720),
            source_fps: None,
            motion: MotionConfig {
                enabled: true,
                ..MotionConfig::default()
            },
        });
        config
    }
}

fn validate_motion(camera_id: &str, motion: &MotionConfig) -> Result<()> {
    if !motion.enabled {
        return Ok(());
    }

    if !(1..=255).contains(&motion.noise_level) {
        return Err(invalid(format!(
            "camera '{}' motion.noise_level must be between 1 and 255",
            camera_id
        )));
    }

    for (field, value) in [
        ("pixel_threshold", motion.pixel_threshold),
        ("object_threshold", motion.object_threshold),
    ] {
        if !(value > 0.0 && value < 100.0) {
            return Err(invalid(format!(
                "camera '{}' motion.{} must be a percentage between 0 and 100",
                camera_id, field
            )));
        }
    }

    if motion.minimum_motion_frames < 1 {
        return Err(invalid(format!(
            "camera '{}' motion.minimum_motion_frames must be at least 1",
            camera_id
        )));
    }

    Ok(())
}

fn invalid<S: Into<String>>(message: S) -> CamwatchError {
    CamwatchError::ConfigInvalid(message.into())
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save: true,
            directory: default_recordings_directory(),
            max_days_to_save: default_max_days(),
            encode_to_h264: EncodeMode::Mjpeg,
            h264_encoder: None,
            bitrate: None,
            keep_intermediate: false,
            save_metadata: false,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_encoder_program(),
            program_args: Vec::new(),
            workers: default_encoder_workers(),
            max_retries: default_encoder_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            shutdown_grace_seconds: default_shutdown_grace(),
            finalize_timeout_seconds: default_finalize_timeout(),
            niceness: default_niceness(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            recorder_queue_depth: default_recorder_queue_depth(),
            max_consecutive_failures: default_max_consecutive_failures(),
            retry_backoff_initial_ms: default_backoff_initial(),
            retry_backoff_max_ms: default_backoff_max(),
            read_timeout_ms: default_read_timeout(),
            motion_event_queue: default_motion_event_queue(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            retention_interval_seconds: default_retention_interval(),
            retention_initial_delay_seconds: default_retention_initial_delay(),
            keyboard_shutdown: false,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            save: false,
            directory: default_logs_directory(),
            rotation: default_logs_rotation(),
            max_files: default_logs_max_files(),
        }
    }
}

impl Default for CamwatchConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            recordings: OutputConfig::default(),
            motion: OutputConfig {
                directory: default_motion_directory(),
                ..OutputConfig::default()
            },
            encoder: EncoderConfig::default(),
            capture: CaptureConfig::default(),
            system: SystemConfig::default(),
            logs: LogsConfig::default(),
        }
    }
}

// Default value functions
fn default_camera_device() -> String {
    "synthetic".to_string()
}
fn default_camera_port() -> u16 {
    8081
}
fn default_target_fps() -> u32 {
    15
}
fn default_stream_quality() -> u8 {
    80
}

fn default_noise_level() -> u32 {
    25
}
fn default_pixel_threshold() -> f64 {
    1.0
}
fn default_object_threshold() -> f64 {
    0.5
}
fn default_minimum_motion_frames() -> u32 {
    3
}
fn default_pre_capture() -> u32 {
    30
}
fn default_post_capture() -> u32 {
    30
}
fn default_event_gap() -> u64 {
    10
}

fn default_recordings_directory() -> String {
    "./recordings".to_string()
}
fn default_motion_directory() -> String {
    "./motion".to_string()
}
fn default_max_days() -> u32 {
    7
}

fn default_encoder_program() -> String {
    "ffmpeg".to_string()
}
fn default_encoder_workers() -> usize {
    2
}
fn default_encoder_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    2000
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_finalize_timeout() -> u64 {
    5
}
fn default_niceness() -> i32 {
    10
}

fn default_recorder_queue_depth() -> usize {
    100
}
fn default_max_consecutive_failures() -> u32 {
    10
}
fn default_backoff_initial() -> u64 {
    50
}
fn default_backoff_max() -> u64 {
    2000
}
fn default_read_timeout() -> u64 {
    2000
}
fn default_motion_event_queue() -> usize {
    4
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_retention_interval() -> u64 {
    3600
}
fn default_retention_initial_delay() -> u64 {
    60
}

fn default_logs_directory() -> String {
    "./logs".to_string()
}
fn default_logs_rotation() -> String {
    "daily".to_string()
}
fn default_logs_max_files() -> usize {
    7
}
