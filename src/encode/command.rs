use crate::config::{EncoderConfig, OutputConfig};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Codec parameters for one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// ffmpeg encoder name, e.g. `libx264` or `h264_vaapi`
    pub encoder: String,
    pub bitrate_kbps: u32,
    /// Frame rate the MJPEG input is interpreted at
    pub fps: u32,
}

impl EncoderSettings {
    /// Settings for an output section, if it names an encoder and bitrate
    pub fn from_output(output: &OutputConfig, fps: u32) -> Option<Self> {
        Some(Self {
            encoder: output.h264_encoder.clone()?,
            bitrate_kbps: output.bitrate?,
            fps: fps.max(1),
        })
    }

    fn codec_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        // hardware encoders need their own pixel formats and device setup
        match self.encoder.as_str() {
            "h264_vaapi" => {
                args.extend(
                    ["-vaapi_device", "/dev/dri/renderD128", "-vf", "format=nv12,hwupload"]
                        .map(String::from),
                );
                args.extend(["-c:v".to_string(), self.encoder.clone()]);
            }
            "h264_v4l2m2m" => {
                args.extend(["-c:v".to_string(), self.encoder.clone()]);
                args.extend(["-pix_fmt", "yuv420p"].map(String::from));
            }
            "h264_qsv" => {
                args.extend(["-c:v".to_string(), self.encoder.clone()]);
                args.extend(["-preset", "veryfast"].map(String::from));
            }
            _ => {
                args.extend(["-c:v".to_string(), self.encoder.clone()]);
                args.extend(["-preset", "ultrafast"].map(String::from));
            }
        }

        args.extend(["-b:v".to_string(), format!("{}k", self.bitrate_kbps)]);
        args
    }
}

/// How the external encoder is launched
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    program: String,
    program_args: Vec<String>,
    niceness: i32,
}

impl EncoderCommand {
    pub fn from_config(config: &EncoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            program_args: config.program_args.clone(),
            niceness: config.niceness,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments converting an MJPEG file to H.264 MP4
    pub fn convert_args(&self, settings: &EncoderSettings, input: &Path, output: &Path) -> Vec<String> {
        let mut args = input_args(settings, &input.to_string_lossy());
        args.extend(settings.codec_args());
        args.extend(["-movflags", "+faststart"].map(String::from));
        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Arguments encoding JPEG frames read from stdin
    pub fn pipe_args(&self, settings: &EncoderSettings, output: &Path) -> Vec<String> {
        let mut args = input_args(settings, "pipe:0");
        args.extend(settings.codec_args());
        args.push(output.to_string_lossy().into_owned());
        args
    }

    pub fn probe_args(&self) -> Vec<String> {
        ["-hide_banner", "-encoders"].map(String::from).to_vec()
    }

    /// Process ready to spawn: killed when dropped, lowered priority on unix
    pub fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.program_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        if self.niceness != 0 {
            let niceness = self.niceness;
            // SAFETY: setpriority is async-signal-safe and touches no shared state
            unsafe {
                command.pre_exec(move || {
                    libc::setpriority(libc::PRIO_PROCESS as _, 0, niceness);
                    Ok(())
                });
            }
        }

        command
    }
}

fn input_args(settings: &EncoderSettings, input: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "mjpeg".to_string(),
        "-framerate".to_string(),
        settings.fps.to_string(),
        "-i".to_string(),
        input.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings(encoder: &str) -> EncoderSettings {
        EncoderSettings {
            encoder: encoder.to_string(),
            bitrate_kbps: 2000,
            fps: 15,
        }
    }

    fn joined(args: Vec<String>) -> String {
        args.join(" ")
    }

    #[test]
    fn test_convert_args() {
        let command = EncoderCommand::from_config(&EncoderConfig::default());
        let args = command.convert_args(
            &settings("libx264"),
            &PathBuf::from("/rec/a.mjpeg"),
            &PathBuf::from("/rec/a.mp4"),
        );

        assert_eq!(
            joined(args),
            "-hide_banner -loglevel error -y -f mjpeg -framerate 15 -i /rec/a.mjpeg \
             -c:v libx264 -preset ultrafast -b:v 2000k -movflags +faststart /rec/a.mp4"
        );
    }

    #[test]
    fn test_hardware_encoder_variants() {
        let command = EncoderCommand::from_config(&EncoderConfig::default());
        let out = PathBuf::from("o.mp4");

        let vaapi = joined(command.pipe_args(&settings("h264_vaapi"), &out));
        assert!(vaapi.contains("-vaapi_device /dev/dri/renderD128 -vf format=nv12,hwupload -c:v h264_vaapi"));
        assert!(vaapi.contains("-i pipe:0"));

        let m2m = joined(command.pipe_args(&settings("h264_v4l2m2m"), &out));
        assert!(m2m.contains("-c:v h264_v4l2m2m -pix_fmt yuv420p -b:v 2000k"));

        let qsv = joined(command.pipe_args(&settings("h264_qsv"), &out));
        assert!(qsv.contains("-preset veryfast"));
        assert!(!qsv.contains("+faststart"));
    }

    #[test]
    fn test_settings_from_output() {
        let mut output = OutputConfig::default();
        assert!(EncoderSettings::from_output(&output, 10).is_none());

        output.h264_encoder = Some("libx264".to_string());
        output.bitrate = Some(800);
        let settings = EncoderSettings::from_output(&output, 0).unwrap();
        assert_eq!(settings.bitrate_kbps, 800);
        assert_eq!(settings.fps, 1);
    }

    #[test]
    fn test_program_args_prefix() {
        let config = EncoderConfig {
            program: "/bin/sh".to_string(),
            program_args: vec!["encode.sh".to_string()],
            ..EncoderConfig::default()
        };
        let command = EncoderCommand::from_config(&config);
        let std_command = command.command(&["-y".to_string()]);
        let args: Vec<String> = std_command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(command.program(), "/bin/sh");
        assert_eq!(args, vec!["encode.sh", "-y"]);
    }
}
