use super::command::{EncoderCommand, EncoderSettings};
use crate::error::EncodeError;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin};
use tracing::{debug, info, warn};

/// Long-lived encoder fed JPEG frames on stdin (encode mode 2)
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    finalize_timeout: Duration,
    frames_written: u64,
}

impl EncoderProcess {
    pub fn spawn(
        command: &EncoderCommand,
        settings: &EncoderSettings,
        output: &Path,
        finalize_timeout: Duration,
    ) -> Result<Self, EncodeError> {
        let args = command.pipe_args(settings, output);
        let mut child = command
            .command(&args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(command.program(), e))?;

        let stdin = child.stdin.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(output.to_path_buf(), stderr));
        }

        info!(
            "Started {} encoder for {} (pid {:?})",
            settings.encoder,
            output.display(),
            child.id()
        );

        Ok(Self {
            child,
            stdin,
            output: output.to_path_buf(),
            finalize_timeout,
            frames_written: 0,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Hand one JPEG frame to the encoder
    pub async fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), EncodeError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(EncodeError::Failure {
                details: format!("encoder exited mid-file with {}", status),
            });
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| EncodeError::Failure {
            details: "encoder input already closed".to_string(),
        })?;

        stdin
            .write_all(jpeg)
            .await
            .map_err(|e| EncodeError::Failure {
                details: format!("encoder stopped accepting frames: {}", e),
            })?;

        self.frames_written += 1;
        Ok(())
    }

    /// Signal end of stream and wait for the container to be finalized.
    ///
    /// The encoder is killed if it does not exit within the finalize timeout.
    pub async fn finish(mut self) -> Result<u64, EncodeError> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!("Closing encoder input for {}: {}", self.output.display(), e);
            }
        }

        let status = match tokio::time::timeout(self.finalize_timeout, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(EncodeError::Failure {
                    details: format!("waiting for encoder: {}", e),
                })
            }
            Err(_) => {
                warn!(
                    "Encoder for {} did not finalize within {:?}, killing it",
                    self.output.display(),
                    self.finalize_timeout
                );
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill encoder: {}", e);
                }
                return Err(EncodeError::Timeout {
                    seconds: self.finalize_timeout.as_secs(),
                });
            }
        };

        check_exit(status, &self.output).await?;
        Ok(self.frames_written)
    }

    /// Stop the encoder without waiting for a usable file
    pub async fn abort(mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill().await {
            debug!("Encoder for {} already gone: {}", self.output.display(), e);
        }
    }
}

/// Classify a failed spawn: a missing binary is not worth retrying
pub(crate) fn spawn_error(program: &str, error: io::Error) -> EncodeError {
    if error.kind() == io::ErrorKind::NotFound {
        EncodeError::Fatal {
            details: format!("encoder program '{}' not found", program),
        }
    } else {
        EncodeError::Failure {
            details: format!("failed to start '{}': {}", program, error),
        }
    }
}

/// Success means a zero exit status and a non-empty output file
pub(crate) async fn check_exit(status: ExitStatus, output: &Path) -> Result<(), EncodeError> {
    if !status.success() {
        return Err(EncodeError::Failure {
            details: format!("encoder exited with {}", status),
        });
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(EncodeError::Failure {
            details: format!("encoder produced an empty {}", output.display()),
        }),
        Err(e) => Err(EncodeError::Failure {
            details: format!("encoder output {} missing: {}", output.display(), e),
        }),
    }
}

async fn log_stderr(output: PathBuf, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!("encoder [{}]: {}", output.display(), line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use tempfile::TempDir;

    fn script_command(dir: &TempDir, body: &str) -> EncoderCommand {
        let script = dir.path().join("encode.sh");
        std::fs::write(&script, body).unwrap();
        EncoderCommand::from_config(&EncoderConfig {
            program: "/bin/sh".to_string(),
            program_args: vec![script.to_string_lossy().into_owned()],
            niceness: 0,
            ..EncoderConfig::default()
        })
    }

    fn settings() -> EncoderSettings {
        EncoderSettings {
            encoder: "libx264".to_string(),
            bitrate_kbps: 500,
            fps: 10,
        }
    }

    const COPY_STDIN: &str = r#"for a in "$@"; do out="$a"; done
cat > "$out"
"#;

    #[tokio::test]
    async fn test_piped_frames_reach_output() {
        let dir = TempDir::new().unwrap();
        let command = script_command(&dir, COPY_STDIN);
        let output = dir.path().join("clip.mp4");

        let mut process =
            EncoderProcess::spawn(&command, &settings(), &output, Duration::from_secs(5)).unwrap();
        process.write_frame(b"frame-one").await.unwrap();
        process.write_frame(b"frame-two").await.unwrap();

        assert_eq!(process.finish().await.unwrap(), 2);
        assert_eq!(std::fs::read(&output).unwrap(), b"frame-oneframe-two");
    }

    #[tokio::test]
    async fn test_encoder_crash_is_reported() {
        let dir = TempDir::new().unwrap();
        let command = script_command(&dir, "exit 3\n");
        let output = dir.path().join("clip.mp4");

        let mut process =
            EncoderProcess::spawn(&command, &settings(), &output, Duration::from_secs(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let write = process.write_frame(&vec![0u8; 256 * 1024]).await;
        assert!(matches!(write, Err(EncodeError::Failure { .. })));
    }

    #[tokio::test]
    async fn test_hung_encoder_times_out() {
        let dir = TempDir::new().unwrap();
        let command = script_command(&dir, "sleep 30\n");
        let output = dir.path().join("clip.mp4");

        let process =
            EncoderProcess::spawn(&command, &settings(), &output, Duration::from_millis(200)).unwrap();

        let result = process.finish().await;
        assert!(matches!(result, Err(EncodeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_is_fatal() {
        let command = EncoderCommand::from_config(&EncoderConfig {
            program: "/nonexistent/ffmpeg".to_string(),
            ..EncoderConfig::default()
        });
        let result = EncoderProcess::spawn(
            &command,
            &settings(),
            Path::new("/tmp/never.mp4"),
            Duration::from_secs(1),
        );

        match result {
            Err(e) => assert!(!e.is_retryable()),
            Ok(_) => panic!("spawned a missing program"),
        }
    }
}
