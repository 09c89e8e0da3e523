use super::command::EncoderCommand;
use super::process::spawn_error;
use crate::error::EncodeError;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Outcome of checking one configured encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub encoder: String,
    pub available: bool,
}

/// Ask the encoder program which H.264 encoders it provides and report
/// whether each of `wanted` is among them
pub async fn probe_encoders(
    command: &EncoderCommand,
    wanted: &[String],
) -> Result<Vec<ProbeResult>, EncodeError> {
    let output = command
        .command(&command.probe_args())
        .stdout(std::process::Stdio::piped())
        .output()
        .await
        .map_err(|e| spawn_error(command.program(), e))?;

    if !output.status.success() {
        return Err(EncodeError::Failure {
            details: format!(
                "'{}' encoder listing exited with {}",
                command.program(),
                output.status
            ),
        });
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let available = h264_encoders(&listing);
    debug!("H.264 encoders reported: {:?}", available);

    let results = wanted
        .iter()
        .map(|encoder| ProbeResult {
            encoder: encoder.clone(),
            available: available.contains(encoder.as_str()),
        })
        .collect::<Vec<_>>();

    for result in &results {
        info!(
            "Encoder {}: {}",
            result.encoder,
            if result.available { "available" } else { "missing" }
        );
    }

    Ok(results)
}

/// Encoder names from an `-encoders` listing whose codec is h264
fn h264_encoders(listing: &str) -> BTreeSet<&str> {
    listing
        .lines()
        .filter(|line| line.contains("(codec h264)"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .collect()
}
