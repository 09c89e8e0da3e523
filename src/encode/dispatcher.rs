use super::command::{EncoderCommand, EncoderSettings};
use super::process::{check_exit, spawn_error};
use crate::config::EncoderConfig;
use crate::error::EncodeError;
use crate::registry::{InUseRegistry, PathLease};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const JOB_QUEUE_DEPTH: usize = 64;

/// Convert one closed MJPEG recording to H.264
#[derive(Debug, Clone)]
pub struct ConvertJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub settings: EncoderSettings,
    /// Keep the MJPEG intermediate after a successful conversion
    pub keep_intermediate: bool,
}

/// Final outcome of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Output written; the intermediate was removed unless configured to keep it
    Converted,
    /// Retries exhausted or fatal failure; the intermediate is the artifact
    KeptIntermediate { reason: String },
    /// Shutdown grace expired before the job finished
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub status: JobStatus,
    pub attempts: u32,
}

/// Completion future for a submitted job
pub struct JobHandle {
    input: PathBuf,
    output: PathBuf,
    rx: oneshot::Receiver<JobReport>,
}

impl JobHandle {
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Wait for the job's report. A job dropped by shutdown reports `Abandoned`.
    pub async fn wait(self) -> JobReport {
        match self.rx.await {
            Ok(report) => report,
            Err(_) => JobReport {
                input: self.input,
                output: self.output,
                status: JobStatus::Abandoned,
                attempts: 0,
            },
        }
    }
}

struct QueuedJob {
    job: ConvertJob,
    reply: oneshot::Sender<JobReport>,
    _leases: [PathLease; 2],
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

/// Bounded worker pool running the external encoder.
///
/// Inputs and outputs of queued and running jobs are leased in the shared
/// [`InUseRegistry`] so retention never removes them mid-conversion.
pub struct EncodeDispatcher {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    registry: InUseRegistry,
}

impl EncodeDispatcher {
    pub fn start(config: &EncoderConfig, registry: InUseRegistry) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(JOB_QUEUE_DEPTH);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let command = EncoderCommand::from_config(config);
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        };

        let workers = (0..config.workers.max(1))
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&receiver),
                    command.clone(),
                    policy.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(
            "Encode dispatcher started with {} worker(s) using '{}'",
            config.workers.max(1),
            command.program()
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            cancel,
            registry,
        }
    }

    /// Queue a conversion; the returned handle resolves with its report
    pub async fn submit(&self, job: ConvertJob) -> Result<JobHandle, EncodeError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(EncodeError::DispatcherClosed)?;

        let (reply, rx) = oneshot::channel();
        let handle = JobHandle {
            input: job.input.clone(),
            output: job.output.clone(),
            rx,
        };
        let leases = [
            self.registry.lease(&job.input),
            self.registry.lease(&job.output),
        ];

        debug!("Queueing conversion of {}", job.input.display());
        sender
            .send(QueuedJob {
                job,
                reply,
                _leases: leases,
            })
            .await
            .map_err(|_| EncodeError::DispatcherClosed)?;

        Ok(handle)
    }

    pub fn is_accepting(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting jobs and give queued and running ones `grace` to finish.
    ///
    /// Returns false if the grace period expired and jobs were abandoned.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        drop(self.sender.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return true;
        }

        info!(
            "Waiting up to {:?} for {} encode worker(s) to drain",
            grace,
            workers.len()
        );

        let all = futures::future::join_all(workers);
        tokio::pin!(all);

        if tokio::time::timeout(grace, &mut all).await.is_ok() {
            info!("Encode dispatcher drained");
            return true;
        }

        warn!("Encode grace period expired, abandoning remaining jobs");
        self.cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(5), &mut all)
            .await
            .is_err()
        {
            error!("Encode workers did not stop after cancellation");
        }
        false
    }
}

async fn worker_loop(
    index: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    command: EncoderCommand,
    policy: RetryPolicy,
    cancel: CancellationToken,
) {
    debug!("Encode worker {} started", index);

    loop {
        let queued = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(queued) = queued else {
            break;
        };

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            report = run_job(&command, &queued.job, &policy) => Some(report),
        };

        // the encoder child is killed once its future is dropped above
        let report = match finished {
            Some(report) => report,
            None => abandon(&queued.job).await,
        };

        let _ = queued.reply.send(report);
    }

    debug!("Encode worker {} stopped", index);
}

/// Report a job cut off by shutdown; a partial output is removed so only
/// the kept MJPEG remains
async fn abandon(job: &ConvertJob) -> JobReport {
    warn!("Abandoning conversion of {}", job.input.display());
    if tokio::fs::remove_file(&job.output).await.is_ok() {
        debug!("Removed partial output {}", job.output.display());
    }

    JobReport {
        input: job.input.clone(),
        output: job.output.clone(),
        status: JobStatus::Abandoned,
        attempts: 0,
    }
}

async fn run_job(command: &EncoderCommand, job: &ConvertJob, policy: &RetryPolicy) -> JobReport {
    let mut attempts = 0;

    let status = loop {
        attempts += 1;
        match convert_once(command, job).await {
            Ok(()) => {
                info!(
                    "Converted {} -> {}",
                    job.input.display(),
                    job.output.display()
                );
                if !job.keep_intermediate {
                    if let Err(e) = tokio::fs::remove_file(&job.input).await {
                        warn!(
                            "Failed to remove intermediate {}: {}",
                            job.input.display(),
                            e
                        );
                    }
                }
                break JobStatus::Converted;
            }
            Err(e) if e.is_retryable() && attempts <= policy.max_retries => {
                let delay = policy.backoff * attempts;
                warn!(
                    "Conversion of {} failed (attempt {}): {}; retrying in {:?}",
                    job.input.display(),
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    "Giving up on {} after {} attempt(s), keeping the MJPEG file: {}",
                    job.input.display(),
                    attempts,
                    e
                );
                break JobStatus::KeptIntermediate {
                    reason: e.to_string(),
                };
            }
        }
    };

    JobReport {
        input: job.input.clone(),
        output: job.output.clone(),
        status,
        attempts,
    }
}

async fn convert_once(command: &EncoderCommand, job: &ConvertJob) -> Result<(), EncodeError> {
    if tokio::fs::metadata(&job.input).await.is_err() {
        return Err(EncodeError::Fatal {
            details: format!("input {} is missing", job.input.display()),
        });
    }

    let args = command.convert_args(&job.settings, &job.input, &job.output);
    let child = command
        .command(&args)
        .spawn()
        .map_err(|e| spawn_error(command.program(), e))?;

    let output = child.wait_with_output().await.map_err(|e| EncodeError::Failure {
        details: format!("waiting for encoder: {}", e),
    })?;

    let result = check_exit(output.status, &job.output).await;
    if let Err(e) = &result {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Encoder stderr for {}: {}", job.input.display(), stderr.trim());
        }
        // partial output must not pass for a finished file
        if tokio::fs::remove_file(&job.output).await.is_ok() {
            debug!("Removed partial output {} after: {}", job.output.display(), e);
        }
    }
    result
}
