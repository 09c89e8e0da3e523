use crate::config::OutputConfig;
use crate::recording::naming;
use crate::registry::InUseRegistry;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Extensions of files the recorders produce
const RECORDING_EXTENSIONS: &[&str] = &["mjpeg", "mp4", "avi", "mkv", "ts", "json"];

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Age limit for one recording directory
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub name: String,
    pub directory: PathBuf,
    pub max_age: Duration,
}

impl RetentionPolicy {
    /// Policy for an output section; `None` when that output is not saved
    pub fn from_output(name: &str, output: &OutputConfig) -> Option<Self> {
        output.save.then(|| Self {
            name: name.to_string(),
            directory: output.directory(),
            max_age: output.max_age(),
        })
    }
}

/// Cleanup operation result
#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    /// Expired files left alone because a recorder or conversion holds them
    pub skipped_in_use: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl CleanupResult {
    fn merge(&mut self, other: CleanupResult) {
        self.files_deleted += other.files_deleted;
        self.bytes_freed += other.bytes_freed;
        self.skipped_in_use += other.skipped_in_use;
        self.errors.extend(other.errors);
    }
}

/// Deletes expired recordings from every configured directory.
///
/// A file's age comes from the capture time in its name, or its
/// modification time when the name carries none. Files leased in the
/// in-use registry are never deleted.
pub struct RetentionScheduler {
    policies: Vec<RetentionPolicy>,
    registry: InUseRegistry,
    timezone: Tz,
    cleanup_running: AtomicBool,
}

impl RetentionScheduler {
    pub fn new(policies: Vec<RetentionPolicy>, registry: InUseRegistry, timezone: Tz) -> Self {
        Self {
            policies,
            registry,
            timezone,
            cleanup_running: AtomicBool::new(false),
        }
    }

    pub fn policies(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    /// Sweep every directory now
    pub async fn run_cleanup(&self) -> CleanupResult {
        if self.cleanup_running.swap(true, Ordering::AcqRel) {
            debug!("Cleanup already running, skipping");
            return CleanupResult::default();
        }

        let result = self.sweep_at(SystemTime::now(), false).await;
        self.cleanup_running.store(false, Ordering::Release);

        info!(
            "Cleanup completed: {} files deleted, {} bytes freed, {} in use, {} errors, took {:?}",
            result.files_deleted,
            result.bytes_freed,
            result.skipped_in_use,
            result.errors.len(),
            result.duration
        );
        result
    }

    /// Report what a sweep would delete without deleting anything
    pub async fn dry_run_cleanup(&self) -> CleanupResult {
        let result = self.sweep_at(SystemTime::now(), true).await;
        info!(
            "Dry run: would delete {} files ({} bytes), {} in use",
            result.files_deleted, result.bytes_freed, result.skipped_in_use
        );
        result
    }

    /// Sweep as if the current time were `now`
    pub async fn sweep_at(&self, now: SystemTime, dry_run: bool) -> CleanupResult {
        let start = Instant::now();
        let mut result = CleanupResult::default();

        for policy in &self.policies {
            debug!(
                "Sweeping {} recordings in {} (max age {:?})",
                policy.name,
                policy.directory.display(),
                policy.max_age
            );
            result.merge(self.sweep_policy(policy, now, dry_run).await);
        }

        result.duration = start.elapsed();
        result
    }

    async fn sweep_policy(&self, policy: &RetentionPolicy, now: SystemTime, dry_run: bool) -> CleanupResult {
        let mut result = CleanupResult::default();

        if fs::metadata(&policy.directory).await.is_err() {
            debug!("{} does not exist yet", policy.directory.display());
            return result;
        }

        let mut pending = vec![policy.directory.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    let message = format!("Failed to read {}: {}", dir.display(), e);
                    error!("{}", message);
                    result.errors.push(message);
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        let message = format!("Failed to list {}: {}", dir.display(), e);
                        error!("{}", message);
                        result.errors.push(message);
                        break;
                    }
                };

                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        result.errors.push(format!("Failed to stat {}: {}", path.display(), e));
                        continue;
                    }
                };

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && is_recording(&path) {
                    self.consider(&path, policy, now, dry_run, &mut result).await;
                }
            }
        }

        result
    }

    async fn consider(
        &self,
        path: &Path,
        policy: &RetentionPolicy,
        now: SystemTime,
        dry_run: bool,
        result: &mut CleanupResult,
    ) {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                result.errors.push(format!("Failed to stat {}: {}", path.display(), e));
                return;
            }
        };

        let created = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| naming::parse_start_time(name, self.timezone))
            .or_else(|| metadata.modified().ok());
        let Some(created) = created else {
            return;
        };

        let expired = now
            .duration_since(created)
            .is_ok_and(|age| age > policy.max_age);
        if !expired {
            return;
        }

        if self.registry.contains(path) {
            debug!("Keeping expired {} while it is in use", path.display());
            result.skipped_in_use += 1;
            return;
        }

        if dry_run {
            result.files_deleted += 1;
            result.bytes_freed += metadata.len();
            return;
        }

        match fs::remove_file(path).await {
            Ok(()) => {
                debug!("Deleted {} ({} bytes)", path.display(), metadata.len());
                result.files_deleted += 1;
                result.bytes_freed += metadata.len();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} already deleted", path.display());
            }
            Err(e) => {
                let message = format!("Failed to delete {}: {}", path.display(), e);
                error!("{}", message);
                result.errors.push(message);
            }
        }
    }

    /// Sweep after `initial_delay`, then every `interval`. Sweeps that hit
    /// errors double the wait, up to a day, until one succeeds.
    pub fn spawn(
        self: Arc<Self>,
        initial_delay: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        info!(
            "Starting retention scheduler for {} director{} (every {:?})",
            self.policies.len(),
            if self.policies.len() == 1 { "y" } else { "ies" },
            interval
        );

        tokio::spawn(async move {
            let mut current_interval = interval;
            let mut delay = initial_delay;
            let mut consecutive_failures = 0u32;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let result = self.run_cleanup().await;
                if result.errors.is_empty() {
                    current_interval = interval;
                    consecutive_failures = 0;
                } else {
                    consecutive_failures += 1;
                    current_interval = (current_interval * 2).min(MAX_SWEEP_INTERVAL);
                    warn!(
                        "Cleanup had {} error(s) ({} sweep(s) in a row), next sweep in {:?}",
                        result.errors.len(),
                        consecutive_failures,
                        current_interval
                    );
                }
                delay = current_interval;
            }

            debug!("Retention scheduler stopped");
        })
    }
}

fn is_recording(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| RECORDING_EXTENSIONS.contains(&ext))
}
