//! Actuator sinks: getting a new focus target to the mirror controller.

use async_trait::async_trait;
use bf_types::{BfError, BfResult, PublishError, RetryConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Transport for a new focus target.
///
/// Publishing the same target twice must be harmless; callers retry.
#[async_trait]
pub trait ActuatorSink: Send + Sync {
    /// Deliver `target` to the device.
    async fn publish(&mut self, target: i64) -> BfResult<()>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Publish with retries. Returns the number of attempts used.
pub async fn publish_with_retry<S>(sink: &mut S, target: i64, policy: &RetryPolicy) -> BfResult<u32>
where
    S: ActuatorSink + ?Sized,
{
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        match sink.publish(target).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(
                        sink = sink.name(),
                        focus = target,
                        attempt,
                        "publish succeeded after retry"
                    );
                }
                return Ok(attempt);
            }
            Err(e) => {
                warn!(
                    sink = sink.name(),
                    focus = target,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "publish failed"
                );
                last_error = e.to_string();
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }

    Err(PublishError::RetriesExhausted {
        attempts: policy.max_attempts,
        last_error,
    }
    .into())
}

/// Copies the parameter file into a directory the mirror computer reads,
/// e.g. a network share.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    source: PathBuf,
    target_directory: PathBuf,
}

impl DirectorySink {
    pub fn new(source: impl Into<PathBuf>, target_directory: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target_directory: target_directory.into(),
        }
    }

    fn destination(&self) -> BfResult<PathBuf> {
        let name = self.source.file_name().ok_or_else(|| {
            BfError::Publish(PublishError::Transfer {
                message: format!("{} has no file name", self.source.display()),
            })
        })?;
        Ok(self.target_directory.join(name))
    }
}

#[async_trait]
impl ActuatorSink for DirectorySink {
    async fn publish(&mut self, target: i64) -> BfResult<()> {
        let destination = self.destination()?;
        let staging = staging_path(&destination);
        let transfer_error = |e: std::io::Error| {
            BfError::Publish(PublishError::Transfer {
                message: format!("copy to {}: {e}", destination.display()),
            })
        };

        tokio::fs::copy(&self.source, &staging)
            .await
            .map_err(transfer_error)?;
        tokio::fs::rename(&staging, &destination)
            .await
            .map_err(transfer_error)?;

        info!(focus = target, destination = %destination.display(), "parameter file copied");
        Ok(())
    }

    fn name(&self) -> &str {
        "directory"
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.tmp"))
}

/// Keeps published targets in memory. Backs `--dry-run` and tests; can be
/// told to fail a number of times first.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    published: Vec<i64>,
    attempts: u32,
    failures_remaining: u32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `failures` publishes.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: failures,
            ..Self::default()
        }
    }

    pub fn fail_next(&mut self, failures: u32) {
        self.failures_remaining = failures;
    }

    pub fn published(&self) -> &[i64] {
        &self.published
    }

    pub fn last(&self) -> Option<i64> {
        self.published.last().copied()
    }

    /// Publish calls, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[async_trait]
impl ActuatorSink for RecordingSink {
    async fn publish(&mut self, target: i64) -> BfResult<()> {
        self.attempts += 1;
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(PublishError::Injected {
                message: format!("refusing target {target}"),
            }
            .into());
        }
        info!(focus = target, "dry run: target not sent to device");
        self.published.push(target);
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
