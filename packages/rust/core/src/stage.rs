//! Retry, backoff and per-attempt timeout around a single stage.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use newsdesk_shared::{ErrorKind, RunSettings, StageError, StageKind};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Capped exponential backoff without jitter, so delays never decrease.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_DELAY,
            factor: DEFAULT_BACKOFF_FACTOR,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Self {
            initial: Duration::ZERO,
            factor: 1.0,
            max: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        // A factor below 1 would shrink delays.
        let factor = self.factor.max(1.0);
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let nanos = self.initial.as_nanos() as f64 * factor.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max.max(self.initial);
        }
        Duration::from_nanos(nanos as u64)
    }
}

/// How a stage is retried.
#[derive(Debug, Clone)]
pub struct StagePolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Error kinds worth another attempt.
    pub retryable: BTreeSet<ErrorKind>,
    pub backoff: Backoff,
    /// Deadline for a single attempt. `None` waits forever.
    pub attempt_timeout: Option<Duration>,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retryable: ErrorKind::ALL
                .into_iter()
                .filter(|kind| kind.is_retriable_by_default())
                .collect(),
            backoff: Backoff::default(),
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
        }
    }
}

impl StagePolicy {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            attempt_timeout: Some(Duration::from_secs(settings.stage_timeout_secs)),
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a stage gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// The last error's kind was retryable (so retries ran out).
    pub retriable: bool,
    pub attempts: u32,
}

/// Outcome of running one stage to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult<T> {
    Ok(T),
    Failed(StageFailure),
}

impl<T> StageResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            Self::Ok(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs one stage attempt factory under a [`StagePolicy`].
#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    policy: StagePolicy,
}

impl StageRunner {
    pub fn new(policy: StagePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable kind, or
    /// `max_retries + 1` attempts have been made.
    ///
    /// Every call to `attempt` builds a fresh future; nothing from a failed
    /// attempt carries over.
    #[instrument(skip_all, fields(source = %source, stage = %stage))]
    pub async fn run<T, F, Fut>(&self, source: &str, stage: StageKind, mut attempt: F) -> StageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StageError>>,
    {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, attempt())
                    .await
                    .unwrap_or_else(|_| {
                        Err(StageError::timeout(format!(
                            "attempt exceeded {}ms",
                            limit.as_millis()
                        )))
                    }),
                None => attempt().await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "stage succeeded after retry");
                    }
                    return StageResult::Ok(value);
                }
                Err(err) => err,
            };

            let retriable = self.policy.is_retryable(err.kind);
            if !retriable || attempts >= max_attempts {
                debug!(attempts, kind = %err.kind, retriable, "stage failed");
                return StageResult::Failed(StageFailure {
                    kind: err.kind,
                    message: err.message,
                    retriable,
                    attempts,
                });
            }

            let delay = self.policy.backoff.delay(attempts - 1);
            warn!(
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "stage attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
