//! Condition polling with timeout and cancellation
//!
//! The system under test reconciles in the background, so assertions are
//! expressed as predicates re-checked on a fixed interval. A predicate answers
//! `Ok(true)` when done, `Ok(false)` to keep waiting, or `Err` to abort
//! immediately: a hard error is never retried.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Default polling interval for wait operations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default budget for a single condition
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval and budget for a poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between predicate invocations
    pub interval: Duration,
    /// Maximum time to wait for the predicate
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollConfig {
    /// Default interval with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Poll `check_fn` until it returns `Ok(true)`, errors, or the budget runs out.
///
/// The first invocation happens one interval after the call, then once per
/// interval. An invocation scheduled past the deadline is not made: a
/// predicate first satisfied on its Nth call succeeds exactly when
/// `timeout >= N * interval`.
///
/// Cancelling `cancel` interrupts the wait at once with `Error::Cancelled`,
/// and the deadline bounds each invocation too: a predicate still running
/// when either fires is dropped.
pub async fn poll_until<F, Fut>(
    description: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut attempts = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(what = %description, attempts, "poll cancelled");
                return Err(Error::cancelled(description));
            }
            _ = sleep(config.interval) => {}
        }

        if Instant::now() > deadline {
            debug!(what = %description, attempts, "poll timed out");
            return Err(Error::timeout(description, config.timeout));
        }

        attempts += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(what = %description, attempts, "poll cancelled during check");
                return Err(Error::cancelled(description));
            }
            outcome = timeout_at(deadline, check_fn()) => outcome,
        };

        let Ok(checked) = outcome else {
            debug!(what = %description, attempts, "poll timed out during check");
            return Err(Error::timeout(description, config.timeout));
        };

        match checked {
            Ok(true) => {
                debug!(
                    what = %description,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "condition satisfied"
                );
                return Ok(());
            }
            Ok(false) => {
                trace!(what = %description, attempts, "condition not yet met");
            }
            Err(e) => return Err(e),
        }
    }
}
