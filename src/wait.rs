//! Poll loops that turn asynchronous provider operations into awaited results.
//!
//! Every wait runs inside a [`WaitContext`]: a fixed poll interval, an
//! optional deadline, and a cancellation token. The default context has no
//! deadline, so a wait only ends on a terminal provider status, a query
//! error, or cancellation.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hcloud::{Action, ActionStatus, CloudApi, ProviderError};

/// Outcome of a single poll.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Probe<T> {
    /// The operation is still in progress; poll again.
    Pending,
    /// The operation reached its goal.
    Ready(T),
}

/// Errors raised by poll loops.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// Raised when the wait's cancellation token fires.
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation being waited on.
        operation: String,
    },
    /// Raised when the optional deadline elapses.
    #[error("timed out after {elapsed:?} waiting for {operation}")]
    Timeout {
        /// Operation being waited on.
        operation: String,
        /// Time spent before giving up.
        elapsed: Duration,
    },
    /// Raised when the provider reports the action as failed.
    #[error("action {action_id} ({command}) failed: {code}: {message}")]
    ActionFailed {
        /// Provider action identifier.
        action_id: u64,
        /// Command the action was running.
        command: String,
        /// Provider error code.
        code: String,
        /// Provider error message.
        message: String,
    },
    /// Raised when a status query fails; polling never retries these.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Pacing, deadline, and cancellation shared by all poll loops of a driver.
#[derive(Clone, Debug)]
pub struct WaitContext {
    poll_interval: Duration,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl WaitContext {
    /// Creates an unbounded context sleeping `poll_interval` between polls.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bounds each wait to `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the cancellation token, for example with a child of a
    /// process-wide shutdown token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Interval slept between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Optional per-wait deadline.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Token that aborts any wait running under this context.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Calls `probe` until it reports [`Probe::Ready`], sleeping the poll
    /// interval between calls. The first probe runs immediately.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `probe`, or a [`WaitError`]
    /// converted into `E` when the wait is cancelled or times out.
    pub async fn poll_until<T, E, F, Fut>(&self, operation: &str, mut probe: F) -> Result<T, E>
    where
        E: From<WaitError>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, E>>,
    {
        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(operation).into());
            }

            attempt = attempt.saturating_add(1);
            if let Probe::Ready(value) = probe().await? {
                debug!(operation, attempt, "wait complete");
                return Ok(value);
            }
            debug!(operation, attempt, "still pending");

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::Timeout {
                            operation: operation.to_owned(),
                            elapsed: now.duration_since(started),
                        }
                        .into());
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };

            tokio::select! {
                () = self.cancel.cancelled() => return Err(self.cancelled(operation).into()),
                () = sleep(pause) => {}
            }
        }
    }

    fn cancelled(&self, operation: &str) -> WaitError {
        debug!(operation, interval = ?self.poll_interval, "wait cancelled");
        WaitError::Cancelled {
            operation: operation.to_owned(),
        }
    }
}

fn classify(action: Action) -> Result<Probe<Action>, WaitError> {
    match action.status {
        ActionStatus::Success => Ok(Probe::Ready(action)),
        ActionStatus::Error => {
            let (code, message) = action.error.map_or_else(
                || (String::from("unknown"), String::from("no error detail reported")),
                |detail| (detail.code, detail.message),
            );
            Err(WaitError::ActionFailed {
                action_id: action.id,
                command: action.command,
                code,
                message,
            })
        }
        ActionStatus::Running | ActionStatus::Unknown => Ok(Probe::Pending),
    }
}

/// Waits for `action` to reach a terminal status.
///
/// `action` is only used for its id and command: every observation,
/// including the first, is fetched from the provider by id.
///
/// # Errors
///
/// Returns [`WaitError::ActionFailed`] with the provider's error detail when
/// the action fails, [`WaitError::Provider`] when a status query fails, and
/// [`WaitError::Cancelled`] or [`WaitError::Timeout`] when the context ends
/// the wait.
pub async fn await_action<A>(
    api: &A,
    action: &Action,
    context: &WaitContext,
) -> Result<Action, WaitError>
where
    A: CloudApi + ?Sized,
{
    let action_id = action.id;
    let operation = format!("action {action_id} ({})", action.command);

    context
        .poll_until(&operation, || async move {
            let current = api.action_by_id(action_id).await?;
            classify(current)
        })
        .await
}
