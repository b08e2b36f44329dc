//! Per-turn execution context: cancellation plus an optional deadline.

use crate::error::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Carries the caller's cancellation signal and deadline through a turn.
///
/// Cloning shares the same token, so cancelling any clone cancels the turn.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl TurnContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` unless the turn is cancelled or its deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled("cancelled before the operation started".into()));
        }

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            () = self.cancel.cancelled() => Err(Error::Cancelled("turn cancelled".into())),
            () = deadline => Err(Error::Cancelled("turn deadline exceeded".into())),
            out = fut => Ok(out),
        }
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
