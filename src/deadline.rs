//! Per-call deadlines for blocking engine calls.
//!
//! A [`Deadline`] owns a timer task that cancels its token once the duration has
//! elapsed. Dropping the deadline aborts the timer, so a deadline can never outlive
//! the call it was armed for. Blocking work raced against it with
//! [`Deadline::run_blocking`] is abandoned on expiry; unblocking it is up to whoever
//! owns the resource it is stuck on.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Returned when a deadline fires before the guarded work finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

pub struct Deadline {
    duration: Duration,
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    /// Start the clock. Must be called inside a tokio runtime.
    pub fn arm(duration: Duration) -> Self {
        let token = CancellationToken::new();
        let fire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            debug!("deadline of {:?} expired", duration);
            fire.cancel();
        });
        Self {
            duration,
            token,
            timer,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A token that is cancelled when the deadline fires.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once the deadline has fired.
    pub async fn expired(&self) {
        self.token.cancelled().await
    }

    /// Run `f` on the blocking pool, giving up on it if the deadline fires first.
    ///
    /// A panic inside `f` is resumed on the caller.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, Elapsed>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_expired() {
            return Err(Elapsed(self.duration));
        }
        let handle = tokio::task::spawn_blocking(f);
        tokio::select! {
            biased;
            joined = handle => match joined {
                Ok(value) => Ok(value),
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => Err(Elapsed(self.duration)),
            },
            _ = self.token.cancelled() => Err(Elapsed(self.duration)),
        }
    }

    /// Cancel the timer. Equivalent to dropping the deadline.
    pub fn disarm(self) {}
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
