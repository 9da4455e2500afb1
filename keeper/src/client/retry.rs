//! Exponential backoff with jitter, bounded by an overall deadline rather
//! than a retry count — used by the init and drop paths (§4.3 "Retry
//! policy (interactive variant)"). Mirrors the shape of the supervisor's
//! own `BackoffStrategy` (fixed/linear/exponential) but this variant always
//! stops at a wall-clock deadline instead of a try count, since an
//! interactive `create`/`drop` has a user waiting on it.

use std::time::{Duration, Instant};

use rand::Rng;

use super::error::ClientError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    deadline: Duration,
}

impl RetryPolicy {
    pub fn new(deadline: Duration) -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            deadline,
        }
    }

    /// Calls `f` until it succeeds, returns a non-transient error, or the
    /// overall deadline elapses.
    pub fn retry<T>(&self, mut f: impl FnMut() -> Result<T, ClientError>) -> Result<T, ClientError> {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if start.elapsed() >= self.deadline {
                        return Err(e);
                    }
                    std::thread::sleep(self.backoff_for(attempt));
                    attempt += 1;
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let capped = exp.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4 + 1);
        capped + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_until_success() {
        let policy = RetryPolicy::new(Duration::from_secs(2));
        let calls = Cell::new(0);
        let result = policy.retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ClientError::DeadlineExceeded(Duration::from_secs(1)))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert!(calls.get() >= 3);
    }

    #[test]
    fn gives_up_immediately_on_protocol_error() {
        let policy = RetryPolicy::new(Duration::from_secs(5));
        let calls = Cell::new(0);
        let result = policy.retry(|| {
            calls.set(calls.get() + 1);
            Err(ClientError::Rejected("bad formation".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
