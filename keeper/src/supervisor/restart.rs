//! Restart policy classification for supervised children (§4.1). Mirrors
//! the shape of the teacher's own `RestartPolicy`/`BackoffStrategy` split:
//! a policy decides *whether* to restart, a backoff decides *how long to
//! wait* before doing it.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Always restarted, regardless of exit code.
    Permanent,
    /// Restarted only on a non-zero exit.
    Transient,
    /// Never restarted.
    Temporary,
}

impl RestartPolicy {
    pub fn should_restart(self, exit_code: Option<i32>) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => exit_code.map(|c| c != 0).unwrap_or(true),
            RestartPolicy::Temporary => false,
        }
    }
}

/// Exponential backoff between restarts of the same child, resetting once
/// the child has stayed up longer than `reset_after`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    reset_after: Duration,
    tries: u32,
    last_start: Option<Instant>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, reset_after: Duration) -> Self {
        Self {
            initial,
            max,
            reset_after,
            tries: 0,
            last_start: None,
        }
    }

    /// Called when the child is (re)started; records the time so the next
    /// `next_delay` call can decide whether to reset the try counter.
    pub fn note_start(&mut self) {
        if let Some(last) = self.last_start {
            if last.elapsed() > self.reset_after {
                self.tries = 0;
            }
        }
        self.last_start = Some(Instant::now());
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.initial.saturating_mul(1 << self.tries.min(16)).min(self.max);
        self.tries += 1;
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(500),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_always_restarts() {
        assert!(RestartPolicy::Permanent.should_restart(Some(0)));
        assert!(RestartPolicy::Permanent.should_restart(Some(1)));
    }

    #[test]
    fn transient_restarts_only_on_failure() {
        assert!(!RestartPolicy::Transient.should_restart(Some(0)));
        assert!(RestartPolicy::Transient.should_restart(Some(1)));
    }

    #[test]
    fn temporary_never_restarts() {
        assert!(!RestartPolicy::Temporary.should_restart(Some(0)));
        assert!(!RestartPolicy::Temporary.should_restart(Some(1)));
    }

    #[test]
    fn backoff_grows_exponentially() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(10), Duration::from_secs(60));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(4), Duration::from_secs(60));
        for _ in 0..10 {
            assert!(b.next_delay() <= Duration::from_secs(4));
        }
    }
}
