use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between a running task and its owner.
///
/// `wait_timeout` doubles as the task's sleep: a cancel arriving mid-wait
/// wakes the sleeper immediately instead of being noticed at the next loop
/// check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock().expect("cancel lock poisoned");
        *cancelled = true;
        self.inner.cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().expect("cancel lock poisoned")
    }

    /// Sleep for `duration` unless cancelled first. Returns true when the
    /// wait was interrupted by cancellation.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock().expect("cancel lock poisoned");
        loop {
            if *cancelled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .inner
                .cv
                .wait_timeout(cancelled, deadline - now)
                .expect("cancel lock poisoned");
            cancelled = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_runs_to_timeout_when_not_cancelled() {
        let token = CancelToken::new();
        let interrupted = token.wait_timeout(Duration::from_millis(20));
        assert!(!interrupted);
    }

    #[test]
    fn cancel_interrupts_a_pending_wait() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            let interrupted = waiter.wait_timeout(Duration::from_secs(30));
            (interrupted, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
        let (interrupted, elapsed) = handle.join().expect("join");
        assert!(interrupted);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_secs(30)));
    }
}
