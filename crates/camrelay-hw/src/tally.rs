//! Join barrier for device-bound sub-operations.
//!
//! Each in-flight operation holds a [`TallyToken`]; teardown calls
//! [`PendingTally::wait_idle`] before releasing the resource the operations use.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct PendingTally {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks one operation as in flight until dropped.
#[derive(Debug)]
pub struct TallyToken {
    inner: Arc<Inner>,
}

impl Drop for TallyToken {
    fn drop(&mut self) {
        let mut pending = self.inner.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.inner.idle.notify_all();
        }
    }
}

impl PendingTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> TallyToken {
        *self.inner.lock() += 1;
        TallyToken {
            inner: self.inner.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        *self.inner.lock()
    }

    /// Wait until no token is outstanding. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.inner.lock();
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = match self.inner.idle.wait_timeout(pending, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_when_nothing_entered() {
        let tally = PendingTally::new();
        assert!(tally.wait_idle(Duration::from_millis(1)));
    }

    #[test]
    fn test_waits_for_all_tokens() {
        let tally = PendingTally::new();
        let handles: Vec<_> = (1..=3u64)
            .map(|i| {
                let token = tally.enter();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(20 * i));
                    drop(token);
                })
            })
            .collect();
        assert_eq!(tally.pending(), 3);
        assert!(tally.wait_idle(Duration::from_secs(5)));
        assert_eq!(tally.pending(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_times_out_with_outstanding_token() {
        let tally = PendingTally::new();
        let _token = tally.enter();
        assert!(!tally.wait_idle(Duration::from_millis(20)));
    }
}
