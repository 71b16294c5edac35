//! Closable stop channel.
//!
//! Nothing is ever sent: a stop is requested by closing the channel, which
//! every clone of the [`StopSignal`] observes at its next checkpoint.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Requests a stop when [`request`](Self::request)ed or dropped.
#[derive(Debug)]
pub struct StopHandle {
    tx: Option<Sender<()>>,
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (StopHandle { tx: Some(tx) }, StopSignal { rx })
}

impl StopHandle {
    pub fn request(&mut self) {
        self.tx.take();
    }
}

impl StopSignal {
    pub fn is_requested(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep up to `timeout`, waking early on a stop. Returns true if a stop
    /// was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_not_requested_initially() {
        let (_handle, signal) = stop_channel();
        assert!(!signal.is_requested());
        assert!(!signal.wait(Duration::from_millis(5)));
    }

    #[test]
    fn test_request_wakes_waiter() {
        let (mut handle, signal) = stop_channel();
        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = signal.wait(Duration::from_secs(10));
            (stopped, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.request();
        let (stopped, elapsed) = waiter.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_drop_requests_stop() {
        let (handle, signal) = stop_channel();
        drop(handle);
        assert!(signal.is_requested());
    }
}
