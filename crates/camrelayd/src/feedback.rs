//! Callbacks the workers invoke on the frame/status consumer.

use crate::state::{WorkerKind, WorkerState};
use camrelay_core::FeatureSnapshot;
use camrelay_hw::Frame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why an acquisition run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Requested,
    FrameLimit(u64),
    Failed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stop requested"),
            StopReason::FrameLimit(n) => write!(f, "captured {n} frame(s)"),
            StopReason::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// The consumer side of the workers. Called from worker threads.
pub trait Feedback: Send + Sync {
    fn report_new_frame(&self, frame: Frame);
    fn report_camera_features(&self, snapshot: &FeatureSnapshot);
    /// Device presence, reported only when it changes.
    fn report_state_camera(&self, present: bool);
    fn report_stop_acq(&self, reason: &StopReason);
    fn report_worker_state(&self, _worker: WorkerKind, _state: WorkerState) {}
}

/// Logs everything; frames are counted and dropped.
#[derive(Debug, Default)]
pub struct LogFeedback {
    frames: AtomicU64,
}

impl LogFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Feedback for LogFeedback {
    fn report_new_frame(&self, frame: Frame) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(frame_id = frame.frame_id, total = n, "frame");
    }

    fn report_camera_features(&self, snapshot: &FeatureSnapshot) {
        tracing::debug!(features = snapshot.len(), "camera features updated");
    }

    fn report_state_camera(&self, present: bool) {
        if present {
            tracing::info!("camera present");
        } else {
            tracing::warn!("camera absent");
        }
    }

    fn report_stop_acq(&self, reason: &StopReason) {
        match reason {
            StopReason::Failed(_) => tracing::error!(%reason, "acquisition stopped"),
            _ => tracing::info!(%reason, "acquisition stopped"),
        }
    }

    fn report_worker_state(&self, worker: WorkerKind, state: WorkerState) {
        tracing::debug!(%worker, ?state, "worker reported state");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Frame(u64),
        Features(FeatureSnapshot),
        Presence(bool),
        Stop(StopReason),
        State(WorkerKind, WorkerState),
    }

    /// Records every callback for assertions.
    #[derive(Debug, Default)]
    pub struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn frames(&self) -> Vec<u64> {
            self.collect(|e| match e {
                Event::Frame(id) => Some(*id),
                _ => None,
            })
        }

        pub fn presence(&self) -> Vec<bool> {
            self.collect(|e| match e {
                Event::Presence(p) => Some(*p),
                _ => None,
            })
        }

        pub fn stops(&self) -> Vec<StopReason> {
            self.collect(|e| match e {
                Event::Stop(r) => Some(r.clone()),
                _ => None,
            })
        }

        pub fn states(&self, kind: WorkerKind) -> Vec<WorkerState> {
            self.collect(|e| match e {
                Event::State(k, s) if *k == kind => Some(*s),
                _ => None,
            })
        }

        pub fn last_features(&self) -> Option<FeatureSnapshot> {
            self.collect(|e| match e {
                Event::Features(s) => Some(s.clone()),
                _ => None,
            })
            .pop()
        }

        /// Poll until `cond` holds or `timeout` passes.
        pub fn wait_for(&self, timeout: Duration, cond: impl Fn(&Recorder) -> bool) -> bool {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                if cond(self) {
                    return true;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            cond(self)
        }

        fn collect<T>(&self, f: impl Fn(&Event) -> Option<T>) -> Vec<T> {
            self.events.lock().unwrap().iter().filter_map(f).collect()
        }

        fn push(&self, e: Event) {
            self.events.lock().unwrap().push(e);
        }
    }

    impl Feedback for Recorder {
        fn report_new_frame(&self, frame: Frame) {
            self.push(Event::Frame(frame.frame_id));
        }

        fn report_camera_features(&self, snapshot: &FeatureSnapshot) {
            self.push(Event::Features(snapshot.clone()));
        }

        fn report_state_camera(&self, present: bool) {
            self.push(Event::Presence(present));
        }

        fn report_stop_acq(&self, reason: &StopReason) {
            self.push(Event::Stop(reason.clone()));
        }

        fn report_worker_state(&self, worker: WorkerKind, state: WorkerState) {
            self.push(Event::State(worker, state));
        }
    }
}
