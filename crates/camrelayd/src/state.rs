use std::fmt;
use std::sync::{Arc, Mutex};

/// Lifecycle of a device worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Connecting,
    Active,
    Stopping,
    Stopped,
    Failed,
}

impl WorkerState {
    /// Whether the worker may still hold the device.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            WorkerState::Connecting | WorkerState::Active | WorkerState::Stopping
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Acquisition,
    Polling,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerKind::Acquisition => "acquisition",
            WorkerKind::Polling => "polling",
        })
    }
}

/// Shared, observable worker state.
#[derive(Debug, Clone)]
pub struct StateCell {
    kind: WorkerKind,
    state: Arc<Mutex<WorkerState>>,
}

impl StateCell {
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(WorkerState::Idle)),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn get(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a transition and return the previous state.
    pub fn set(&self, next: WorkerState) -> WorkerState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let prev = std::mem::replace(&mut *state, next);
        if prev != next {
            tracing::info!(worker = %self.kind, from = ?prev, to = ?next, "worker state");
        }
        prev
    }
}
