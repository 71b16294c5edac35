use crate::feature::FeatureSnapshot;
use std::sync::{Mutex, MutexGuard};

/// Last published [`FeatureSnapshot`], shared between the active worker
/// (writer) and the UI / remote-control server (readers).
///
/// A single mutex guards the whole snapshot, so a reader always sees one
/// complete publication.
#[derive(Debug, Default)]
pub struct FeatureCache {
    inner: Mutex<Published>,
}

#[derive(Debug, Default)]
struct Published {
    snapshot: FeatureSnapshot,
    generation: u64,
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy of the latest snapshot.
    pub fn get(&self) -> FeatureSnapshot {
        self.lock().snapshot.clone()
    }

    /// Replace the published snapshot.
    pub fn set(&self, snapshot: FeatureSnapshot) {
        let mut inner = self.lock();
        inner.snapshot = snapshot;
        inner.generation += 1;
    }

    /// Number of publications so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    // The guarded value is only ever replaced whole, so a poisoned lock still
    // holds a complete snapshot.
    fn lock(&self) -> MutexGuard<'_, Published> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
