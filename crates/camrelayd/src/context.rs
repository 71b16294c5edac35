use crate::config::Limits;
use crate::feedback::Feedback;
use crate::state::{StateCell, WorkerState};
use camrelay_core::{FeatureCache, FeatureSnapshot};
use camrelay_hw::{AccessMode, AccessRegistry, CameraSystem, DeviceError, DeviceSession};
use std::sync::Arc;

/// What every device worker shares. Built once by the composition root.
#[derive(Clone)]
pub struct WorkerContext {
    pub system: Arc<dyn CameraSystem>,
    pub registry: AccessRegistry,
    pub device_id: String,
    pub cache: Arc<FeatureCache>,
    pub feedback: Arc<dyn Feedback>,
    pub limits: Limits,
}

impl WorkerContext {
    pub fn open(&self, mode: AccessMode) -> Result<DeviceSession, DeviceError> {
        DeviceSession::open(self.system.as_ref(), &self.registry, &self.device_id, mode)
    }

    pub(crate) fn transition(&self, cell: &StateCell, next: WorkerState) {
        cell.set(next);
        self.feedback.report_worker_state(cell.kind(), next);
    }

    pub(crate) fn publish(&self, snapshot: FeatureSnapshot) {
        self.feedback.report_camera_features(&snapshot);
        self.cache.set(snapshot);
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("system", &self.system.name())
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}
