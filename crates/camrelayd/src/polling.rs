//! The polling worker: while nothing is acquiring, periodically opens a
//! read-only session to refresh the feature cache and track device presence.

use crate::context::WorkerContext;
use crate::snapshot::{collect_snapshot, SnapshotExtras};
use crate::state::{StateCell, WorkerKind, WorkerState};
use crate::stop::StopSignal;
use camrelay_core::FeatureSnapshot;
use camrelay_hw::{AccessMode, DeviceError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub struct PollingWorker {
    ctx: WorkerContext,
    interval: Duration,
    state: StateCell,
}

impl PollingWorker {
    pub fn new(ctx: WorkerContext, interval: Duration) -> Self {
        Self {
            ctx,
            interval,
            state: StateCell::new(WorkerKind::Polling),
        }
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    pub fn spawn(self, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("camrelay-poll".into())
            .spawn(move || self.run(&stop))
    }

    /// Poll until stopped. Device errors never end the loop.
    pub fn run(&self, stop: &StopSignal) {
        let ctx = &self.ctx;
        ctx.transition(&self.state, WorkerState::Connecting);
        let mut present: Option<bool> = None;

        while !stop.is_requested() {
            let started = Instant::now();
            let now_present = match self.poll_once() {
                Ok(snapshot) => {
                    ctx.publish(snapshot);
                    true
                }
                Err(e) => {
                    tracing::debug!(device = %ctx.device_id, error = %e, "poll failed");
                    false
                }
            };
            if present.is_none() {
                ctx.transition(&self.state, WorkerState::Active);
            }
            if present != Some(now_present) {
                present = Some(now_present);
                ctx.feedback.report_state_camera(now_present);
            }

            let elapsed = started.elapsed();
            let rest = self.interval.saturating_sub(elapsed);
            tracing::trace!(?elapsed, ?rest, "poll cycle");
            if stop.wait(rest) {
                break;
            }
        }

        ctx.transition(&self.state, WorkerState::Stopping);
        ctx.transition(&self.state, WorkerState::Stopped);
    }

    fn poll_once(&self) -> Result<FeatureSnapshot, DeviceError> {
        let mut session = self.ctx.open(AccessMode::ReadOnly)?;
        let snapshot = collect_snapshot(&mut session, &self.ctx.limits, SnapshotExtras::default());
        session.close();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::feedback::testing::Recorder;
    use crate::stop::stop_channel;
    use camrelay_core::{FeatureCache, FeatureKey, FeatureValue};
    use camrelay_hw::{AccessRegistry, SimCameraSpec, SimulatedSystem};
    use std::sync::Arc;

    const ID: &str = "DEV_000F314C611E";

    fn context(sys: SimulatedSystem, recorder: Arc<Recorder>) -> WorkerContext {
        WorkerContext {
            system: Arc::new(sys),
            registry: AccessRegistry::new(),
            device_id: ID.into(),
            cache: Arc::new(FeatureCache::new()),
            feedback: recorder,
            limits: Limits::default(),
        }
    }

    #[test]
    fn test_presence_is_edge_triggered() {
        let sys = SimulatedSystem::new();
        let camera = sys.add_camera(ID, SimCameraSpec::default());
        let recorder = Arc::new(Recorder::default());
        let ctx = context(sys, recorder.clone());
        let worker = PollingWorker::new(ctx.clone(), Duration::from_millis(10));
        let (mut handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();

        assert!(recorder.wait_for(Duration::from_secs(2), |r| r.presence() == [true]));
        std::thread::sleep(Duration::from_millis(60));
        camera.set_connected(false);
        assert!(recorder.wait_for(Duration::from_secs(2), |r| r.presence() == [true, false]));
        std::thread::sleep(Duration::from_millis(60));
        camera.set_connected(true);
        assert!(recorder.wait_for(Duration::from_secs(2), |r| {
            r.presence() == [true, false, true]
        }));

        handle.request();
        join.join().unwrap();
        assert_eq!(recorder.presence(), vec![true, false, true]);
        assert!(camera.stats().opened_total >= 3);
        assert_eq!(camera.stats().readonly_open, 0);
    }

    #[test]
    fn test_publishes_snapshot() {
        let sys = SimulatedSystem::new();
        sys.add_camera(ID, SimCameraSpec::default());
        let recorder = Arc::new(Recorder::default());
        let ctx = context(sys, recorder.clone());
        let worker = PollingWorker::new(ctx.clone(), Duration::from_millis(10));
        let (mut handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();
        assert!(recorder.wait_for(Duration::from_secs(2), |r| r.last_features().is_some()));
        handle.request();
        join.join().unwrap();

        let cached = ctx.cache.get();
        assert_eq!(
            cached.get(FeatureKey::Model),
            Some(&FeatureValue::from("Manta_G-046C (E0020005)"))
        );
        assert_eq!(
            cached.get(FeatureKey::CaptureAllowed),
            Some(&FeatureValue::Bool(true))
        );
    }

    #[test]
    fn test_absent_device_keeps_polling() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(SimulatedSystem::new(), recorder.clone());
        let worker = PollingWorker::new(ctx, Duration::from_millis(10));
        let state = worker.state();
        let (mut handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(state.get(), WorkerState::Active);
        handle.request();
        join.join().unwrap();
        assert_eq!(recorder.presence(), vec![false]);
        assert_eq!(state.get(), WorkerState::Stopped);
        assert_eq!(
            recorder.states(WorkerKind::Polling),
            vec![
                WorkerState::Connecting,
                WorkerState::Active,
                WorkerState::Stopping,
                WorkerState::Stopped
            ]
        );
    }

    #[test]
    fn test_stop_during_long_interval() {
        let sys = SimulatedSystem::new();
        sys.add_camera(ID, SimCameraSpec::default());
        let recorder = Arc::new(Recorder::default());
        let worker = PollingWorker::new(context(sys, recorder.clone()), Duration::from_secs(30));
        let (mut handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();
        assert!(recorder.wait_for(Duration::from_secs(2), |r| !r.presence().is_empty()));
        let asked = Instant::now();
        handle.request();
        join.join().unwrap();
        assert!(asked.elapsed() < Duration::from_secs(1));
    }
}
