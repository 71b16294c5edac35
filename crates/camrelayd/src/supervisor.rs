//! Hands the device back and forth between the acquisition and polling
//! workers so that at most one of them holds it at a time.

use crate::acquisition::{AcquisitionSettings, AcquisitionWorker};
use crate::context::WorkerContext;
use crate::polling::PollingWorker;
use crate::state::{StateCell, WorkerState};
use crate::stop::{stop_channel, StopHandle};
use camrelay_core::CommandRelay;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn {worker} worker: {source}")]
    Spawn {
        worker: &'static str,
        #[source]
        source: std::io::Error,
    },
}

struct Running {
    stop: StopHandle,
    join: JoinHandle<()>,
    state: StateCell,
}

impl Running {
    fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    fn shutdown(mut self) -> WorkerState {
        self.stop.request();
        if self.join.join().is_err() {
            tracing::error!(worker = %self.state.kind(), "worker thread panicked");
        }
        self.state.get()
    }
}

#[derive(Default)]
struct Slots {
    acquisition: Option<Running>,
    polling: Option<Running>,
}

pub struct WorkerSupervisor {
    ctx: WorkerContext,
    relay: Arc<CommandRelay>,
    acquisition: AcquisitionSettings,
    poll_interval: Duration,
    slots: Mutex<Slots>,
}

impl WorkerSupervisor {
    pub fn new(
        ctx: WorkerContext,
        relay: Arc<CommandRelay>,
        acquisition: AcquisitionSettings,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            relay,
            acquisition,
            poll_interval,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Start acquiring, stopping polling first. `frame_limit` overrides the
    /// configured limit; `Some(0)` means no limit. Returns false if
    /// acquisition was already running.
    pub fn start_acquisition(&self, frame_limit: Option<u64>) -> Result<bool, SupervisorError> {
        let mut slots = self.lock();
        if slots.acquisition.as_ref().is_some_and(Running::is_alive) {
            return Ok(false);
        }
        reap(&mut slots.acquisition);
        if let Some(polling) = slots.polling.take() {
            tracing::debug!("stopping polling before acquisition");
            polling.shutdown();
        }

        let mut settings = self.acquisition.clone();
        if let Some(limit) = frame_limit {
            settings.frame_limit = (limit > 0).then_some(limit);
        }
        let worker = AcquisitionWorker::new(self.ctx.clone(), self.relay.clone(), settings);
        let state = worker.state();
        let (stop, signal) = stop_channel();
        let join = worker.spawn(signal).map_err(|source| SupervisorError::Spawn {
            worker: "acquisition",
            source,
        })?;
        slots.acquisition = Some(Running { stop, join, state });
        Ok(true)
    }

    /// Start polling, stopping acquisition first. Returns false if polling
    /// was already running.
    pub fn start_polling(&self) -> Result<bool, SupervisorError> {
        let mut slots = self.lock();
        self.start_polling_locked(&mut slots)
    }

    fn start_polling_locked(&self, slots: &mut Slots) -> Result<bool, SupervisorError> {
        if slots.polling.as_ref().is_some_and(Running::is_alive) {
            return Ok(false);
        }
        reap(&mut slots.polling);
        if let Some(acquisition) = slots.acquisition.take() {
            tracing::debug!("stopping acquisition before polling");
            acquisition.shutdown();
        }

        let worker = PollingWorker::new(self.ctx.clone(), self.poll_interval);
        let state = worker.state();
        let (stop, signal) = stop_channel();
        let join = worker.spawn(signal).map_err(|source| SupervisorError::Spawn {
            worker: "polling",
            source,
        })?;
        slots.polling = Some(Running { stop, join, state });
        Ok(true)
    }

    /// Returns false if acquisition was not running.
    pub fn stop_acquisition(&self) -> bool {
        let taken = self.lock().acquisition.take();
        match taken {
            Some(running) => {
                running.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn stop_polling(&self) -> bool {
        let taken = self.lock().polling.take();
        match taken {
            Some(running) => {
                running.shutdown();
                true
            }
            None => false,
        }
    }

    /// Stop both workers and wait for them.
    pub fn stop_all(&self) {
        let mut slots = self.lock();
        let acquisition = slots.acquisition.take();
        let polling = slots.polling.take();
        for running in [acquisition, polling].into_iter().flatten() {
            let kind = running.state.kind();
            let state = running.shutdown();
            tracing::debug!(worker = %kind, ?state, "worker joined");
        }
    }

    /// Fall back to polling when no worker holds the device, e.g. after an
    /// acquisition run ended on its own. Returns true if polling was started.
    pub fn resume_polling_if_idle(&self) -> Result<bool, SupervisorError> {
        let mut slots = self.lock();
        let alive = |slot: &Option<Running>| slot.as_ref().is_some_and(Running::is_alive);
        if alive(&slots.acquisition) || alive(&slots.polling) {
            return Ok(false);
        }
        self.start_polling_locked(&mut slots)
    }

    pub fn acquisition_state(&self) -> WorkerState {
        state_of(&self.lock().acquisition)
    }

    pub fn polling_state(&self) -> WorkerState {
        state_of(&self.lock().polling)
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn state_of(slot: &Option<Running>) -> WorkerState {
    slot.as_ref().map_or(WorkerState::Idle, |r| r.state.get())
}

/// Join a worker that has already exited on its own.
fn reap(slot: &mut Option<Running>) {
    if let Some(running) = slot.take() {
        let state = running.shutdown();
        tracing::debug!(?state, "reaped finished worker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AcquisitionMode, Limits};
    use crate::feedback::testing::Recorder;
    use crate::feedback::StopReason;
    use crate::state::WorkerKind;
    use camrelay_core::{Command, CommandKey, FeatureCache, FeatureValue};
    use camrelay_hw::{AccessRegistry, SimCameraSpec, SimHandle, SimulatedSystem};
    use std::time::Instant;

    const ID: &str = "DEV_000F314C6B39";

    fn supervisor() -> (WorkerSupervisor, SimHandle, Arc<Recorder>, Arc<CommandRelay>) {
        let sys = SimulatedSystem::new();
        let camera = sys.add_camera(ID, SimCameraSpec::default());
        let recorder = Arc::new(Recorder::default());
        let ctx = WorkerContext {
            system: Arc::new(sys),
            registry: AccessRegistry::new(),
            device_id: ID.into(),
            cache: Arc::new(FeatureCache::new()),
            feedback: recorder.clone(),
            limits: Limits::default(),
        };
        let relay = Arc::new(CommandRelay::new());
        let settings = AcquisitionSettings {
            mode: AcquisitionMode::Paced,
            period: Duration::from_millis(20),
            frame_timeout: Duration::from_millis(200),
            feature_refresh: Duration::from_millis(50),
            stop_poll: Duration::from_millis(50),
            stream_buffer: 4,
            disable_auto_on_start: true,
            frame_limit: None,
        };
        let sup = WorkerSupervisor::new(ctx, relay.clone(), settings, Duration::from_millis(10));
        (sup, camera, recorder, relay)
    }

    #[test]
    fn test_handoff_never_overlaps() {
        let (sup, camera, recorder, _) = supervisor();
        for _ in 0..3 {
            assert!(sup.start_polling().unwrap());
            assert!(recorder.wait_for(Duration::from_secs(2), |r| !r.presence().is_empty()));
            assert!(sup.start_acquisition(None).unwrap());
            assert_eq!(sup.polling_state(), WorkerState::Idle);
            assert!(recorder.wait_for(Duration::from_secs(2), |r| !r.frames().is_empty()));
        }
        sup.stop_all();
        let stats = camera.stats();
        assert_eq!(stats.overlap_violations, 0);
        assert_eq!((stats.exclusive_open, stats.readonly_open), (0, 0));
    }

    #[test]
    fn test_start_is_noop_when_running() {
        let (sup, _camera, _recorder, _) = supervisor();
        assert!(sup.start_acquisition(None).unwrap());
        assert!(!sup.start_acquisition(None).unwrap());
        assert!(sup.start_polling().unwrap());
        assert!(!sup.start_polling().unwrap());
        assert!(sup.stop_polling());
        assert!(!sup.stop_polling());
        assert!(!sup.stop_acquisition());
    }

    #[test]
    fn test_restart_after_stop_reuses_device() {
        let (sup, _camera, recorder, _) = supervisor();
        assert!(sup.start_acquisition(None).unwrap());
        assert!(recorder.wait_for(Duration::from_secs(2), |r| !r.frames().is_empty()));
        let asked = Instant::now();
        assert!(sup.stop_acquisition());
        assert!(asked.elapsed() < Duration::from_secs(1));
        assert!(sup.start_acquisition(None).unwrap());
        let activations = |r: &Recorder| {
            r.states(WorkerKind::Acquisition)
                .iter()
                .filter(|s| **s == WorkerState::Active)
                .count()
        };
        assert!(recorder.wait_for(Duration::from_secs(2), |r| activations(r) == 2));
        sup.stop_all();
        assert!(recorder
            .stops()
            .iter()
            .all(|r| *r == StopReason::Requested));
    }

    #[test]
    fn test_resume_polling_after_frame_limit() {
        let (sup, _camera, recorder, _) = supervisor();
        assert!(sup.start_acquisition(Some(2)).unwrap());
        assert!(recorder.wait_for(Duration::from_secs(2), |r| r.stops().len() == 1));
        assert!(recorder.wait_for(Duration::from_secs(2), |_| {
            sup.acquisition_state() == WorkerState::Stopped
        }));
        assert!(sup.resume_polling_if_idle().unwrap());
        assert!(!sup.resume_polling_if_idle().unwrap());
        assert!(recorder.wait_for(Duration::from_secs(2), |_| {
            sup.polling_state() == WorkerState::Active
        }));
    }

    #[test]
    fn test_zero_frame_limit_means_unlimited() {
        let (sup, _camera, recorder, _) = supervisor();
        assert!(sup.start_acquisition(Some(0)).unwrap());
        assert!(recorder.wait_for(Duration::from_secs(2), |r| r.frames().len() >= 3));
        std::thread::sleep(Duration::from_millis(100));
        assert!(recorder.stops().is_empty());
        assert_eq!(sup.acquisition_state(), WorkerState::Active);
        sup.stop_all();
        assert_eq!(recorder.stops(), vec![StopReason::Requested]);
    }

    #[test]
    fn test_resume_never_preempts_acquisition() {
        let sup = Arc::new(supervisor().0);
        let resumer = {
            let sup = sup.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    sup.resume_polling_if_idle().unwrap();
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };
        for _ in 0..5 {
            sup.stop_acquisition();
            sup.stop_polling();
            sup.start_acquisition(None).unwrap();
            std::thread::sleep(Duration::from_millis(10));
            assert_ne!(sup.acquisition_state(), WorkerState::Idle);
        }
        resumer.join().unwrap();
        sup.stop_all();
    }

    #[test]
    fn test_commands_queued_while_polling_are_applied() {
        let (sup, camera, _recorder, relay) = supervisor();
        sup.start_polling().unwrap();
        relay
            .sender()
            .send(Command::new().with(CommandKey::Gain, 11.0))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(camera.feature("Gain"), Some(FeatureValue::Float(21.0)));

        sup.start_acquisition(None).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while camera.feature("Gain") != Some(FeatureValue::Float(11.0)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(camera.feature("Gain"), Some(FeatureValue::Float(11.0)));
        sup.stop_all();
        assert_eq!(sup.acquisition_state(), WorkerState::Idle);
    }
}
