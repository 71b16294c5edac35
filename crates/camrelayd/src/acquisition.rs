//! The acquisition worker: holds the exclusive session, applies queued
//! commands, captures frames and republishes feature snapshots.

use crate::config::{AcquisitionConfig, AcquisitionMode};
use crate::context::WorkerContext;
use crate::feedback::StopReason;
use crate::snapshot::{collect_snapshot, SnapshotExtras};
use crate::state::{StateCell, WorkerKind, WorkerState};
use crate::stop::StopSignal;
use camrelay_core::{Command, CommandKey, CommandRelay};
use camrelay_hw::{AccessMode, DeviceError, DeviceSession, Frame};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Checkpoints per stop-poll window in streaming mode.
const WAIT_STEPS: u32 = 5;

enum Wake {
    Stop,
    Frame(Frame),
    Closed,
    Idle,
}

/// Parameters of one acquisition run.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub mode: AcquisitionMode,
    pub period: Duration,
    pub frame_timeout: Duration,
    pub feature_refresh: Duration,
    pub stop_poll: Duration,
    pub stream_buffer: usize,
    pub disable_auto_on_start: bool,
    pub frame_limit: Option<u64>,
}

impl From<&AcquisitionConfig> for AcquisitionSettings {
    fn from(c: &AcquisitionConfig) -> Self {
        Self {
            mode: c.mode,
            period: c.period(),
            frame_timeout: c.frame_timeout(),
            feature_refresh: c.feature_refresh(),
            stop_poll: c.stop_poll(),
            stream_buffer: c.stream_buffer,
            disable_auto_on_start: c.disable_auto_on_start,
            frame_limit: c.frame_limit,
        }
    }
}

/// Turns off both auto modes so manual exposure and gain stick.
pub fn default_params() -> Command {
    Command::new()
        .with(CommandKey::GainMode, "Off")
        .with(CommandKey::ExposureMode, "Off")
}

pub struct AcquisitionWorker {
    ctx: WorkerContext,
    relay: Arc<CommandRelay>,
    settings: AcquisitionSettings,
    state: StateCell,
}

impl AcquisitionWorker {
    pub fn new(ctx: WorkerContext, relay: Arc<CommandRelay>, settings: AcquisitionSettings) -> Self {
        Self {
            ctx,
            relay,
            settings,
            state: StateCell::new(WorkerKind::Acquisition),
        }
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    /// Run on a dedicated thread until stopped, exhausted or failed.
    pub fn spawn(self, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("camrelay-acq".into())
            .spawn(move || self.run(&stop))
    }

    pub fn run(&self, stop: &StopSignal) {
        let ctx = &self.ctx;
        ctx.transition(&self.state, WorkerState::Connecting);
        if self.settings.disable_auto_on_start {
            if let Err(e) = self.relay.sender().send(default_params()) {
                tracing::warn!(error = %e, "cannot queue default parameters");
            }
        }

        let outcome = ctx
            .open(AccessMode::Exclusive)
            .and_then(|mut session| {
                session.configure()?;
                Ok(session)
            })
            .and_then(|mut session| {
                ctx.transition(&self.state, WorkerState::Active);
                tracing::info!(device = %ctx.device_id, mode = ?self.settings.mode, "acquisition started");
                let outcome = match self.settings.mode {
                    AcquisitionMode::Paced => self.run_paced(&mut session, stop),
                    AcquisitionMode::Streaming => self.run_streaming(&mut session, stop),
                };
                session.close();
                outcome
            });

        let reason = match outcome {
            Ok(reason) => {
                ctx.transition(&self.state, WorkerState::Stopping);
                reason
            }
            Err(e) => {
                tracing::error!(device = %ctx.device_id, error = %e, "acquisition failed");
                ctx.transition(&self.state, WorkerState::Failed);
                StopReason::Failed(e.to_string())
            }
        };
        ctx.feedback.report_stop_acq(&reason);
        ctx.transition(&self.state, WorkerState::Stopped);
    }

    fn run_paced(
        &self,
        session: &mut DeviceSession,
        stop: &StopSignal,
    ) -> Result<StopReason, DeviceError> {
        let s = &self.settings;
        let mut last_refresh: Option<Instant> = None;
        let mut frame_rate: Option<f64> = None;
        let mut captured = 0u64;

        loop {
            if stop.is_requested() {
                return Ok(StopReason::Requested);
            }
            let started = Instant::now();

            if self.apply_pending(session)? {
                last_refresh = None;
            }
            if last_refresh.map_or(true, |t| t.elapsed() >= s.feature_refresh) {
                self.refresh(session, frame_rate)?;
                last_refresh = Some(Instant::now());
            }

            match session.next_frame(s.frame_timeout) {
                Ok(frame) => {
                    if self.deliver(frame) {
                        captured += 1;
                    }
                }
                Err(e) if e.is_soft() => {
                    tracing::warn!(device = %self.ctx.device_id, error = %e, "no frame this cycle");
                }
                Err(e) => return Err(e),
            }
            if s.frame_limit.is_some_and(|limit| captured >= limit) {
                return Ok(StopReason::FrameLimit(captured));
            }

            let elapsed = started.elapsed();
            if !elapsed.is_zero() {
                frame_rate = Some(1.0 / elapsed.as_secs_f64());
            }
            if let Some(rest) = s.period.checked_sub(elapsed) {
                tracing::trace!(?elapsed, ?rest, "cycle done early");
                if stop.wait(rest) {
                    return Ok(StopReason::Requested);
                }
            }
        }
    }

    fn run_streaming(
        &self,
        session: &mut DeviceSession,
        stop: &StopSignal,
    ) -> Result<StopReason, DeviceError> {
        let frames = session.start_streaming(self.settings.stream_buffer)?;
        let outcome = self.stream_loop(session, &frames, stop);
        if let Err(e) = session.stop_streaming() {
            tracing::warn!(device = %self.ctx.device_id, error = %e, "stop streaming failed");
        }
        outcome
    }

    fn stream_loop(
        &self,
        session: &mut DeviceSession,
        frames: &Receiver<Frame>,
        stop: &StopSignal,
    ) -> Result<StopReason, DeviceError> {
        let s = &self.settings;
        let step = (s.stop_poll / WAIT_STEPS).max(Duration::from_millis(1));
        let mut captured = 0u64;
        let mut window_frames = 0u64;
        let mut window_start = Instant::now();
        let mut last_refresh: Option<Instant> = None;
        let mut local_stop = false;

        loop {
            if stop.is_requested() {
                return Ok(StopReason::Requested);
            }
            if local_stop {
                return Ok(StopReason::FrameLimit(captured));
            }

            if self.apply_pending(session)? {
                last_refresh = None;
            }
            if last_refresh.map_or(true, |t| t.elapsed() >= s.feature_refresh) {
                let window = window_start.elapsed().as_secs_f64();
                let rate = (last_refresh.is_some() && window > 0.0)
                    .then(|| window_frames as f64 / window);
                self.refresh(session, rate)?;
                last_refresh = Some(Instant::now());
                window_frames = 0;
                window_start = Instant::now();
            }

            let deadline = Instant::now() + step;
            while !local_stop {
                let wait = deadline.saturating_duration_since(Instant::now());
                let wake = crossbeam_channel::select! {
                    recv(stop.receiver()) -> _ => Wake::Stop,
                    recv(frames) -> msg => msg.map_or(Wake::Closed, Wake::Frame),
                    default(wait) => Wake::Idle,
                };
                match wake {
                    Wake::Stop => return Ok(StopReason::Requested),
                    Wake::Closed => {
                        return Err(DeviceError::Disconnected(format!(
                            "{} stopped streaming",
                            self.ctx.device_id
                        )));
                    }
                    Wake::Idle => break,
                    Wake::Frame(frame) => {
                        if self.deliver(frame) {
                            captured += 1;
                            window_frames += 1;
                        }
                        local_stop = s.frame_limit.is_some_and(|limit| captured >= limit);
                    }
                }
            }
        }
    }

    /// Drain the relay and write each merged key. Returns whether anything
    /// was applied.
    fn apply_pending(&self, session: &mut DeviceSession) -> Result<bool, DeviceError> {
        let Some(command) = self.relay.drain() else {
            return Ok(false);
        };
        tracing::debug!(?command, "applying queued command");
        for (key, value) in command.iter() {
            match session.apply(key, value) {
                Ok(()) => {}
                Err(e) if e.is_soft() => {
                    tracing::warn!(key = key.wire_name(), %value, error = %e, "command not applied");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn refresh(&self, session: &mut DeviceSession, frame_rate: Option<f64>) -> Result<(), DeviceError> {
        let extras = SnapshotExtras {
            capture_allowed: Some(true),
            frame_rate,
        };
        let snapshot = collect_snapshot(session, &self.ctx.limits, extras)?;
        self.ctx.publish(snapshot);
        Ok(())
    }

    /// Forward a complete frame to the consumer; incomplete frames are dropped.
    fn deliver(&self, frame: Frame) -> bool {
        if !frame.complete {
            tracing::debug!(frame_id = frame.frame_id, "dropping incomplete frame");
            return false;
        }
        self.ctx.feedback.report_new_frame(frame);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::feedback::testing::Recorder;
    use crate::stop::stop_channel;
    use camrelay_core::{FeatureCache, FeatureKey, FeatureValue};
    use camrelay_hw::{AccessRegistry, SimCameraSpec, SimHandle, SimulatedSystem};

    const ID: &str = "DEV_000F314C6B39";

    struct Rig {
        ctx: WorkerContext,
        relay: Arc<CommandRelay>,
        recorder: Arc<Recorder>,
        camera: SimHandle,
    }

    fn rig() -> Rig {
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
        Rig {
            ctx,
            relay: Arc::new(CommandRelay::new()),
            recorder,
            camera,
        }
    }

    fn settings(mode: AcquisitionMode) -> AcquisitionSettings {
        AcquisitionSettings {
            mode,
            period: Duration::from_millis(20),
            frame_timeout: Duration::from_millis(200),
            feature_refresh: Duration::from_millis(50),
            stop_poll: Duration::from_millis(50),
            stream_buffer: 4,
            disable_auto_on_start: true,
            frame_limit: None,
        }
    }

    #[test]
    fn test_paced_frame_limit() {
        let rig = rig();
        let mut s = settings(AcquisitionMode::Paced);
        s.frame_limit = Some(3);
        let worker = AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), s);
        let state = worker.state();
        let (_handle, stop) = stop_channel();
        worker.run(&stop);

        assert_eq!(rig.recorder.frames().len(), 3);
        assert_eq!(rig.recorder.stops(), vec![StopReason::FrameLimit(3)]);
        assert_eq!(state.get(), WorkerState::Stopped);
        assert_eq!(
            rig.recorder.states(WorkerKind::Acquisition),
            vec![
                WorkerState::Connecting,
                WorkerState::Active,
                WorkerState::Stopping,
                WorkerState::Stopped
            ]
        );
        assert!(!rig.ctx.registry.holders(ID).exclusive);
    }

    #[test]
    fn test_default_params_applied() {
        let rig = rig();
        rig.camera.set_feature("GainAuto", "Continuous");
        let mut s = settings(AcquisitionMode::Paced);
        s.frame_limit = Some(1);
        let worker = AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), s);
        let (_handle, stop) = stop_channel();
        worker.run(&stop);
        assert_eq!(rig.camera.feature("GainAuto"), Some(FeatureValue::from("Off")));
        assert_eq!(rig.camera.feature("ExposureAuto"), Some(FeatureValue::from("Off")));
    }

    #[test]
    fn test_merged_commands_applied_last_writer_wins() {
        let rig = rig();
        let tx = rig.relay.sender();
        tx.send(Command::new().with(CommandKey::Gain, 5.0).with(CommandKey::Exposure, 900.0))
            .unwrap();
        tx.send(Command::new().with(CommandKey::Gain, 15.0)).unwrap();

        let mut s = settings(AcquisitionMode::Paced);
        s.frame_limit = Some(1);
        s.disable_auto_on_start = false;
        let worker = AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), s);
        let (_handle, stop) = stop_channel();
        worker.run(&stop);

        assert_eq!(rig.camera.feature("Gain"), Some(FeatureValue::Float(15.0)));
        assert_eq!(
            rig.camera.feature("ExposureTimeAbs"),
            Some(FeatureValue::Float(900.0))
        );
        // Gain written once: the merged batch, not each command
        assert_eq!(rig.camera.stats().feature_writes, 2);
        let cached = rig.ctx.cache.get();
        assert_eq!(cached.get(FeatureKey::Gain), Some(&FeatureValue::Float(15.0)));
        assert_eq!(
            cached.get(FeatureKey::CaptureAllowed),
            Some(&FeatureValue::Bool(true))
        );
    }

    #[test]
    fn test_frame_timeout_is_soft() {
        let rig = rig();
        rig.camera.set_deliver_frames(false);
        let worker =
            AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), settings(AcquisitionMode::Paced));
        let state = worker.state();
        let (mut handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(state.get(), WorkerState::Active);
        handle.request();
        join.join().unwrap();
        assert_eq!(rig.recorder.stops(), vec![StopReason::Requested]);
        assert!(rig.recorder.frames().is_empty());
    }

    #[test]
    fn test_disconnect_fails_worker() {
        let rig = rig();
        let worker =
            AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), settings(AcquisitionMode::Paced));
        let (_handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();
        assert!(rig
            .recorder
            .wait_for(Duration::from_secs(2), |r| !r.frames().is_empty()));
        rig.camera.set_connected(false);
        join.join().unwrap();

        assert!(matches!(rig.recorder.stops().as_slice(), [StopReason::Failed(_)]));
        let states = rig.recorder.states(WorkerKind::Acquisition);
        assert_eq!(&states[states.len() - 2..], &[WorkerState::Failed, WorkerState::Stopped]);
        assert!(!rig.ctx.registry.holders(ID).exclusive);
        assert_eq!(rig.camera.stats().exclusive_open, 0);
    }

    #[test]
    fn test_open_unavailable_fails() {
        let rig = rig();
        rig.camera.set_connected(false);
        let worker =
            AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), settings(AcquisitionMode::Paced));
        let state = worker.state();
        let (_handle, stop) = stop_channel();
        worker.run(&stop);
        assert_eq!(state.get(), WorkerState::Stopped);
        assert!(matches!(rig.recorder.stops().as_slice(), [StopReason::Failed(_)]));
        assert!(!rig
            .recorder
            .states(WorkerKind::Acquisition)
            .contains(&WorkerState::Active));
    }

    #[test]
    fn test_incomplete_frames_dropped() {
        let rig = rig();
        rig.camera.set_incomplete_every(Some(2));
        let mut s = settings(AcquisitionMode::Paced);
        s.frame_limit = Some(2);
        s.period = Duration::ZERO;
        let worker = AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), s);
        let (_handle, stop) = stop_channel();
        worker.run(&stop);
        let frames = rig.recorder.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|id| id % 2 == 1));
    }

    #[test]
    fn test_streaming_frame_limit() {
        let rig = rig();
        let mut s = settings(AcquisitionMode::Streaming);
        s.frame_limit = Some(5);
        let worker = AcquisitionWorker::new(rig.ctx.clone(), rig.relay.clone(), s);
        let (_handle, stop) = stop_channel();
        worker.run(&stop);

        assert!(rig.recorder.frames().len() >= 5);
        assert!(matches!(
            rig.recorder.stops().as_slice(),
            [StopReason::FrameLimit(n)] if *n >= 5
        ));
        assert!(!rig.camera.is_streaming());
        assert_eq!(rig.camera.stats().exclusive_open, 0);
    }

    #[test]
    fn test_streaming_stop_is_prompt() {
        let rig = rig();
        let worker = AcquisitionWorker::new(
            rig.ctx.clone(),
            rig.relay.clone(),
            settings(AcquisitionMode::Streaming),
        );
        let (mut handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();
        assert!(rig
            .recorder
            .wait_for(Duration::from_secs(2), |r| r.frames().len() >= 3));

        let asked = Instant::now();
        handle.request();
        join.join().unwrap();
        assert!(asked.elapsed() < Duration::from_secs(1));
        assert_eq!(rig.recorder.stops(), vec![StopReason::Requested]);
        assert!(!rig.camera.is_streaming());
    }

    #[test]
    fn test_streaming_disconnect_fails_worker() {
        let rig = rig();
        let worker = AcquisitionWorker::new(
            rig.ctx.clone(),
            rig.relay.clone(),
            settings(AcquisitionMode::Streaming),
        );
        let (_handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();
        assert!(rig
            .recorder
            .wait_for(Duration::from_secs(2), |r| r.frames().len() >= 2));
        rig.camera.set_connected(false);
        join.join().unwrap();

        assert!(matches!(rig.recorder.stops().as_slice(), [StopReason::Failed(_)]));
        let states = rig.recorder.states(WorkerKind::Acquisition);
        assert_eq!(&states[states.len() - 2..], &[WorkerState::Failed, WorkerState::Stopped]);
        assert!(!rig.camera.is_streaming());
        assert!(!rig.ctx.registry.holders(ID).exclusive);
        assert_eq!(rig.camera.stats().exclusive_open, 0);
    }

    #[test]
    fn test_streaming_applies_commands() {
        let rig = rig();
        let worker = AcquisitionWorker::new(
            rig.ctx.clone(),
            rig.relay.clone(),
            settings(AcquisitionMode::Streaming),
        );
        let (mut handle, stop) = stop_channel();
        let join = worker.spawn(stop).unwrap();
        rig.relay
            .sender()
            .send(Command::new().with(CommandKey::Gain, 7.0))
            .unwrap();
        let cache = rig.ctx.cache.clone();
        assert!(rig.recorder.wait_for(Duration::from_secs(2), |_| {
            cache.get().get(FeatureKey::Gain) == Some(&FeatureValue::Float(7.0))
        }));
        handle.request();
        join.join().unwrap();
    }
}
