//! In-process simulated camera system.
//!
//! Stands in for the vendor SDK in the daemon and in tests. Every camera is
//! scriptable through a [`SimHandle`]: features can be changed behind the
//! session's back, frames withheld, the device unplugged. The handle also
//! counts concurrently open backends so the access invariant can be checked
//! from the device's side.

use crate::backend::{AccessMode, CameraBackend, CameraSystem, DeviceError, FrameCallback};
use crate::format::PixelFormat;
use crate::frame::Frame;
use camrelay_core::FeatureValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Static description of a simulated camera.
#[derive(Debug, Clone)]
pub struct SimCameraSpec {
    pub model: String,
    pub interface_id: String,
    /// Geometry of generated frames.
    pub width: u32,
    pub height: u32,
    pub pixel_formats: Vec<PixelFormat>,
    pub features: BTreeMap<String, FeatureValue>,
    pub commands: Vec<String>,
    /// Time the device takes to produce one frame.
    pub frame_interval: Duration,
}

impl Default for SimCameraSpec {
    fn default() -> Self {
        let ip = u32::from_le_bytes([192, 168, 1, 20]);
        let features = [
            ("ExposureTimeAbs", FeatureValue::Float(141_491.0)),
            ("ExposureAuto", FeatureValue::from("Off")),
            ("Gain", FeatureValue::Float(21.0)),
            ("GainAuto", FeatureValue::from("Off")),
            ("GainAutoMax", FeatureValue::Float(31.0)),
            ("GainAutoMin", FeatureValue::Float(0.0)),
            ("SensorWidth", FeatureValue::Int(780)),
            ("SensorHeight", FeatureValue::Int(580)),
            ("GevCurrentIPAddress", FeatureValue::Int(i64::from(ip))),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            model: "Manta_G-046C (E0020005)".into(),
            interface_id: "enp1s0".into(),
            width: 64,
            height: 48,
            pixel_formats: vec![
                PixelFormat::Mono8,
                PixelFormat::Mono12,
                PixelFormat::BayerRG8,
                PixelFormat::Bgr8,
                PixelFormat::Rgb8,
            ],
            features,
            commands: vec!["GVSPAdjustPacketSize".into()],
            frame_interval: Duration::from_millis(10),
        }
    }
}

/// Device-side bookkeeping of open backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub exclusive_open: usize,
    pub readonly_open: usize,
    /// Opens that found an incompatible backend already open.
    pub overlap_violations: usize,
    pub opened_total: usize,
    pub feature_writes: usize,
}

#[derive(Debug)]
struct CameraState {
    spec: SimCameraSpec,
    features: BTreeMap<String, FeatureValue>,
    connected: bool,
    deliver_frames: bool,
    incomplete_every: Option<u64>,
    pixel_format: Option<PixelFormat>,
    streaming: bool,
    next_frame_id: u64,
    stats: SessionStats,
}

impl CameraState {
    fn check_connected(&self, id: &str) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::Disconnected(id.to_string()))
        }
    }

    fn make_frame(&mut self) -> Frame {
        let format = self
            .pixel_format
            .clone()
            .or_else(|| self.spec.pixel_formats.first().cloned())
            .unwrap_or(PixelFormat::Mono8);
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let len = self.spec.width as usize * self.spec.height as usize * format.bytes_per_pixel();
        let complete = match self.incomplete_every {
            Some(n) if n > 0 => frame_id % n != 0,
            _ => true,
        };
        Frame {
            data: vec![(frame_id % 256) as u8; len],
            width: self.spec.width,
            height: self.spec.height,
            pixel_format: format,
            frame_id,
            timestamp: chrono::Utc::now(),
            complete,
        }
    }
}

/// Test and control handle for one simulated camera.
#[derive(Debug, Clone)]
pub struct SimHandle {
    id: Arc<str>,
    state: Arc<Mutex<CameraState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Plug or unplug the camera. Open backends fail with
    /// [`DeviceError::Disconnected`] while unplugged.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Withhold frames, so every capture times out.
    pub fn set_deliver_frames(&self, deliver: bool) {
        self.lock().deliver_frames = deliver;
    }

    /// Mark every n-th frame as incomplete.
    pub fn set_incomplete_every(&self, n: Option<u64>) {
        self.lock().incomplete_every = n;
    }

    pub fn feature(&self, name: &str) -> Option<FeatureValue> {
        self.lock().features.get(name).cloned()
    }

    /// Change a feature on the device side, bypassing any session.
    pub fn set_feature(&self, name: &str, value: impl Into<FeatureValue>) {
        self.lock().features.insert(name.to_string(), value.into());
    }

    pub fn remove_feature(&self, name: &str) {
        self.lock().features.remove(name);
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.lock().pixel_format.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }
}

/// A camera system whose cameras live in this process.
#[derive(Debug, Default)]
pub struct SimulatedSystem {
    cameras: Mutex<HashMap<String, SimHandle>>,
}

impl SimulatedSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera, replacing any previous one with the same id.
    pub fn add_camera(&self, id: &str, spec: SimCameraSpec) -> SimHandle {
        let features = spec.features.clone();
        let handle = SimHandle {
            id: Arc::from(id),
            state: Arc::new(Mutex::new(CameraState {
                spec,
                features,
                connected: true,
                deliver_frames: true,
                incomplete_every: None,
                pixel_format: None,
                streaming: false,
                next_frame_id: 0,
                stats: SessionStats::default(),
            })),
        };
        self.lock().insert(id.to_string(), handle.clone());
        tracing::debug!(device = id, "simulated camera added");
        handle
    }

    pub fn handle(&self, id: &str) -> Option<SimHandle> {
        self.lock().get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SimHandle>> {
        self.cameras.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CameraSystem for SimulatedSystem {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self, id: &str, mode: AccessMode) -> Result<Box<dyn CameraBackend>, DeviceError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| DeviceError::Unavailable(format!("no camera {id}")))?;
        {
            let mut state = handle.lock();
            if !state.connected {
                return Err(DeviceError::Unavailable(format!("camera {id} not reachable")));
            }
            let stats = &mut state.stats;
            let conflict = match mode {
                AccessMode::Exclusive => stats.exclusive_open > 0 || stats.readonly_open > 0,
                AccessMode::ReadOnly => stats.exclusive_open > 0,
            };
            if conflict {
                stats.overlap_violations += 1;
                tracing::error!(device = id, ?mode, "overlapping sessions on simulated camera");
            }
            match mode {
                AccessMode::Exclusive => stats.exclusive_open += 1,
                AccessMode::ReadOnly => stats.readonly_open += 1,
            }
            stats.opened_total += 1;
        }
        Ok(Box::new(SimBackend {
            handle,
            mode,
            stream: None,
        }))
    }
}

struct StreamThread {
    running: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

struct SimBackend {
    handle: SimHandle,
    mode: AccessMode,
    stream: Option<StreamThread>,
}

impl SimBackend {
    fn state(&self) -> Result<MutexGuard<'_, CameraState>, DeviceError> {
        let state = self.handle.lock();
        state.check_connected(self.handle.id())?;
        Ok(state)
    }

    fn halt_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.running.store(false, Ordering::SeqCst);
            if stream.join.join().is_err() {
                tracing::error!(device = self.handle.id(), "simulated stream thread panicked");
            }
            self.handle.lock().streaming = false;
        }
    }
}

impl CameraBackend for SimBackend {
    fn model(&self) -> Result<String, DeviceError> {
        Ok(self.state()?.spec.model.clone())
    }

    fn interface_id(&self) -> Result<String, DeviceError> {
        Ok(self.state()?.spec.interface_id.clone())
    }

    fn permits_exclusive(&self) -> Result<bool, DeviceError> {
        let state = self.state()?;
        Ok(match self.mode {
            AccessMode::Exclusive => true,
            AccessMode::ReadOnly => state.stats.exclusive_open == 0,
        })
    }

    fn pixel_formats(&self) -> Result<Vec<PixelFormat>, DeviceError> {
        Ok(self.state()?.spec.pixel_formats.clone())
    }

    fn set_pixel_format(&mut self, format: &PixelFormat) -> Result<(), DeviceError> {
        let mut state = self.state()?;
        if !state.spec.pixel_formats.contains(format) {
            return Err(DeviceError::Config(format!("{format} not offered")));
        }
        state.pixel_format = Some(format.clone());
        Ok(())
    }

    fn feature(&self, name: &str) -> Result<FeatureValue, DeviceError> {
        self.state()?
            .features
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::FeatureUnavailable(name.to_string()))
    }

    fn set_feature(&mut self, name: &str, value: &FeatureValue) -> Result<(), DeviceError> {
        let mut state = self.state()?;
        match state.features.get_mut(name) {
            Some(slot) => {
                *slot = value.clone();
                state.stats.feature_writes += 1;
                Ok(())
            }
            None => Err(DeviceError::FeatureUnavailable(name.to_string())),
        }
    }

    fn run_command(&mut self, name: &str) -> Result<(), DeviceError> {
        let state = self.state()?;
        if state.spec.commands.iter().any(|c| c == name) {
            Ok(())
        } else {
            Err(DeviceError::FeatureUnavailable(name.to_string()))
        }
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Frame, DeviceError> {
        let (deliver, interval) = {
            let state = self.state()?;
            (state.deliver_frames, state.spec.frame_interval)
        };
        if !deliver || interval > timeout {
            std::thread::sleep(timeout);
            self.state()?;
            return Err(DeviceError::FrameTimeout(timeout));
        }
        std::thread::sleep(interval);
        Ok(self.state()?.make_frame())
    }

    fn start_streaming(
        &mut self,
        _buffer_count: usize,
        mut on_frame: FrameCallback,
    ) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Err(DeviceError::Config("already streaming".into()));
        }
        let interval = {
            let mut state = self.state()?;
            state.streaming = true;
            state.spec.frame_interval
        };
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = self.handle.clone();
        let join = std::thread::Builder::new()
            .name("camrelay-stream".into())
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while flag.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now < next {
                        std::thread::sleep((next - now).min(Duration::from_millis(5)));
                        continue;
                    }
                    next += interval;
                    let frame = {
                        let mut state = handle.lock();
                        if !state.connected {
                            break;
                        }
                        if !state.deliver_frames {
                            continue;
                        }
                        state.make_frame()
                    };
                    on_frame(frame);
                }
                tracing::trace!(device = handle.id(), "simulated stream ended");
            })
            .map_err(|e| {
                self.handle.lock().streaming = false;
                DeviceError::Config(format!("failed to spawn stream thread: {e}"))
            })?;
        self.stream = Some(StreamThread { running, join });
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        self.halt_stream();
        Ok(())
    }
}

impl Drop for SimBackend {
    fn drop(&mut self) {
        self.halt_stream();
        let mut state = self.handle.lock();
        match self.mode {
            AccessMode::Exclusive => {
                state.stats.exclusive_open = state.stats.exclusive_open.saturating_sub(1)
            }
            AccessMode::ReadOnly => {
                state.stats.readonly_open = state.stats.readonly_open.saturating_sub(1)
            }
        }
    }
}
