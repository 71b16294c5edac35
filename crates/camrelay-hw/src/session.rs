//! Device sessions: an open camera plus the access claim that guards it.

use crate::access::{AccessGuard, AccessRegistry};
use crate::backend::{AccessMode, CameraBackend, CameraSystem, DeviceError};
use crate::format::{negotiate, Negotiated};
use crate::frame::Frame;
use crate::tally::PendingTally;
use camrelay_core::{CommandKey, FeatureValue};
use crossbeam_channel::{Receiver, TrySendError};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Device-side names tried, in order, for the exposure time.
pub const EXPOSURE_FEATURES: [&str; 2] = ["ExposureTimeAbs", "ExposureTime"];
/// Device-side names tried, in order, for the analog gain.
pub const GAIN_FEATURES: [&str; 2] = ["Gain", "GainRaw"];

pub const EXPOSURE_AUTO_FEATURE: &str = "ExposureAuto";
pub const GAIN_AUTO_FEATURE: &str = "GainAuto";
pub const GAIN_MIN_FEATURE: &str = "GainAutoMin";
pub const GAIN_MAX_FEATURE: &str = "GainAutoMax";
pub const WIDTH_FEATURE: &str = "SensorWidth";
pub const HEIGHT_FEATURE: &str = "SensorHeight";
pub const IP_ADDRESS_FEATURE: &str = "GevCurrentIPAddress";
/// Optimizes the GigE packet size; absent on other interfaces.
pub const PACKET_SIZE_COMMAND: &str = "GVSPAdjustPacketSize";

/// How long `stop_streaming` waits for in-flight frame callbacks.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// An open device. The access claim is held until [`close`](Self::close)
/// or drop, and is released only after the backend handle is gone.
pub struct DeviceSession {
    id: String,
    mode: AccessMode,
    backend: Option<Box<dyn CameraBackend>>,
    guard: AccessGuard,
    negotiated: Option<Negotiated>,
    exposure_name: Option<&'static str>,
    gain_name: Option<&'static str>,
    callbacks: PendingTally,
    streaming: bool,
}

impl DeviceSession {
    /// Claim `id` in the registry, then open it through `system`.
    pub fn open(
        system: &dyn CameraSystem,
        registry: &AccessRegistry,
        id: &str,
        mode: AccessMode,
    ) -> Result<Self, DeviceError> {
        let guard = registry.acquire(id, mode)?;
        let backend = system.open(id, mode)?;
        tracing::debug!(device = id, ?mode, system = system.name(), "session opened");
        Ok(Self {
            id: id.to_string(),
            mode,
            backend: Some(backend),
            guard,
            negotiated: None,
            exposure_name: None,
            gain_name: None,
            callbacks: PendingTally::new(),
            streaming: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Prepare the device for capture: adjust the transport packet size where
    /// supported, then negotiate and set the pixel format.
    pub fn configure(&mut self) -> Result<Negotiated, DeviceError> {
        self.require_exclusive("configure")?;
        let id = self.id.clone();
        let backend = self.backend_mut()?;
        if let Err(e) = backend.run_command(PACKET_SIZE_COMMAND) {
            tracing::debug!(device = %id, error = %e, "packet size adjustment skipped");
        }
        let offered = backend.pixel_formats()?;
        let negotiated = negotiate(&offered)?;
        backend.set_pixel_format(&negotiated.format)?;
        tracing::info!(
            device = %id,
            format = %negotiated.format,
            host_conversion = negotiated.needs_host_conversion,
            "pixel format negotiated"
        );
        self.negotiated = Some(negotiated.clone());
        Ok(negotiated)
    }

    pub fn feature(&self, name: &str) -> Result<FeatureValue, DeviceError> {
        self.backend()?.feature(name)
    }

    pub fn set_feature(&mut self, name: &str, value: &FeatureValue) -> Result<(), DeviceError> {
        self.require_exclusive(name)?;
        self.backend_mut()?.set_feature(name, value)
    }

    /// Current exposure time, under whichever name the device uses.
    pub fn exposure(&mut self) -> Result<FeatureValue, DeviceError> {
        let name = self.exposure_feature()?;
        self.feature(name)
    }

    pub fn gain(&mut self) -> Result<FeatureValue, DeviceError> {
        let name = self.gain_feature()?;
        self.feature(name)
    }

    /// Write one command entry to the device feature it controls.
    pub fn apply(&mut self, key: CommandKey, value: &FeatureValue) -> Result<(), DeviceError> {
        if !key.accepts(value) {
            return Err(DeviceError::FeatureUnavailable(format!(
                "{} does not accept {value}",
                key.wire_name()
            )));
        }
        let name = match key {
            CommandKey::Exposure => self.exposure_feature()?,
            CommandKey::Gain => self.gain_feature()?,
            CommandKey::ExposureMode => EXPOSURE_AUTO_FEATURE,
            CommandKey::GainMode => GAIN_AUTO_FEATURE,
        };
        tracing::debug!(device = %self.id, feature = name, %value, "applying");
        self.set_feature(name, value)
    }

    pub fn model(&self) -> Result<String, DeviceError> {
        self.backend()?.model()
    }

    pub fn interface_id(&self) -> Result<String, DeviceError> {
        self.backend()?.interface_id()
    }

    pub fn permits_exclusive(&self) -> Result<bool, DeviceError> {
        self.backend()?.permits_exclusive()
    }

    /// The GigE address, if the device is on a GigE interface.
    pub fn ip_address(&self) -> Option<Ipv4Addr> {
        let raw = self.feature(IP_ADDRESS_FEATURE).ok()?.as_i64()?;
        decode_ip(raw)
    }

    pub fn next_frame(&mut self, timeout: Duration) -> Result<Frame, DeviceError> {
        self.require_exclusive("frame capture")?;
        self.backend_mut()?.next_frame(timeout)
    }

    /// Start streaming into a bounded channel of `buffer` frames. Frames that
    /// arrive while the channel is full are dropped.
    pub fn start_streaming(&mut self, buffer: usize) -> Result<Receiver<Frame>, DeviceError> {
        self.require_exclusive("streaming")?;
        let (tx, rx) = crossbeam_channel::bounded(buffer.max(1));
        let tally = self.callbacks.clone();
        let id = self.id.clone();
        self.backend_mut()?.start_streaming(
            buffer.max(1),
            Box::new(move |frame: Frame| {
                let _token = tally.enter();
                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        tracing::warn!(device = %id, frame_id = frame.frame_id, "frame channel full, dropping frame");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        tracing::trace!(device = %id, "frame receiver gone");
                    }
                }
            }),
        )?;
        self.streaming = true;
        tracing::debug!(device = %self.id, buffer, "streaming started");
        Ok(rx)
    }

    /// Stop streaming and wait for callbacks already in flight. No-op when
    /// not streaming.
    pub fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        let result = self.backend_mut().and_then(|b| b.stop_streaming());
        if !self.callbacks.wait_idle(STREAM_DRAIN_TIMEOUT) {
            tracing::warn!(
                device = %self.id,
                pending = self.callbacks.pending(),
                "frame callbacks still running after stop"
            );
        }
        tracing::debug!(device = %self.id, "streaming stopped");
        result
    }

    /// Release the device. Idempotent.
    pub fn close(&mut self) {
        if self.backend.is_none() {
            return;
        }
        if let Err(e) = self.stop_streaming() {
            tracing::warn!(device = %self.id, error = %e, "stop streaming on close failed");
        }
        self.backend = None;
        self.guard.release();
        tracing::debug!(device = %self.id, mode = ?self.mode, "session closed");
    }

    fn exposure_feature(&mut self) -> Result<&'static str, DeviceError> {
        if let Some(name) = self.exposure_name {
            return Ok(name);
        }
        let name = self.resolve(&EXPOSURE_FEATURES)?;
        self.exposure_name = Some(name);
        Ok(name)
    }

    fn gain_feature(&mut self) -> Result<&'static str, DeviceError> {
        if let Some(name) = self.gain_name {
            return Ok(name);
        }
        let name = self.resolve(&GAIN_FEATURES)?;
        self.gain_name = Some(name);
        Ok(name)
    }

    fn resolve(&self, candidates: &[&'static str]) -> Result<&'static str, DeviceError> {
        let backend = self.backend()?;
        for &name in candidates {
            match backend.feature(name) {
                Ok(_) => return Ok(name),
                Err(DeviceError::FeatureUnavailable(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(DeviceError::FeatureUnavailable(candidates.join(" / ")))
    }

    fn require_exclusive(&self, what: &str) -> Result<(), DeviceError> {
        match self.mode {
            AccessMode::Exclusive => Ok(()),
            AccessMode::ReadOnly => Err(DeviceError::FeatureUnavailable(format!(
                "{what}: session on {} is read-only",
                self.id
            ))),
        }
    }

    fn backend(&self) -> Result<&dyn CameraBackend, DeviceError> {
        self.backend
            .as_deref()
            .ok_or_else(|| DeviceError::Unavailable(format!("session on {} is closed", self.id)))
    }

    fn backend_mut(&mut self) -> Result<&mut Box<dyn CameraBackend>, DeviceError> {
        let id = &self.id;
        self.backend
            .as_mut()
            .ok_or_else(|| DeviceError::Unavailable(format!("session on {id} is closed")))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// The camera reports its address as an integer whose least significant byte
/// is the first octet.
pub fn decode_ip(raw: i64) -> Option<Ipv4Addr> {
    let raw = u32::try_from(raw).ok()?;
    Some(Ipv4Addr::from(raw.to_le_bytes()))
}
