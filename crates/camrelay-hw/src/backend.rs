//! The camera SDK seen as an opaque device handle.
//!
//! A [`CameraSystem`] opens cameras by identity; each open camera is a
//! [`CameraBackend`]. Everything above this module goes through
//! [`DeviceSession`](crate::DeviceSession), which adds access control,
//! format negotiation and feature-name resolution.

use crate::format::PixelFormat;
use crate::frame::Frame;
use camrelay_core::FeatureValue;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("device busy: {0}")]
    Busy(String),
    #[error("device configuration failed: {0}")]
    Config(String),
    #[error("feature unavailable: {0}")]
    FeatureUnavailable(String),
    #[error("no frame within {0:?}")]
    FrameTimeout(Duration),
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

impl DeviceError {
    /// Soft errors are logged and the current loop carries on; everything
    /// else ends the worker that hit it.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            DeviceError::FeatureUnavailable(_) | DeviceError::FrameTimeout(_)
        )
    }
}

/// How a session holds a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Feature writes and frame capture. At most one per device.
    Exclusive,
    /// Feature reads only. Any number, but never alongside an exclusive session.
    ReadOnly,
}

/// Invoked from the SDK's own context for every frame delivered while streaming.
pub type FrameCallback = Box<dyn FnMut(Frame) + Send + 'static>;

/// Entry point of a camera SDK.
pub trait CameraSystem: Send + Sync {
    fn name(&self) -> &str;

    /// Open the camera identified by `id`. Fails with
    /// [`DeviceError::Unavailable`] when no such camera is reachable.
    fn open(&self, id: &str, mode: AccessMode) -> Result<Box<dyn CameraBackend>, DeviceError>;
}

/// One open camera handle.
pub trait CameraBackend: Send {
    fn model(&self) -> Result<String, DeviceError>;
    fn interface_id(&self) -> Result<String, DeviceError>;
    /// Whether the device would grant an exclusive (capture) session right now.
    fn permits_exclusive(&self) -> Result<bool, DeviceError>;

    fn pixel_formats(&self) -> Result<Vec<PixelFormat>, DeviceError>;
    fn set_pixel_format(&mut self, format: &PixelFormat) -> Result<(), DeviceError>;

    fn feature(&self, name: &str) -> Result<FeatureValue, DeviceError>;
    fn set_feature(&mut self, name: &str, value: &FeatureValue) -> Result<(), DeviceError>;
    fn run_command(&mut self, name: &str) -> Result<(), DeviceError>;

    /// Block up to `timeout` for a single frame.
    fn next_frame(&mut self, timeout: Duration) -> Result<Frame, DeviceError>;

    /// Start callback-driven streaming with `buffer_count` driver buffers.
    fn start_streaming(
        &mut self,
        buffer_count: usize,
        on_frame: FrameCallback,
    ) -> Result<(), DeviceError>;

    /// Stop streaming. The callback passed to
    /// [`start_streaming`](Self::start_streaming) is dropped before this returns.
    fn stop_streaming(&mut self) -> Result<(), DeviceError>;
}
