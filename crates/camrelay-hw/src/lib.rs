//! camrelay-hw — Device layer for camera sessions.
//!
//! The vendor SDK is reached through the [`CameraSystem`]/[`CameraBackend`]
//! traits. [`DeviceSession`] wraps one open camera with the access claim,
//! format negotiation and feature-name resolution the workers rely on.

pub mod access;
pub mod backend;
pub mod format;
pub mod frame;
pub mod session;
pub mod sim;
pub mod tally;

pub use access::{AccessGuard, AccessRegistry, Holders};
pub use backend::{AccessMode, CameraBackend, CameraSystem, DeviceError, FrameCallback};
pub use format::{negotiate, Negotiated, PixelFormat};
pub use frame::Frame;
pub use session::DeviceSession;
pub use sim::{SimCameraSpec, SimHandle, SimulatedSystem};
pub use tally::{PendingTally, TallyToken};
