//! camrelayd — camera device workers, the remote-control server and motion
//! plugins, wired together by the `camrelayd` binary.

pub mod acquisition;
pub mod config;
pub mod context;
pub mod feedback;
pub mod plugins;
pub mod polling;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod stop;
pub mod supervisor;

pub use acquisition::{AcquisitionSettings, AcquisitionWorker};
pub use config::{AcquisitionMode, Config, ConfigError, Limits};
pub use context::WorkerContext;
pub use feedback::{Feedback, LogFeedback, StopReason};
pub use plugins::{MotionPlugin, PluginDescription, PluginError, PluginRegistry};
pub use polling::PollingWorker;
pub use server::{
    start_remote_control, RemoteControlServer, ServerError, ServerHandle, ServerStatus, StatusWatch,
};
pub use state::{WorkerKind, WorkerState};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use supervisor::{SupervisorError, WorkerSupervisor};
