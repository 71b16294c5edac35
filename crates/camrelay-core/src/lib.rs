//! camrelay-core — Feature snapshots, parameter commands and the remote-control protocol.
//!
//! Everything here is device-independent: the shared [`FeatureCache`], the
//! [`CommandRelay`] that carries parameter changes to the acquisition worker,
//! and the JSON request/response protocol spoken by the remote-control server.

pub mod cache;
pub mod command;
pub mod endpoint;
pub mod feature;
pub mod protocol;
pub mod relay;

pub use cache::FeatureCache;
pub use command::{Command, CommandKey};
pub use endpoint::{Endpoint, EndpointError};
pub use feature::{FeatureKey, FeatureSnapshot, FeatureValue, SnapshotBuilder};
pub use protocol::{ProtocolError, Request, Response};
pub use relay::{CommandRelay, CommandSender, RelayClosed};
