//! Remote-control wire protocol.
//!
//! Requests are JSON objects with a `cmd` field:
//!
//! ```text
//! {"cmd": "read"}
//! {"cmd": "change", "parameters": {"Exposure": 1000.0, "Gain": 15}}
//! ```
//!
//! Responses are the JSON strings `"OK"`, `"INVALID"`, `"FAULT"`, or, for
//! `read`, the current feature snapshot as a JSON object.

use crate::cache::FeatureCache;
use crate::command::Command;
use crate::feature::FeatureSnapshot;
use crate::relay::CommandSender;
use serde_json::{Map, Value};
use thiserror::Error;

pub const REQUEST_CMD: &str = "cmd";
pub const REQUEST_READ: &str = "read";
pub const REQUEST_CHANGE: &str = "change";
pub const REQUEST_PARAMS: &str = "parameters";

pub const RESPONSE_OK: &str = "OK";
pub const RESPONSE_INVALID: &str = "INVALID";
pub const RESPONSE_FAULT: &str = "FAULT";

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not JSON at all.
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Valid JSON that is not a request we understand.
    #[error("invalid request: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Read,
    Change(Command),
}

impl Request {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(obj) = value else {
            return Err(ProtocolError::Invalid("request is not an object".into()));
        };
        let cmd = obj
            .get(REQUEST_CMD)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Invalid(format!("missing `{REQUEST_CMD}`")))?
            .to_lowercase();

        match cmd.as_str() {
            REQUEST_READ => Ok(Request::Read),
            REQUEST_CHANGE => {
                let params = obj
                    .get(REQUEST_PARAMS)
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        ProtocolError::Invalid(format!("`change` without `{REQUEST_PARAMS}` object"))
                    })?;
                let command = Command::from_parameters(params);
                if command.is_empty() {
                    return Err(ProtocolError::Invalid(
                        "`change` carries no applicable parameters".into(),
                    ));
                }
                Ok(Request::Change(command))
            }
            other => Err(ProtocolError::Invalid(format!("unknown cmd `{other}`"))),
        }
    }

    /// Wire form of the request, as sent by clients.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        match self {
            Request::Read => {
                obj.insert(REQUEST_CMD.into(), REQUEST_READ.into());
            }
            Request::Change(command) => {
                obj.insert(REQUEST_CMD.into(), REQUEST_CHANGE.into());
                let params: Map<String, Value> = command
                    .iter()
                    .map(|(k, v)| (k.wire_name().to_string(), serde_json::json!(v)))
                    .collect();
                obj.insert(REQUEST_PARAMS.into(), Value::Object(params));
            }
        }
        Value::Object(obj).to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Invalid,
    Fault,
    Snapshot(FeatureSnapshot),
}

impl Response {
    pub fn encode(&self) -> String {
        let status = match self {
            Response::Ok => RESPONSE_OK,
            Response::Invalid => RESPONSE_INVALID,
            Response::Fault => RESPONSE_FAULT,
            Response::Snapshot(snapshot) => {
                return serde_json::to_string(snapshot).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "failed to encode snapshot");
                    Value::String(RESPONSE_FAULT.into()).to_string()
                });
            }
        };
        Value::String(status.into()).to_string()
    }

    /// Parse a server reply (client side).
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str::<Value>(text)? {
            Value::String(s) => match s.as_str() {
                RESPONSE_OK => Ok(Response::Ok),
                RESPONSE_INVALID => Ok(Response::Invalid),
                RESPONSE_FAULT => Ok(Response::Fault),
                other => Err(ProtocolError::Invalid(format!("unknown status `{other}`"))),
            },
            Value::Null => Ok(Response::Snapshot(FeatureSnapshot::default())),
            obj @ Value::Object(_) => Ok(Response::Snapshot(serde_json::from_value(obj)?)),
            other => Err(ProtocolError::Invalid(format!("unexpected reply `{other}`"))),
        }
    }
}

impl From<&ProtocolError> for Response {
    fn from(e: &ProtocolError) -> Self {
        match e {
            ProtocolError::Malformed(_) => Response::Fault,
            ProtocolError::Invalid(_) => Response::Invalid,
        }
    }
}

/// Answer one request against the shared cache and command relay.
pub fn dispatch(text: &str, cache: &FeatureCache, commands: &CommandSender) -> Response {
    let request = match Request::parse(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting request");
            return Response::from(&e);
        }
    };

    match request {
        Request::Read => Response::Snapshot(cache.get()),
        Request::Change(command) => {
            tracing::debug!(?command, "queueing remote change");
            match commands.send(command) {
                Ok(()) => Response::Ok,
                Err(e) => {
                    tracing::error!(error = %e, "cannot forward remote change");
                    Response::Fault
                }
            }
        }
    }
}
