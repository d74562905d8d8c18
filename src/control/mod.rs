//! Local control plane: newline-delimited JSON over a unix domain socket.
//!
//! ```text
//! -> {"id":1,"method":"getinfo"}
//! <- {"id":1,"result":{"version":"0.3.0"}}
//! -> {"id":2,"method":{"getitem":{"key":"k"}}}
//! <- {"id":2,"error":{"kind":"ValueNotFound","message":"..."}}
//! ```
//!
//! The endpoint is only protected by filesystem permissions. Values travel as
//! UTF-8 strings.

mod client;
mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Contact, Id};
use crate::error::ErrorKind;
use crate::node::{DhtNode, WeakDhtNode};
use crate::{Error, Result};

pub use client::ControlClient;
pub use server::ControlServer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    GetInfo,
    GetPeers { key: String, limit: usize },
    GetItem { key: String },
    PutItem { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Structured error shipped to control-plane callers.
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(error: &Error) -> Self {
        ErrorBody {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<ErrorBody> for Error {
    fn from(body: ErrorBody) -> Self {
        Error::Control {
            kind: body.kind,
            message: body.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInfo {
    pub version: String,
}

/// Operations exposed by the control plane.
///
/// Every session calls these from its own thread; implementations must not
/// make one caller wait on another.
pub trait ControlApi: Clone + Send + 'static {
    /// Static, never waits on the node.
    fn get_info(&self) -> ControlInfo;

    fn get_peers(&self, key: &str, limit: usize) -> Result<Vec<Contact>>;

    fn get_item(&self, key: &str) -> Result<Vec<u8>>;

    fn put_item(&self, key: &str, value: &[u8]) -> Result<()>;
}

impl ControlApi for DhtNode {
    fn get_info(&self) -> ControlInfo {
        ControlInfo {
            version: DhtNode::version().to_string(),
        }
    }

    fn get_peers(&self, key: &str, limit: usize) -> Result<Vec<Contact>> {
        DhtNode::get_peers(self, Id::from_key(key), limit)
    }

    fn get_item(&self, key: &str) -> Result<Vec<u8>> {
        DhtNode::get_item(self, key)
    }

    fn put_item(&self, key: &str, value: &[u8]) -> Result<()> {
        DhtNode::put_item(self, key, value)
    }
}

/// What the node's own control server holds, so it never keeps the node
/// running by itself.
impl ControlApi for WeakDhtNode {
    fn get_info(&self) -> ControlInfo {
        ControlInfo {
            version: DhtNode::version().to_string(),
        }
    }

    fn get_peers(&self, key: &str, limit: usize) -> Result<Vec<Contact>> {
        ControlApi::get_peers(&self.upgrade()?, key, limit)
    }

    fn get_item(&self, key: &str) -> Result<Vec<u8>> {
        ControlApi::get_item(&self.upgrade()?, key)
    }

    fn put_item(&self, key: &str, value: &[u8]) -> Result<()> {
        ControlApi::put_item(&self.upgrade()?, key, value)
    }
}

/// Answer one request. Errors become an error response, never a panic.
pub fn handle<A: ControlApi>(api: &A, request: Request) -> Response {
    let result = match request.method {
        Method::GetInfo => to_value(api.get_info()),
        Method::GetPeers { key, limit } => api.get_peers(&key, limit).and_then(to_value),
        Method::GetItem { key } => api
            .get_item(&key)
            .map(|value| Value::String(String::from_utf8_lossy(&value).into_owned())),
        Method::PutItem { key, value } => api
            .put_item(&key, value.as_bytes())
            .map(|()| Value::Bool(true)),
    };

    match result {
        Ok(result) => Response {
            id: request.id,
            result: Some(result),
            error: None,
        },
        Err(error) => Response {
            id: request.id,
            result: None,
            error: Some(ErrorBody::from(&error)),
        },
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(protocol_error)
}

pub(crate) fn protocol_error(error: serde_json::Error) -> Error {
    Error::Control {
        kind: ErrorKind::Protocol,
        message: error.to_string(),
    }
}
