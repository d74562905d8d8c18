//! Serialize and deserialize wire messages.
//!
//! Messages are bencoded dictionaries, in the spirit of KRPC: `t` is the
//! transaction id, `y` the message kind, `id` the sender's fingerprint.
//! `k` and `sig` carry the sender's public key and signature once the
//! authentication hook stamped the message.

use serde::{Deserialize, Serialize};

use crate::common::{Contact, Id};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    #[serde(rename = "t")]
    pub transaction_id: u32,

    /// Fingerprint claimed by the sender.
    #[serde(rename = "id")]
    pub sender: Id,

    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "serde_bytes")]
    pub public_key: Option<[u8; 32]>,

    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "serde_bytes")]
    pub signature: Option<[u8; 64]>,

    /// The requester's address as seen by the responder. Only set on responses.
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub observed_address: Option<String>,

    #[serde(flatten)]
    pub body: Body,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y", rename_all = "snake_case")]
pub enum Body {
    // === Requests ===
    Ping,
    FindNode {
        target: Id,
    },
    FindValue {
        target: Id,
    },
    Store {
        target: Id,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },

    // === Responses ===
    Pong,
    Nodes {
        nodes: Vec<Contact>,
    },
    Value {
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    Stored,

    Error(ErrorSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

impl Body {
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Body::Ping | Body::FindNode { .. } | Body::FindValue { .. } | Body::Store { .. }
        )
    }

    /// Responses and errors both answer a request.
    pub fn is_response(&self) -> bool {
        !self.is_request()
    }
}

impl Message {
    pub fn new(transaction_id: u32, sender: Id, body: Body) -> Self {
        Message {
            transaction_id,
            sender,
            public_key: None,
            signature: None,
            observed_address: None,
            body,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Message, serde_bencode::Error> {
        serde_bencode::from_bytes(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }

    /// Canonical encoding covered by the signature: the message itself with
    /// the `sig` field absent.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        let mut unsigned = self.clone();
        unsigned.signature = None;

        unsigned.to_bytes()
    }

    /// Closer contacts carried by a `nodes` response.
    pub fn closer_nodes(&self) -> Option<&[Contact]> {
        match &self.body {
            Body::Nodes { nodes } => Some(nodes),
            _ => None,
        }
    }
}
