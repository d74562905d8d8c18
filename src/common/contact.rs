//! Contact descriptor: the externally visible identity of a node.
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::common::Id;

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A peer's addressable, identity-bearing record.
///
/// Two contacts are the same peer iff their fingerprints match; the address
/// and port may change without changing the peer's identity.
pub struct Contact {
    pub address: String,
    pub port: u16,
    /// Fingerprint of the peer's public key, also its node [Id].
    pub fingerprint: Id,
}

impl Contact {
    pub fn new(address: impl Into<String>, port: u16, fingerprint: Id) -> Self {
        Contact {
            address: address.into(),
            port,
            fingerprint,
        }
    }

    /// Contact for a peer we only know by the socket it talks to us from.
    pub fn from_socket_addr(address: SocketAddr, fingerprint: Id) -> Self {
        Contact::new(address.ip().to_string(), address.port(), fingerprint)
    }

    pub fn id(&self) -> &Id {
        &self.fingerprint
    }

    /// Resolves `address:port`, returning the first resolved socket address.
    ///
    /// May block on name resolution; only meant for configured seeds.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        (self.address.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
    }

    /// `address:port` if the address is an IP literal. Never resolves names,
    /// so it is safe for contacts learned from the network.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.address
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state)
    }
}
