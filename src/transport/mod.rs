//! Message transport and its capability layers.
//!
//! A [Transport] sends and receives [Message]s. The base [UdpTransport] owns
//! the socket and the wire codec; decorators such as [ReachabilityTransport]
//! and [TelemetryTransport] wrap any other transport, forward every
//! operation to it and add one capability each. None of the layers knows
//! which layers surround it.
//!
//! Cross-cutting transformations that must run next to the wire, like
//! signing and verification, are [Hook]s registered through
//! [Transport::hooks_mut]; the registration reaches the base transport
//! whatever the number of decorators in between. See [Hooks] for the
//! ordering rules.
//!
//! [Pipeline] is the outermost owner: it composes the stack from a
//! [Config](crate::Config), starts it, and turns faults into
//! [TransportEvent]s.

mod auth;
mod hooks;
mod pipeline;
mod reachability;
mod telemetry;
mod udp;

use std::fmt::Debug;
use std::net::SocketAddr;

use crate::common::Message;

pub use auth::AuthHook;
pub use hooks::{Hook, Hooks, Rejection};
pub use pipeline::Pipeline;
pub use reachability::{AddressConsensus, PortMapper, ReachabilityTransport, StaticMapping};
pub use telemetry::{LinkQuality, Telemetry, TelemetryTransport};
pub use udp::{UdpTransport, MTU};

/// Events delivered to the node's actor.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket is bound and reachability negotiation is settled.
    /// Emitted exactly once.
    Ready(SocketAddr),
    /// A non-fatal fault; the transport stays open.
    Error(TransportError),
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Transport is not started")]
    NotStarted,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_bencode::Error),

    #[error("Malformed datagram from {from}: {reason}")]
    Malformed { from: SocketAddr, reason: String },

    #[error("Dropped message from {from}: {rejection}")]
    Rejected {
        from: SocketAddr,
        rejection: Rejection,
    },

    #[error("Outgoing message rejected: {0}")]
    OutgoingRejected(Rejection),

    #[error("Datagram of {0} bytes exceeds the MTU")]
    TooLarge(usize),
}

/// A message transport, or a capability layer around one.
pub trait Transport: Debug {
    /// Bind the underlying socket and run any negotiation this layer needs.
    /// Returns the local address.
    fn start(&mut self) -> Result<SocketAddr, TransportError>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn send(&mut self, to: SocketAddr, message: Message) -> Result<(), TransportError>;

    /// Receive at most one message, waiting briefly if none is buffered.
    ///
    /// `None` if nothing arrived, `Some(Err(_))` for a dropped datagram.
    fn recv(&mut self) -> Option<Result<(Message, SocketAddr), TransportError>>;

    /// Hook registry of the base transport.
    fn hooks_mut(&mut self) -> &mut Hooks;

    /// Best known public address, if any layer knows one.
    fn public_address(&self) -> Option<SocketAddr>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn start(&mut self) -> Result<SocketAddr, TransportError> {
        (**self).start()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }

    fn send(&mut self, to: SocketAddr, message: Message) -> Result<(), TransportError> {
        (**self).send(to, message)
    }

    fn recv(&mut self) -> Option<Result<(Message, SocketAddr), TransportError>> {
        (**self).recv()
    }

    fn hooks_mut(&mut self) -> &mut Hooks {
        (**self).hooks_mut()
    }

    fn public_address(&self) -> Option<SocketAddr> {
        (**self).public_address()
    }
}
