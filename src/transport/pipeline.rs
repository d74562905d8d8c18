//! Transport composition and lifecycle events.

use std::net::{SocketAddr, ToSocketAddrs};

use flume::Sender;
use tracing::debug;

use super::{
    AuthHook, ReachabilityTransport, StaticMapping, Telemetry, TelemetryTransport, Transport,
    TransportError, TransportEvent, UdpTransport,
};
use crate::common::Message;
use crate::config::Config;
use crate::identity::Keypair;

/// The composed transport stack owned by a node.
///
/// Emits [TransportEvent::Ready] exactly once, when the stack first starts,
/// and a [TransportEvent::Error] for every send failure or dropped datagram.
#[derive(Debug)]
pub struct Pipeline {
    transport: Box<dyn Transport>,
    events: Sender<TransportEvent>,
    ready: bool,
}

impl Pipeline {
    /// Wrap an already composed stack.
    pub fn new(transport: Box<dyn Transport>, events: Sender<TransportEvent>) -> Self {
        Pipeline {
            transport,
            events,
            ready: false,
        }
    }

    /// Compose `udp -> reachability -> telemetry` as enabled in `config`,
    /// then register the authentication hook last.
    pub fn compose(
        config: &Config,
        keypair: Keypair,
        telemetry: Option<Telemetry>,
        events: Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let bind = (config.address.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("could not resolve {}", config.address),
                )
            })?;

        let mut transport: Box<dyn Transport> = Box::new(UdpTransport::new(bind));
        let mut layers = vec!["udp"];

        if config.reachability.enabled {
            let mapper = StaticMapping(config.reachability.public_address);
            transport = Box::new(ReachabilityTransport::new(transport, Box::new(mapper)));
            layers.push("reachability");
        }

        if let Some(telemetry) = telemetry {
            transport = Box::new(TelemetryTransport::new(
                transport,
                telemetry,
                config.request_timeout(),
            ));
            layers.push("telemetry");
        }

        transport.hooks_mut().register(Box::new(AuthHook::new(keypair)));

        debug!(?layers, "Composed transport");

        Ok(Pipeline::new(transport, events))
    }

    /// Start the stack. Returns the local address.
    pub fn start(&mut self) -> Result<SocketAddr, TransportError> {
        let local_addr = self.transport.start()?;

        if !self.ready {
            self.ready = true;
            let _ = self.events.send(TransportEvent::Ready(local_addr));
        }

        Ok(local_addr)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn public_address(&self) -> Option<SocketAddr> {
        self.transport.public_address()
    }

    /// Send a message, reporting failures as events. Returns `true` if sent.
    pub fn send(&mut self, to: SocketAddr, message: Message) -> bool {
        match self.transport.send(to, message) {
            Ok(()) => true,
            Err(error) => {
                let _ = self.events.send(TransportEvent::Error(error));
                false
            }
        }
    }

    /// Receive a single authenticated message, if any.
    pub fn recv(&mut self) -> Option<(Message, SocketAddr)> {
        match self.transport.recv()? {
            Ok(received) => Some(received),
            Err(error) => {
                let _ = self.events.send(TransportEvent::Error(error));
                None
            }
        }
    }
}
