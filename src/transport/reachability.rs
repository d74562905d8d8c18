//! Reachability decorator: external port mapping and public address discovery.

use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Hooks, Transport, TransportError};
use crate::common::Message;

const MIN_VOTES: u8 = 3;
const MAX_VOTES: u8 = 20;
/// Votes lose weight over time so a moved node eventually learns its new address.
const DECAY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Negotiates an externally reachable mapping for a local socket.
pub trait PortMapper: Debug {
    /// `Ok(None)` when there is nothing to negotiate.
    fn map_port(&mut self, local: SocketAddr) -> std::io::Result<Option<SocketAddr>>;
}

#[derive(Debug, Clone, Default)]
/// A mapping configured out of band, e.g. a router's port forward.
pub struct StaticMapping(pub Option<SocketAddr>);

impl PortMapper for StaticMapping {
    fn map_port(&mut self, local: SocketAddr) -> std::io::Result<Option<SocketAddr>> {
        match self.0 {
            Some(public) if public.port() == 0 => {
                Ok(Some(SocketAddr::new(public.ip(), local.port())))
            }
            other => Ok(other),
        }
    }
}

#[derive(Clone, Debug)]
struct Vote {
    address: SocketAddr,
    votes: u8,
}

/// Public address consensus, from the addresses responding nodes saw us at.
#[derive(Debug)]
pub struct AddressConsensus {
    votes: Vec<Vote>,
    last_decay: Instant,
}

impl Default for AddressConsensus {
    fn default() -> Self {
        Self {
            votes: Vec::new(),
            last_decay: Instant::now(),
        }
    }
}

impl AddressConsensus {
    pub fn best(&self) -> Option<SocketAddr> {
        self.votes
            .first()
            .filter(|vote| vote.votes >= MIN_VOTES)
            .map(|vote| vote.address)
    }

    pub fn add_vote(&mut self, proposed: SocketAddr) {
        match self.votes.iter_mut().find(|vote| vote.address == proposed) {
            Some(vote) => {
                vote.votes = std::cmp::min(MAX_VOTES, vote.votes + 1);
                // Stable sort, ties keep the incumbent.
                self.votes.sort_by(|a, b| b.votes.cmp(&a.votes));
            }
            None => self.votes.push(Vote {
                address: proposed,
                votes: 1,
            }),
        }
    }

    pub fn decay(&mut self) {
        for vote in self.votes.iter_mut() {
            vote.votes = vote.votes.saturating_sub(1);
        }

        self.votes.retain(|vote| vote.votes > 0);
        self.last_decay = Instant::now();
    }

    fn maybe_decay(&mut self) {
        if self.last_decay.elapsed() > DECAY_INTERVAL {
            self.decay()
        }
    }
}

/// Wraps a transport with port-mapping negotiation at start, and tells
/// requesters the address their requests came from.
#[derive(Debug)]
pub struct ReachabilityTransport<T> {
    inner: T,
    mapper: Box<dyn PortMapper>,
    mapped: Option<SocketAddr>,
    consensus: AddressConsensus,
}

impl<T: Transport> ReachabilityTransport<T> {
    pub fn new(inner: T, mapper: Box<dyn PortMapper>) -> Self {
        ReachabilityTransport {
            inner,
            mapper,
            mapped: None,
            consensus: AddressConsensus::default(),
        }
    }

    /// Address negotiated with the [PortMapper], if any.
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        self.mapped
    }
}

impl<T: Transport> Transport for ReachabilityTransport<T> {
    fn start(&mut self) -> Result<SocketAddr, TransportError> {
        let local_addr = self.inner.start()?;

        match self.mapper.map_port(local_addr) {
            Ok(Some(public)) => {
                info!(?local_addr, ?public, "Port mapping negotiated");
                self.mapped = Some(public);
            }
            Ok(None) => debug!(?local_addr, "Port mapping skipped"),
            Err(error) => {
                // Not fatal, the public address can still be learned from peers.
                warn!(?local_addr, ?error, "Port mapping negotiation failed");
            }
        }

        Ok(local_addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn send(&mut self, to: SocketAddr, mut message: Message) -> Result<(), TransportError> {
        if message.body.is_response() {
            message.observed_address = Some(to.to_string());
        }

        self.inner.send(to, message)
    }

    fn recv(&mut self) -> Option<Result<(Message, SocketAddr), TransportError>> {
        self.consensus.maybe_decay();

        let received = self.inner.recv()?;

        if let Ok((message, _)) = &received {
            if let Some(observed) = message
                .observed_address
                .as_deref()
                .and_then(|address| address.parse::<SocketAddr>().ok())
            {
                self.consensus.add_vote(observed);
            }
        }

        Some(received)
    }

    fn hooks_mut(&mut self) -> &mut Hooks {
        self.inner.hooks_mut()
    }

    fn public_address(&self) -> Option<SocketAddr> {
        self.mapped
            .or_else(|| self.consensus.best())
            .or_else(|| self.inner.public_address())
    }
}
