//! Iterative lookups and their corresponding request/response.

use std::collections::HashSet;
use std::net::SocketAddr;

use tracing::{debug, trace};

use super::socket::RpcSocket;
use crate::common::{Body, ClosestContacts, Contact, Id, MAX_BUCKET_SIZE_K};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    FindNode,
    FindValue,
}

/// An iterative process of concurrently sending a request to the closest known contacts to
/// the target, learning closer contacts from the responses, and repeating this process until
/// no closer contacts (that aren't already queried) are found, or a value is found.
#[derive(Debug)]
pub struct Lookup {
    target: Id,
    kind: LookupKind,
    closest: ClosestContacts,
    responders: ClosestContacts,
    inflight_requests: Vec<u32>,
    visited: HashSet<SocketAddr>,
    value: Option<Vec<u8>>,
}

impl Lookup {
    pub fn new(target: Id, kind: LookupKind) -> Self {
        trace!(?target, ?kind, "New lookup");

        Lookup {
            target,
            kind,
            closest: ClosestContacts::new(target),
            responders: ClosestContacts::new(target),
            inflight_requests: Vec::new(),
            visited: HashSet::new(),
            value: None,
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    /// Closest responding contacts, only final once the lookup is done.
    pub fn responders(&self) -> &ClosestContacts {
        &self.responders
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    // === Public Methods ===

    /// Add a candidate contact to query on next tick if it is among the closest contacts.
    pub fn add_candidate(&mut self, contact: Contact) {
        self.closest.add(contact);
    }

    pub fn add_responder(&mut self, contact: Contact) {
        self.responders.add(contact);
    }

    /// Record a found value, which ends the lookup on the next tick.
    pub fn found(&mut self, value: Vec<u8>) {
        debug!(target = ?self.target, "Lookup found a value");
        self.value.get_or_insert(value);
    }

    /// Return true if a response (by transaction_id) is expected by this lookup.
    pub fn inflight(&self, tid: u32) -> bool {
        self.inflight_requests.contains(&tid)
    }

    /// Query closest contacts for this lookup's target.
    ///
    /// Returns true if it is done.
    pub fn tick(&mut self, socket: &mut RpcSocket) -> bool {
        if self.value.is_some() {
            return true;
        }

        self.visit_closest(socket);

        // If no more requests are inflight in the socket (not timed out),
        // then the lookup is done.
        let done = !self
            .inflight_requests
            .iter()
            .any(|tid| socket.inflight(tid));

        if done {
            debug!(
                target = ?self.target,
                candidates = self.closest.len(),
                visited = self.visited.len(),
                responders = self.responders.len(),
                "Done lookup"
            );
        }

        done
    }

    // === Private Methods ===

    fn visit_closest(&mut self, socket: &mut RpcSocket) {
        let to_visit = self
            .closest
            .contacts()
            .iter()
            .take(MAX_BUCKET_SIZE_K)
            .filter_map(|contact| contact.peer_addr())
            .filter(|address| !self.visited.contains(address))
            .collect::<Vec<_>>();

        for address in to_visit {
            let body = match self.kind {
                LookupKind::FindNode => Body::FindNode {
                    target: self.target,
                },
                LookupKind::FindValue => Body::FindValue {
                    target: self.target,
                },
            };

            let tid = socket.request(address, body);

            self.inflight_requests.push(tid);
            self.visited.insert(address);
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::config::{Config, PartialConfig};
    use crate::identity::Keypair;
    use crate::transport::Pipeline;

    fn socket() -> RpcSocket {
        let keypair = Keypair::random();
        let config = Config::resolve([PartialConfig::default().with_port(0)]);

        let (tx, _rx) = flume::unbounded();
        let mut pipeline = Pipeline::compose(&config, keypair.clone(), None, tx).unwrap();
        pipeline.start().unwrap();

        RpcSocket::new(keypair.fingerprint(), pipeline, Duration::from_secs(2))
    }

    #[test]
    fn hostname_candidates_are_never_visited() {
        let mut socket = socket();
        let mut lookup = Lookup::new(Id::random(), LookupKind::FindNode);

        lookup.add_candidate(Contact::new("peer.invalid", 4000, Id::random()));
        lookup.add_candidate(Contact::new("127.0.0.1", 4001, Id::random()));

        lookup.tick(&mut socket);
        lookup.tick(&mut socket);

        assert_eq!(lookup.inflight_requests.len(), 1);
        assert_eq!(
            lookup.visited,
            HashSet::from([SocketAddr::from(([127, 0, 0, 1], 4001))])
        );
    }
}
