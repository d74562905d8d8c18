//! Kademlia engine: lookups, stores and request handling over the transport pipeline.
//!
//! The node drives an [Engine] from its actor thread by calling
//! [Engine::tick] in a loop; operations started with [Engine::connect],
//! [Engine::get] and [Engine::put] complete in a later [EngineReport].

mod maintenance;
mod put_query;
mod query;
mod socket;
mod storage;
mod validator;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::common::{Body, Contact, ErrorSpecific, Id, Message, MAX_BUCKET_SIZE_K};
use crate::router::TelemetryRouter;
use crate::transport::Pipeline;
use crate::{Error, Result};

use maintenance::RoutingMaintenance;
use query::{Lookup, LookupKind};

pub use put_query::{PutError, StoreQuery};
pub use socket::RpcSocket;
pub use storage::{FsStore, MemStore, Storage, MAX_VALUES};
pub use validator::{AcceptAll, Validator, ValidatorFn};

/// Largest value accepted by `put` and by inbound `store` requests.
pub const MAX_VALUE_SIZE: usize = 1000;

/// Results from a single [Engine::tick] call.
#[derive(Debug, Default)]
pub struct EngineReport {
    /// Settled connect attempts.
    pub connects: Vec<(Contact, Result<()>)>,
    /// Done value lookups, `None` if no node had the value.
    pub gets: Vec<(Id, Option<Vec<u8>>)>,
    /// Done store queries.
    pub puts: Vec<(Id, Result<(), PutError>)>,
}

#[derive(Debug)]
pub struct Engine {
    socket: RpcSocket,
    router: TelemetryRouter,
    storage: Box<dyn Storage>,
    validator: Box<dyn Validator>,
    maintenance: RoutingMaintenance,

    node_lookups: HashMap<Id, Lookup>,
    value_lookups: HashMap<Id, Lookup>,
    /// Store queries wait for the node lookup of their target before starting.
    store_queries: HashMap<Id, StoreQuery>,
    /// Pings to seeds, by transaction id.
    connects: HashMap<u32, Contact>,
    /// Connect attempts that failed before sending anything.
    failed_connects: Vec<(Contact, Result<()>)>,
}

impl Engine {
    pub fn new(
        pipeline: Pipeline,
        router: TelemetryRouter,
        storage: Box<dyn Storage>,
        validator: Box<dyn Validator>,
        request_timeout: Duration,
    ) -> Self {
        let id = *router.id();

        Engine {
            socket: RpcSocket::new(id, pipeline, request_timeout),
            router,
            storage,
            validator,
            maintenance: RoutingMaintenance::new(),

            node_lookups: HashMap::new(),
            value_lookups: HashMap::new(),
            store_queries: HashMap::new(),
            connects: HashMap::new(),
            failed_connects: Vec::new(),
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        self.router.id()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn public_address(&self) -> Option<SocketAddr> {
        self.socket.public_address()
    }

    pub fn router(&self) -> &TelemetryRouter {
        &self.router
    }

    // === Public Methods ===

    /// Ping a seed; once it answers with the expected fingerprint, it joins the
    /// routing table and we look ourselves up through it.
    ///
    /// Settles in [EngineReport::connects].
    pub fn connect(&mut self, seed: Contact) {
        let Some(address) = seed.socket_addr() else {
            let reason = format!("could not resolve {}:{}", seed.address, seed.port);
            self.failed_connects
                .push((seed, Err(Error::PeerUnreachable(reason))));
            return;
        };

        debug!(?seed, "Connecting to seed");

        let tid = self.socket.request(address, Body::Ping);
        self.connects.insert(tid, seed);
    }

    /// Start a value lookup for `target`, unless the value is stored locally.
    ///
    /// Settles in [EngineReport::gets] if this returns `None`.
    pub fn get(&mut self, target: Id) -> Option<Vec<u8>> {
        match self.storage.get(&target) {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(error) => warn!(?target, ?error, "Could not read local storage"),
        }

        if !self.value_lookups.contains_key(&target) {
            let lookup = self.new_lookup(target, LookupKind::FindValue);
            self.value_lookups.insert(target, lookup);
        }

        None
    }

    /// Store `value` at the nodes closest to `target`, and locally if we are one of them.
    ///
    /// Settles in [EngineReport::puts].
    pub fn put(&mut self, target: Id, value: Vec<u8>) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(value.len()));
        }

        // Last write wins for concurrent puts of the same target.
        self.store_queries
            .insert(target, StoreQuery::new(target, value));

        self.find_node(target);

        Ok(())
    }

    /// Advances maintenance and inflight operations by one step, handling at
    /// most one incoming message.
    pub fn tick(&mut self) -> EngineReport {
        let mut report = EngineReport {
            connects: std::mem::take(&mut self.failed_connects),
            ..Default::default()
        };

        self.tick_store_queries(&mut report);
        self.tick_lookups(&mut report);
        self.expire_connects(&mut report);

        self.periodic_node_maintenance();

        if let Some((message, from)) = self.socket.recv_from() {
            self.handle_message(message, from, &mut report);
        }

        report
    }

    // === Private Methods ===

    fn new_lookup(&self, target: Id, kind: LookupKind) -> Lookup {
        let mut lookup = Lookup::new(target, kind);

        for contact in self.router.table().closest(&target) {
            lookup.add_candidate(contact);
        }

        lookup
    }

    fn find_node(&mut self, target: Id) {
        if !self.node_lookups.contains_key(&target) {
            let lookup = self.new_lookup(target, LookupKind::FindNode);
            self.node_lookups.insert(target, lookup);
        }
    }

    /// Look ourselves up, to fill the routing table with our neighbours.
    fn populate(&mut self) {
        if self.router.table().is_empty() {
            return;
        }

        let id = *self.id();

        if !self.node_lookups.contains_key(&id) {
            debug!(?id, "Populating the routing table");
        }

        self.find_node(id);
    }

    fn tick_store_queries(&mut self, report: &mut EngineReport) {
        let socket = &self.socket;

        self.store_queries.retain(|target, query| {
            // Not started yet, waiting for a lookup.
            if !query.is_started() {
                return true;
            }

            match query.tick(socket) {
                Ok(false) => true,
                Ok(true) => {
                    report.puts.push((*target, Ok(())));
                    false
                }
                Err(error) => {
                    report.puts.push((*target, Err(error)));
                    false
                }
            }
        });
    }

    fn tick_lookups(&mut self, report: &mut EngineReport) {
        let mut done_node_lookups = Vec::new();

        for (target, lookup) in self.node_lookups.iter_mut() {
            if lookup.tick(&mut self.socket) {
                done_node_lookups.push(*target);
            }
        }

        for target in done_node_lookups {
            if let Some(lookup) = self.node_lookups.remove(&target) {
                self.node_lookup_done(lookup, report);
            }
        }

        let mut done_value_lookups = Vec::new();

        for (target, lookup) in self.value_lookups.iter_mut() {
            if lookup.tick(&mut self.socket) {
                done_value_lookups.push(*target);
            }
        }

        for target in done_value_lookups {
            if let Some(lookup) = self.value_lookups.remove(&target) {
                report
                    .gets
                    .push((target, lookup.value().map(|value| value.to_vec())));
            }
        }
    }

    fn node_lookup_done(&mut self, lookup: Lookup, report: &mut EngineReport) {
        let target = lookup.target();

        if target == *self.id() {
            let table_size = self.router.table().size();

            if table_size == 0 {
                error!("Could not populate the routing table");
            } else {
                info!(table_size, "Populated the routing table");
            }
        }

        let Some(query) = self.store_queries.get_mut(&target) else {
            return;
        };

        let closest = lookup.responders().take(MAX_BUCKET_SIZE_K);

        // We are among the closest if we know fewer than K nodes closer than us.
        let own_distance = self.router.id().xor(&target);
        let closer = closest
            .iter()
            .filter(|contact| contact.fingerprint.xor(&target) < own_distance)
            .count();

        let stored_locally = if closer < MAX_BUCKET_SIZE_K {
            match self.storage.put(&target, query.value()) {
                Ok(()) => true,
                Err(error) => {
                    warn!(?target, ?error, "Could not store value locally");
                    false
                }
            }
        } else {
            false
        };

        if let Err(error) = query.start(&mut self.socket, &closest, stored_locally) {
            self.store_queries.remove(&target);
            report.puts.push((target, Err(error)));
        }
    }

    fn expire_connects(&mut self, report: &mut EngineReport) {
        let socket = &self.socket;
        let mut expired = Vec::new();

        self.connects.retain(|tid, seed| {
            let alive = socket.inflight(tid);
            if !alive {
                expired.push(seed.clone());
            }
            alive
        });

        for seed in expired {
            let reason = format!("{}:{} did not answer", seed.address, seed.port);
            report.connects.push((seed, Err(Error::PeerUnreachable(reason))));
        }
    }

    fn periodic_node_maintenance(&mut self) {
        let decisions = self.maintenance.decisions(self.router.table());

        for id in &decisions.nodes_to_purge {
            self.router.table_mut().remove(id);
        }

        for address in &decisions.nodes_to_ping {
            self.socket.request(*address, Body::Ping);
        }

        if !decisions.nodes_to_purge.is_empty() || !decisions.nodes_to_ping.is_empty() {
            debug!(
                removed = decisions.nodes_to_purge.len(),
                pinged = decisions.nodes_to_ping.len(),
                "Node maintenance executed"
            );
        }

        if decisions.should_refresh {
            self.populate();
        }
    }

    fn handle_message(&mut self, message: Message, from: SocketAddr, report: &mut EngineReport) {
        // Messages are authenticated, so any sender is a live node at `from`.
        self.router
            .table_mut()
            .add(Contact::from_socket_addr(from, message.sender), from);

        if message.body.is_request() {
            self.handle_request(from, message);
        } else {
            self.handle_response(from, message, report);
        }
    }

    fn handle_request(&mut self, from: SocketAddr, message: Message) {
        let tid = message.transaction_id;

        match message.body {
            Body::Ping => self.socket.response(from, tid, Body::Pong),
            Body::FindNode { target } => {
                let nodes = self.router.table().closest(&target);
                self.socket.response(from, tid, Body::Nodes { nodes });
            }
            Body::FindValue { target } => {
                let body = match self.storage.get(&target) {
                    Ok(Some(value)) => Body::Value { value },
                    Ok(None) => Body::Nodes {
                        nodes: self.router.table().closest(&target),
                    },
                    Err(error) => {
                        warn!(?target, ?error, "Could not read local storage");
                        Body::Nodes {
                            nodes: self.router.table().closest(&target),
                        }
                    }
                };

                self.socket.response(from, tid, body);
            }
            Body::Store { target, value } => {
                let result = if value.len() > MAX_VALUE_SIZE {
                    Err((205, "Message (v field) too big."))
                } else if !self.validator.validate(&target, &value) {
                    Err((203, "Rejected by validator"))
                } else if let Err(error) = self.storage.put(&target, &value) {
                    warn!(?target, ?error, "Could not store value");
                    Err((202, "Server Error"))
                } else {
                    Ok(())
                };

                match result {
                    Ok(()) => self.socket.response(from, tid, Body::Stored),
                    Err((code, description)) => {
                        debug!(?target, ?from, code, "Refused store request");
                        self.socket.error(
                            from,
                            tid,
                            ErrorSpecific {
                                code,
                                description: description.to_string(),
                            },
                        );
                    }
                }
            }
            _ => self.socket.error(
                from,
                tid,
                ErrorSpecific {
                    code: 204,
                    description: "Method Unknown".to_string(),
                },
            ),
        }
    }

    fn handle_response(&mut self, from: SocketAddr, message: Message, report: &mut EngineReport) {
        let tid = message.transaction_id;

        if let Some(seed) = self.connects.remove(&tid) {
            let result = if message.sender == seed.fingerprint {
                self.populate();
                Ok(())
            } else {
                Err(Error::AuthenticationFailed(format!(
                    "seed at {} answered as {}, expected {}",
                    from, message.sender, seed.fingerprint
                )))
            };

            report.connects.push((seed, result));
            return;
        }

        if let Some(query) = self
            .store_queries
            .values_mut()
            .find(|query| query.inflight(tid))
        {
            match message.body {
                Body::Stored => query.success(),
                Body::Error(error) => query.error(error),
                _ => debug!(?message, "Unexpected response to a store request"),
            }
            return;
        }

        let own_id = *self.id();
        let responder = Contact::from_socket_addr(from, message.sender);

        if let Some(lookup) = self
            .node_lookups
            .values_mut()
            .chain(self.value_lookups.values_mut())
            .find(|lookup| lookup.inflight(tid))
        {
            match message.body {
                Body::Nodes { nodes } => {
                    for contact in nodes {
                        if contact.fingerprint == own_id {
                            continue;
                        }

                        if contact.peer_addr().is_none() {
                            debug!(?contact, ?from, "Ignoring a contact without an ip address");
                            continue;
                        }

                        lookup.add_candidate(contact);
                    }
                    lookup.add_responder(responder);
                }
                Body::Value { value } if value.len() <= MAX_VALUE_SIZE => {
                    lookup.add_responder(responder);
                    lookup.found(value);
                }
                Body::Error(error) => debug!(?error, ?from, "Lookup got an error response"),
                _ => debug!(?message, "Unexpected response to a lookup"),
            }
        }
    }
}
