//! Request/response correlation over the transport pipeline.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::{Body, ErrorSpecific, Id, Message};
use crate::transport::Pipeline;

#[derive(Debug, Clone)]
struct InflightRequest {
    to: SocketAddr,
    sent_at: Instant,
}

impl InflightRequest {
    // Same as SocketAddr::eq but ignores the ip if it is unspecified.
    fn does_match(&self, from: &SocketAddr) -> bool {
        if self.to.port() != from.port() {
            return false;
        }

        self.to.ip().is_unspecified() || self.to.ip() == from.ip()
    }
}

/// Formats and correlates engine requests and responses.
#[derive(Debug)]
pub struct RpcSocket {
    id: Id,
    next_tid: u32,
    pipeline: Pipeline,
    request_timeout: Duration,
    inflight_requests: HashMap<u32, InflightRequest>,
}

impl RpcSocket {
    pub fn new(id: Id, pipeline: Pipeline, request_timeout: Duration) -> Self {
        RpcSocket {
            id,
            next_tid: 0,
            pipeline,
            request_timeout,
            inflight_requests: HashMap::new(),
        }
    }

    // === Getters ===

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.pipeline.local_addr()
    }

    pub fn public_address(&self) -> Option<SocketAddr> {
        self.pipeline.public_address()
    }

    // === Public Methods ===

    /// Returns true if this transaction_id is still inflight and not expired.
    pub fn inflight(&self, transaction_id: &u32) -> bool {
        self.inflight_requests
            .get(transaction_id)
            .map(|request| request.sent_at.elapsed() < self.request_timeout)
            .unwrap_or(false)
    }

    /// Send a request to the given address and return the transaction_id
    pub fn request(&mut self, address: SocketAddr, body: Body) -> u32 {
        let tid = self.tid();

        self.inflight_requests.insert(
            tid,
            InflightRequest {
                to: address,
                sent_at: Instant::now(),
            },
        );

        if !self.pipeline.send(address, Message::new(tid, self.id, body)) {
            debug!(?address, tid, "Error sending request message");
        }

        tid
    }

    /// Send a response to the given address.
    pub fn response(&mut self, address: SocketAddr, transaction_id: u32, body: Body) {
        if !self
            .pipeline
            .send(address, Message::new(transaction_id, self.id, body))
        {
            debug!(?address, transaction_id, "Error sending response message");
        }
    }

    /// Send an error to the given address.
    pub fn error(&mut self, address: SocketAddr, transaction_id: u32, error: ErrorSpecific) {
        self.response(address, transaction_id, Body::Error(error))
    }

    /// Receives a single message, dropping responses nobody is waiting for.
    pub fn recv_from(&mut self) -> Option<(Message, SocketAddr)> {
        self.cleanup();

        let (message, from) = self.pipeline.recv()?;

        if message.body.is_response() && !self.is_expected_response(&message, &from) {
            return None;
        }

        Some((message, from))
    }

    // === Private Methods ===

    fn is_expected_response(&mut self, message: &Message, from: &SocketAddr) -> bool {
        match self.inflight_requests.get(&message.transaction_id) {
            Some(request) if request.does_match(from) => {
                self.inflight_requests.remove(&message.transaction_id);
                true
            }
            Some(_) => {
                trace!(context = "socket_validation", "Response from wrong address");
                false
            }
            None => {
                trace!(context = "socket_validation", "Unexpected response id");
                false
            }
        }
    }

    /// Increments self.next_tid and returns the previous value.
    fn tid(&mut self) -> u32 {
        // Ids are not reused before wrapping around, far longer than any
        // request stays inflight.
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        tid
    }

    fn cleanup(&mut self) {
        let timeout = self.request_timeout;
        self.inflight_requests
            .retain(|_, request| request.sent_at.elapsed() < timeout);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Config, PartialConfig};
    use crate::identity::Keypair;

    fn socket(request_timeout: Duration) -> (RpcSocket, Id) {
        let keypair = Keypair::random();
        let id = keypair.fingerprint();
        let config = Config::resolve([PartialConfig::default().with_port(0)]);

        let (tx, _rx) = flume::unbounded();
        let mut pipeline = Pipeline::compose(&config, keypair, None, tx).unwrap();
        pipeline.start().unwrap();

        (RpcSocket::new(id, pipeline, request_timeout), id)
    }

    fn recv(socket: &mut RpcSocket) -> Option<(Message, SocketAddr)> {
        (0..100).find_map(|_| socket.recv_from())
    }

    #[test]
    fn tid() {
        let (mut socket, _) = socket(Duration::from_secs(2));

        assert_eq!(socket.tid(), 0);
        assert_eq!(socket.tid(), 1);

        socket.next_tid = u32::MAX;

        assert_eq!(socket.tid(), u32::MAX);
        assert_eq!(socket.tid(), 0);
    }

    #[test]
    fn request_and_response() {
        let (mut client, _) = socket(Duration::from_secs(2));
        let (mut server, server_id) = socket(Duration::from_secs(2));

        let server_addr = server.local_addr().unwrap();
        let tid = client.request(server_addr, Body::Ping);

        assert!(client.inflight(&tid));

        let (request, from) = recv(&mut server).unwrap();
        assert_eq!(request.body, Body::Ping);

        server.response(from, request.transaction_id, Body::Pong);

        let (response, _) = recv(&mut client).unwrap();
        assert_eq!(response.body, Body::Pong);
        assert_eq!(response.sender, server_id);
        assert!(!client.inflight(&tid));
    }

    #[test]
    fn unexpected_response_is_dropped() {
        let (mut client, _) = socket(Duration::from_secs(2));
        let (mut server, _) = socket(Duration::from_secs(2));

        server.response(client.local_addr().unwrap(), 42, Body::Pong);

        assert!(recv(&mut client).is_none());
    }

    #[test]
    fn requests_expire() {
        let (mut client, _) = socket(Duration::from_millis(1));

        let tid = client.request(SocketAddr::from(([127, 0, 0, 1], 9)), Body::Ping);
        std::thread::sleep(Duration::from_millis(5));

        assert!(!client.inflight(&tid));
    }
}
