use tracing::{debug, trace};

use super::socket::RpcSocket;
use crate::common::{Body, Contact, ErrorSpecific, Id};

#[derive(Debug)]
/// Once a lookup for the target is done, stores the value at the closest
/// responders, keeping track of acknowledging nodes and errors.
pub struct StoreQuery {
    target: Id,
    value: Vec<u8>,
    /// Nodes that confirmed success
    stored_at: u8,
    /// Whether the value was also stored locally.
    stored_locally: bool,
    started: bool,
    inflight_requests: Vec<u32>,
    errors: Vec<(u8, ErrorSpecific)>,
}

impl StoreQuery {
    pub fn new(target: Id, value: Vec<u8>) -> Self {
        Self {
            target,
            value,
            stored_at: 0,
            stored_locally: false,
            started: false,
            inflight_requests: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Whether [StoreQuery::start] was called, after the lookup for the target.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Send `store` requests to `contacts`.
    ///
    /// With `stored_locally` set, an empty `contacts` is a success.
    pub fn start(
        &mut self,
        socket: &mut RpcSocket,
        contacts: &[Contact],
        stored_locally: bool,
    ) -> Result<(), PutError> {
        trace!(target = ?self.target, "StoreQuery start");

        self.started = true;
        self.stored_locally = stored_locally;

        if contacts.is_empty() && !stored_locally {
            return Err(PutError::NoClosestNodes);
        }

        for address in contacts.iter().filter_map(|contact| contact.peer_addr()) {
            let tid = socket.request(
                address,
                Body::Store {
                    target: self.target,
                    value: self.value.clone(),
                },
            );

            self.inflight_requests.push(tid);
        }

        Ok(())
    }

    pub fn inflight(&self, tid: u32) -> bool {
        self.inflight_requests.contains(&tid)
    }

    pub fn success(&mut self) {
        debug!(target = ?self.target, "StoreQuery got success response");
        self.stored_at = self.stored_at.saturating_add(1)
    }

    pub fn error(&mut self, error: ErrorSpecific) {
        debug!(target = ?self.target, ?error, "StoreQuery got error");

        if let Some(pos) = self
            .errors
            .iter()
            .position(|(_, err)| error.code == err.code)
        {
            // Increment the count of the existing error
            self.errors[pos].0 = self.errors[pos].0.saturating_add(1);

            // Move the updated element to maintain the order (highest count first)
            let mut i = pos;
            while i > 0 && self.errors[i].0 > self.errors[i - 1].0 {
                self.errors.swap(i, i - 1);
                i -= 1;
            }
        } else {
            // Add the new error with a count of 1
            self.errors.push((1, error));
        }
    }

    /// Returns `Ok(true)` once every request got a response or timed out, and
    /// at least one node (local included) stored the value.
    pub fn tick(&self, socket: &RpcSocket) -> Result<bool, PutError> {
        if self.inflight_requests.iter().any(|tid| socket.inflight(tid)) {
            return Ok(false);
        }

        let target = self.target;

        if self.stored_at == 0 && !self.stored_locally {
            let most_common_error = self.errors.first();

            debug!(
                ?target,
                ?most_common_error,
                nodes_count = self.inflight_requests.len(),
                "StoreQuery failed"
            );

            return Err(most_common_error
                .map(|(_, error)| PutError::ErrorResponse(error.clone()))
                .unwrap_or(PutError::Timeout));
        }

        debug!(
            ?target,
            stored_at = self.stored_at,
            stored_locally = self.stored_locally,
            "StoreQuery done successfully"
        );

        Ok(true)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Store query errors
pub enum PutError {
    /// Failed to find any nodes close to the target, and we are not one of them.
    #[error("Failed to find any nodes close to store value at")]
    NoClosestNodes,

    /// No node stored the value; contains the most common error response.
    #[error("Store rejected: {} {}", .0.code, .0.description)]
    ErrorResponse(ErrorSpecific),

    /// StoreQuery timed out with no responses neither success or errors
    #[error("StoreQuery timed out with no responses neither success or errors")]
    Timeout,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn most_common_error_first() {
        let mut query = StoreQuery::new(Id::random(), b"v".to_vec());

        let validator = ErrorSpecific {
            code: 203,
            description: "Rejected by validator".to_string(),
        };
        let too_big = ErrorSpecific {
            code: 205,
            description: "Message (v field) too big.".to_string(),
        };

        query.error(too_big.clone());
        query.error(validator.clone());
        query.error(validator.clone());

        assert_eq!(query.errors.first(), Some(&(2, validator)));
        assert_eq!(query.errors.get(1), Some(&(1, too_big)));
    }
}
