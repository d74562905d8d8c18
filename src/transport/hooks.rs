//! Extension points run by the base transport on every message.

use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddr;

use crate::common::Message;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{hook}: {reason}")]
/// A hook refused a message, which is then dropped.
pub struct Rejection {
    pub hook: &'static str,
    pub reason: String,
}

impl Rejection {
    pub fn new(hook: &'static str, reason: impl Into<String>) -> Self {
        Rejection {
            hook,
            reason: reason.into(),
        }
    }
}

/// Callbacks at the three named extension points of a transport.
///
/// Every method defaults to letting the message through untouched.
pub trait Hook {
    fn name(&self) -> &'static str;

    /// Mutate or annotate an outbound message before it is encoded.
    fn before_serialize(&mut self, _message: &mut Message, _to: SocketAddr) -> Result<(), Rejection> {
        Ok(())
    }

    /// Mutate the encoded frame right before it hits the socket.
    fn before_send(&mut self, _frame: &mut Vec<u8>, _to: SocketAddr) -> Result<(), Rejection> {
        Ok(())
    }

    /// Validate an inbound message before it is handed to the routing layer.
    fn before_receive(&mut self, _message: &mut Message, _from: SocketAddr) -> Result<(), Rejection> {
        Ok(())
    }
}

/// Ordered hook registry.
///
/// Outbound hooks run in registration order and inbound hooks in reverse
/// registration order: the last registered hook is the closest to the wire
/// in both directions. Registering the authentication hook last therefore
/// makes signing the final outbound transformation and verification the
/// first inbound one.
#[derive(Default)]
pub struct Hooks {
    hooks: Vec<Box<dyn Hook>>,
}

impl Hooks {
    pub fn register(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    pub fn before_serialize(&mut self, message: &mut Message, to: SocketAddr) -> Result<(), Rejection> {
        self.hooks
            .iter_mut()
            .try_for_each(|hook| hook.before_serialize(message, to))
    }

    pub fn before_send(&mut self, frame: &mut Vec<u8>, to: SocketAddr) -> Result<(), Rejection> {
        self.hooks
            .iter_mut()
            .try_for_each(|hook| hook.before_send(frame, to))
    }

    pub fn before_receive(&mut self, message: &mut Message, from: SocketAddr) -> Result<(), Rejection> {
        self.hooks
            .iter_mut()
            .rev()
            .try_for_each(|hook| hook.before_receive(message, from))
    }
}

impl Debug for Hooks {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::common::{Body, Id};

    struct Recorder {
        name: &'static str,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Hook for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn before_serialize(&mut self, _: &mut Message, _: SocketAddr) -> Result<(), Rejection> {
            self.calls.borrow_mut().push(format!("out:{}", self.name));
            Ok(())
        }

        fn before_receive(&mut self, _: &mut Message, _: SocketAddr) -> Result<(), Rejection> {
            self.calls.borrow_mut().push(format!("in:{}", self.name));
            Ok(())
        }
    }

    #[test]
    fn last_registered_is_closest_to_the_wire() {
        let calls = Rc::new(RefCell::new(vec![]));
        let mut hooks = Hooks::default();

        for name in ["telemetry", "auth"] {
            hooks.register(Box::new(Recorder {
                name,
                calls: calls.clone(),
            }));
        }

        let address = SocketAddr::from(([127, 0, 0, 1], 1));
        let mut message = Message::new(0, Id::random(), Body::Ping);

        hooks.before_serialize(&mut message, address).unwrap();
        hooks.before_receive(&mut message, address).unwrap();

        assert_eq!(
            *calls.borrow(),
            vec!["out:telemetry", "out:auth", "in:auth", "in:telemetry"]
        );
    }

    struct Refuse;

    impl Hook for Refuse {
        fn name(&self) -> &'static str {
            "refuse"
        }

        fn before_receive(&mut self, _: &mut Message, _: SocketAddr) -> Result<(), Rejection> {
            Err(Rejection::new("refuse", "no"))
        }
    }

    #[test]
    fn rejection_stops_the_chain() {
        let calls = Rc::new(RefCell::new(vec![]));
        let mut hooks = Hooks::default();

        hooks.register(Box::new(Recorder {
            name: "inner",
            calls: calls.clone(),
        }));
        hooks.register(Box::new(Refuse));

        let address = SocketAddr::from(([127, 0, 0, 1], 1));
        let mut message = Message::new(0, Id::random(), Body::Ping);

        let rejection = hooks.before_receive(&mut message, address).unwrap_err();

        assert_eq!(rejection.hook, "refuse");
        assert!(calls.borrow().is_empty());
    }
}
