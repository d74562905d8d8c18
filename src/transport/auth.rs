//! Message authentication hook.

use std::net::SocketAddr;

use super::{Hook, Rejection};
use crate::common::{Id, Message};
use crate::identity::{verify, Keypair};

const NAME: &str = "auth";

/// Signs every outbound message with the node's key, and drops every inbound
/// message that is unsigned, signed by a key that does not hash to the
/// claimed sender, or whose signature does not verify.
#[derive(Debug)]
pub struct AuthHook {
    keypair: Keypair,
    fingerprint: Id,
}

impl AuthHook {
    pub fn new(keypair: Keypair) -> Self {
        let fingerprint = keypair.fingerprint();

        AuthHook {
            keypair,
            fingerprint,
        }
    }
}

impl Hook for AuthHook {
    fn name(&self) -> &'static str {
        NAME
    }

    fn before_serialize(&mut self, message: &mut Message, _to: SocketAddr) -> Result<(), Rejection> {
        message.sender = self.fingerprint;
        message.public_key = Some(self.keypair.public_key());
        message.signature = None;

        let signable = message
            .signable_bytes()
            .map_err(|error| Rejection::new(NAME, error.to_string()))?;

        message.signature = Some(self.keypair.sign(&signable));

        Ok(())
    }

    fn before_receive(&mut self, message: &mut Message, _from: SocketAddr) -> Result<(), Rejection> {
        let (Some(public_key), Some(signature)) = (message.public_key, message.signature) else {
            return Err(Rejection::new(NAME, "unsigned message"));
        };

        if Id::from_public_key(&public_key) != message.sender {
            return Err(Rejection::new(NAME, "public key does not match the sender"));
        }

        let signable = message
            .signable_bytes()
            .map_err(|error| Rejection::new(NAME, error.to_string()))?;

        if !verify(&public_key, &signable, &signature) {
            return Err(Rejection::new(NAME, "invalid signature"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Body;

    fn address() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 1))
    }

    fn signed(keypair: &Keypair, body: Body) -> Message {
        let mut message = Message::new(3, Id::random(), body);
        AuthHook::new(keypair.clone())
            .before_serialize(&mut message, address())
            .unwrap();
        message
    }

    #[test]
    fn signed_message_verifies_after_the_wire() {
        let keypair = Keypair::random();
        let message = signed(
            &keypair,
            Body::Store {
                target: Id::hash(b"k"),
                value: b"v".to_vec(),
            },
        );

        assert_eq!(message.sender, keypair.fingerprint());

        let mut decoded = Message::from_bytes(&message.to_bytes().unwrap()).unwrap();

        AuthHook::new(Keypair::random())
            .before_receive(&mut decoded, address())
            .unwrap();
    }

    #[test]
    fn unsigned_is_rejected() {
        let mut message = Message::new(3, Id::random(), Body::Ping);

        let rejection = AuthHook::new(Keypair::random())
            .before_receive(&mut message, address())
            .unwrap_err();

        assert_eq!(rejection.reason, "unsigned message");
    }

    #[test]
    fn impersonation_is_rejected() {
        let mut message = signed(&Keypair::random(), Body::Ping);
        message.sender = Id::random();

        assert!(AuthHook::new(Keypair::random())
            .before_receive(&mut message, address())
            .is_err());
    }

    #[test]
    fn tampering_is_rejected() {
        let mut message = signed(
            &Keypair::random(),
            Body::Value {
                value: b"original".to_vec(),
            },
        );
        message.body = Body::Value {
            value: b"tampered".to_vec(),
        };

        let rejection = AuthHook::new(Keypair::random())
            .before_receive(&mut message, address())
            .unwrap_err();

        assert_eq!(rejection.reason, "invalid signature");
    }

    #[test]
    fn any_single_bit_flip_is_dropped() {
        let message = signed(
            &Keypair::random(),
            Body::Value {
                value: b"payload".to_vec(),
            },
        );
        let frame = message.to_bytes().unwrap();

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;

                // Either the frame no longer decodes, or the hook refuses it.
                if let Ok(mut decoded) = Message::from_bytes(&corrupted) {
                    assert!(
                        AuthHook::new(Keypair::random())
                            .before_receive(&mut decoded, address())
                            .is_err(),
                        "accepted a flip at byte {byte} bit {bit}"
                    );
                }
            }
        }
    }
}
