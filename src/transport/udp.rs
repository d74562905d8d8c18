//! Base UDP transport: owns the socket, the wire codec and the hook registry.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::trace;

use super::{Hooks, Transport, TransportError};
use crate::common::Message;

/// Maximum datagram size, sent or received.
pub const MTU: usize = 2048;

/// The maximum duration to backoff checking the [UdpSocket] buffer after it is empty.
/// Lower values increases CPU usage, but reduces latency.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct UdpTransport {
    bind: SocketAddr,
    socket: Option<UdpSocket>,
    hooks: Hooks,
}

impl UdpTransport {
    /// A transport that binds `bind` once started. Port `0` picks a free port.
    pub fn new(bind: SocketAddr) -> Self {
        UdpTransport {
            bind,
            socket: None,
            hooks: Hooks::default(),
        }
    }

    fn socket(&self) -> Result<&UdpSocket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::NotStarted)
    }
}

impl Transport for UdpTransport {
    fn start(&mut self) -> Result<SocketAddr, TransportError> {
        if let Some(socket) = &self.socket {
            return Ok(socket.local_addr()?);
        }

        let socket = UdpSocket::bind(self.bind)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;
        self.socket = Some(socket);

        Ok(local_addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    fn send(&mut self, to: SocketAddr, mut message: Message) -> Result<(), TransportError> {
        self.socket()?;

        self.hooks
            .before_serialize(&mut message, to)
            .map_err(TransportError::OutgoingRejected)?;

        let mut frame = message.to_bytes()?;

        self.hooks
            .before_send(&mut frame, to)
            .map_err(TransportError::OutgoingRejected)?;

        if frame.len() > MTU {
            return Err(TransportError::TooLarge(frame.len()));
        }

        self.socket()?.send_to(&frame, to)?;
        trace!(context = "socket_message_sending", ?message, ?to);

        Ok(())
    }

    fn recv(&mut self) -> Option<Result<(Message, SocketAddr), TransportError>> {
        let mut buf = [0u8; MTU];

        let socket = match self.socket() {
            Ok(socket) => socket,
            Err(error) => return Some(Err(error)),
        };

        let (amt, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(MAX_THREAD_BLOCK_DURATION);
                return None;
            }
            Err(error) => return Some(Err(error.into())),
        };

        if from.port() == 0 {
            trace!(context = "socket_validation", "Datagram from port 0");
            return None;
        }

        let bytes = &buf[..amt];

        let mut message = match Message::from_bytes(bytes) {
            Ok(message) => message,
            Err(error) => {
                trace!(
                    context = "socket_error",
                    message = ?String::from_utf8_lossy(bytes),
                    "Received invalid Bencode message."
                );

                return Some(Err(TransportError::Malformed {
                    from,
                    reason: error.to_string(),
                }));
            }
        };

        if let Err(rejection) = self.hooks.before_receive(&mut message, from) {
            return Some(Err(TransportError::Rejected { from, rejection }));
        }

        trace!(context = "socket_message_receiving", ?message, ?from);

        Some(Ok((message, from)))
    }

    fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    fn public_address(&self) -> Option<SocketAddr> {
        None
    }
}

/// Poll `transport` until it yields something, or `attempts` run out.
#[cfg(test)]
pub(crate) fn recv_blocking<T: Transport>(
    transport: &mut T,
    attempts: usize,
) -> Option<Result<(Message, SocketAddr), TransportError>> {
    (0..attempts).find_map(|_| transport.recv())
}
