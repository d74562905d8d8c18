//! Telemetry decorator: per-peer link quality from request/response timing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Hooks, Transport, TransportError};
use crate::common::Message;

const MAX_TRACKED_PEERS: usize = 1000;
/// Weight of the newest round trip sample, in percent.
const RTT_SMOOTHING: u64 = 20;
/// Confidence in a peer we know nothing about.
pub const UNKNOWN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Link quality samples of a single peer address.
pub struct LinkQuality {
    /// Smoothed round trip time in microseconds.
    pub rtt_us: u64,
    pub successes: u32,
    pub failures: u32,
}

impl LinkQuality {
    fn record_success(&mut self, rtt: Duration) {
        let sample = rtt.as_micros().min(u64::MAX as u128);

        // Widened, the stored average may come from a hand-edited file.
        let smoothed = if self.successes == 0 {
            sample
        } else {
            (self.rtt_us as u128 * (100 - RTT_SMOOTHING) as u128
                + sample * RTT_SMOOTHING as u128)
                / 100
        };
        self.rtt_us = smoothed.min(u64::MAX as u128) as u64;
        self.successes = self.successes.saturating_add(1);
    }

    fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Estimated probability that the next request gets answered.
    pub fn confidence(&self) -> f64 {
        (self.successes as f64 + 1.0) / (self.successes as f64 + self.failures as f64 + 2.0)
    }

    pub fn rtt(&self) -> Option<Duration> {
        (self.successes > 0).then(|| Duration::from_micros(self.rtt_us))
    }
}

#[derive(Serialize, Deserialize)]
struct Sample {
    address: String,
    quality: LinkQuality,
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    samples: Vec<Sample>,
}

#[derive(Debug, Clone)]
/// Shared handle to the link quality table.
///
/// The transport decorator writes it, the routing facade reads it. Both live
/// on the node's actor thread.
pub struct Telemetry(Rc<RefCell<LruCache<SocketAddr, LinkQuality>>>);

impl Default for Telemetry {
    fn default() -> Self {
        let capacity = NonZeroUsize::new(MAX_TRACKED_PEERS).unwrap_or(NonZeroUsize::MIN);

        Telemetry(Rc::new(RefCell::new(LruCache::new(capacity))))
    }
}

impl Telemetry {
    pub fn record_success(&self, address: SocketAddr, rtt: Duration) {
        self.0
            .borrow_mut()
            .get_or_insert_mut(address, LinkQuality::default)
            .record_success(rtt);
    }

    pub fn record_failure(&self, address: SocketAddr) {
        self.0
            .borrow_mut()
            .get_or_insert_mut(address, LinkQuality::default)
            .record_failure();
    }

    pub fn quality(&self, address: &SocketAddr) -> Option<LinkQuality> {
        self.0.borrow().peek(address).copied()
    }

    /// [LinkQuality::confidence] or [UNKNOWN_CONFIDENCE].
    pub fn confidence(&self, address: &SocketAddr) -> f64 {
        self.quality(address)
            .map(|quality| quality.confidence())
            .unwrap_or(UNKNOWN_CONFIDENCE)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load samples persisted by [Self::save]. A missing or unreadable file
    /// starts an empty table.
    pub fn load(path: &Path) -> Telemetry {
        let telemetry = Telemetry::default();

        let snapshot = match std::fs::read(path) {
            Ok(bytes) => match serde_bencode::from_bytes::<Snapshot>(&bytes) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    debug!(?path, ?error, "Ignoring unreadable telemetry");
                    return telemetry;
                }
            },
            Err(_) => return telemetry,
        };

        {
            let mut table = telemetry.0.borrow_mut();
            for sample in snapshot.samples {
                if let Ok(address) = sample.address.parse() {
                    table.put(address, sample.quality);
                }
            }
        }

        telemetry
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let snapshot = Snapshot {
            samples: self
                .0
                .borrow()
                .iter()
                // Least recently used first, so reloading keeps the recency order.
                .rev()
                .map(|(address, quality)| Sample {
                    address: address.to_string(),
                    quality: *quality,
                })
                .collect(),
        };

        let bytes = serde_bencode::to_bytes(&snapshot).map_err(std::io::Error::other)?;

        std::fs::write(path, bytes)
    }
}

/// Wraps a transport, timing every request until its response, or until
/// `request_timeout` counts it as a failure.
#[derive(Debug)]
pub struct TelemetryTransport<T> {
    inner: T,
    telemetry: Telemetry,
    pending: HashMap<(SocketAddr, u32), Instant>,
    request_timeout: Duration,
}

impl<T: Transport> TelemetryTransport<T> {
    pub fn new(inner: T, telemetry: Telemetry, request_timeout: Duration) -> Self {
        TelemetryTransport {
            inner,
            telemetry,
            pending: HashMap::new(),
            request_timeout,
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn expire(&mut self) {
        let timeout = self.request_timeout;
        let telemetry = &self.telemetry;

        self.pending.retain(|(address, _), sent_at| {
            let alive = sent_at.elapsed() < timeout;
            if !alive {
                telemetry.record_failure(*address);
            }
            alive
        });
    }
}

impl<T: Transport> Transport for TelemetryTransport<T> {
    fn start(&mut self) -> Result<SocketAddr, TransportError> {
        self.inner.start()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn send(&mut self, to: SocketAddr, message: Message) -> Result<(), TransportError> {
        let key = (to, message.transaction_id);
        let is_request = message.body.is_request();

        let result = self.inner.send(to, message);

        match &result {
            Ok(()) if is_request => {
                self.pending.insert(key, Instant::now());
            }
            Err(_) => self.telemetry.record_failure(to),
            _ => {}
        }

        result
    }

    fn recv(&mut self) -> Option<Result<(Message, SocketAddr), TransportError>> {
        self.expire();

        let received = self.inner.recv()?;

        if let Ok((message, from)) = &received {
            if message.body.is_response() {
                if let Some(sent_at) = self.pending.remove(&(*from, message.transaction_id)) {
                    self.telemetry.record_success(*from, sent_at.elapsed());
                }
            }
        }

        Some(received)
    }

    fn hooks_mut(&mut self) -> &mut Hooks {
        self.inner.hooks_mut()
    }

    fn public_address(&self) -> Option<SocketAddr> {
        self.inner.public_address()
    }
}
