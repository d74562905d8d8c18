use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use flume::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::bootstrap::Bootstrap;
use super::lifecycle::{Lifecycle, NodeState};
use crate::common::{Contact, Id, RoutingTable};
use crate::config::Config;
use crate::engine::{Engine, EngineReport, Storage, Validator};
use crate::identity::Keypair;
use crate::router::TelemetryRouter;
use crate::transport::{Pipeline, Telemetry, TransportEvent};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Information about a running node.
pub struct Info {
    pub id: Id,
    pub contact: Contact,
    pub local_addr: Option<SocketAddr>,
    /// Our address as the rest of the network sees it, if known.
    pub public_address: Option<SocketAddr>,
    pub state: NodeState,
    pub routing_table_size: usize,
}

/// Everything the actor needs, sent to its thread before the transport exists.
#[derive(Debug)]
pub(crate) struct ActorSetup {
    pub config: Config,
    pub keypair: Keypair,
    pub storage: Box<dyn Storage>,
    pub validator: Box<dyn Validator>,
    /// Where to load and save link quality samples, if anywhere.
    pub telemetry_path: Option<PathBuf>,
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    State(Sender<NodeState>),
    WaitJoined(Sender<()>),
    GetPeers {
        key: Id,
        limit: usize,
        sender: Sender<Result<Vec<Contact>>>,
    },
    GetItem(Id, Sender<Result<Vec<u8>>>),
    PutItem(Id, Vec<u8>, Sender<Result<()>>),
    Shutdown(Sender<()>),
}

/// Receiving end of the actor's mailbox.
///
/// Handles keep a clone, so a message that races the actor's exit is still
/// dropped by whichever side notices the closed flag last, and its waiter
/// gets [Error::NodeWasShutdown] instead of waiting forever.
#[derive(Debug, Clone)]
pub(crate) struct Inbox {
    receiver: Receiver<ActorMessage>,
    closed: Arc<AtomicBool>,
}

impl Inbox {
    pub fn new(receiver: Receiver<ActorMessage>) -> Self {
        Inbox {
            receiver,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse further messages and drop the queued ones, with their reply senders.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let dropped = self.receiver.drain().count();
        if dropped > 0 {
            debug!(dropped, "Dropped messages sent during shutdown");
        }
    }
}

type Pending<T> = HashMap<Id, Vec<(Sender<Result<T>>, Instant)>>;

/// Owns the engine and the lifecycle; runs on its own thread.
#[derive(Debug)]
pub(crate) struct Actor {
    config: Config,
    contact: Contact,
    engine: Engine,
    telemetry: Option<Telemetry>,
    telemetry_path: Option<PathBuf>,

    lifecycle: Lifecycle,
    bootstrap: Option<Bootstrap>,

    inbox: Inbox,
    events: Receiver<TransportEvent>,

    get_senders: Pending<Vec<u8>>,
    put_senders: Pending<()>,
    joined_senders: Vec<Sender<()>>,
}

impl Actor {
    /// Compose and start the transport. Fails if the socket can't be bound.
    pub fn new(setup: ActorSetup, inbox: Inbox) -> Result<Self> {
        let ActorSetup {
            config,
            keypair,
            storage,
            validator,
            telemetry_path,
        } = setup;

        let mut lifecycle = Lifecycle::new();

        let telemetry = config.telemetry.enabled.then(|| {
            telemetry_path
                .as_deref()
                .map(Telemetry::load)
                .unwrap_or_default()
        });

        let (events_sender, events) = flume::unbounded();

        let mut pipeline =
            Pipeline::compose(&config, keypair.clone(), telemetry.clone(), events_sender)?;

        lifecycle.advance(NodeState::TransportStarting);
        let local_addr = pipeline.start()?;

        info!(?local_addr, id = %keypair.fingerprint(), "DHT node listening");

        let router = TelemetryRouter::new(
            RoutingTable::new(keypair.fingerprint()),
            telemetry.clone(),
        );

        let engine = Engine::new(
            pipeline,
            router,
            storage,
            validator,
            config.request_timeout(),
        );

        // Port 0 binds a random port; advertise the bound one.
        let port = match config.port {
            0 => local_addr.port(),
            port => port,
        };

        Ok(Actor {
            contact: keypair.contact(config.address.clone(), port),
            config,
            engine,
            telemetry,
            telemetry_path,

            lifecycle,
            bootstrap: None,

            inbox,
            events,

            get_senders: HashMap::new(),
            put_senders: HashMap::new(),
            joined_senders: Vec::new(),
        })
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    /// Loop until shutdown, or until every handle is dropped.
    pub fn run(mut self) {
        let shutdown_sender = loop {
            match self.inbox.receiver.try_recv() {
                Ok(ActorMessage::Shutdown(sender)) => break Some(sender),
                Ok(message) => self.handle_message(message),
                Err(TryRecvError::Disconnected) => {
                    debug!("Node handles were all dropped, shutting down");
                    break None;
                }
                Err(TryRecvError::Empty) => {}
            }

            self.drain_transport_events();

            let report = self.engine.tick();
            self.handle_report(report);

            self.expire_operations();
        };

        self.inbox.close();
        self.save_telemetry();

        info!("DHT node shutdown");

        // Release the socket and fail pending waiters before acknowledging.
        drop(self);

        if let Some(sender) = shutdown_sender {
            let _ = sender.send(());
        }
    }

    // === Private Methods ===

    fn info(&self) -> Info {
        Info {
            id: *self.engine.id(),
            contact: self.contact.clone(),
            local_addr: self.engine.local_addr(),
            public_address: self.engine.public_address(),
            state: self.lifecycle.state(),
            routing_table_size: self.engine.router().table().size(),
        }
    }

    fn handle_message(&mut self, message: ActorMessage) {
        let deadline = Instant::now() + self.config.operation_timeout();

        match message {
            ActorMessage::Info(sender) => {
                let _ = sender.send(self.info());
            }
            ActorMessage::State(sender) => {
                let _ = sender.send(self.lifecycle.state());
            }
            ActorMessage::WaitJoined(sender) => {
                if self.lifecycle.state() == NodeState::Joined {
                    let _ = sender.send(());
                } else {
                    self.joined_senders.push(sender);
                }
            }
            ActorMessage::GetPeers { key, limit, sender } => {
                let own_id = *self.engine.id();
                let result = self
                    .engine
                    .router()
                    .get_nearest_contacts(&key, limit, Some(&own_id));

                let _ = sender.send(result);
            }
            ActorMessage::GetItem(target, sender) => match self.engine.get(target) {
                Some(value) => {
                    let _ = sender.send(Ok(value));
                }
                None => self
                    .get_senders
                    .entry(target)
                    .or_default()
                    .push((sender, deadline)),
            },
            ActorMessage::PutItem(target, value, sender) => {
                match self.engine.put(target, value) {
                    Ok(()) => self
                        .put_senders
                        .entry(target)
                        .or_default()
                        .push((sender, deadline)),
                    Err(error) => {
                        let _ = sender.send(Err(error));
                    }
                }
            }
            // Handled by the run loop.
            ActorMessage::Shutdown(_) => {}
        }
    }

    fn drain_transport_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                TransportEvent::Ready(local_addr) => {
                    if self.lifecycle.advance(NodeState::TransportReady) {
                        debug!(?local_addr, "Transport ready");
                        self.enter_network();
                    }
                }
                TransportEvent::Error(error) => {
                    warn!(%error, "Transport error");
                }
            }
        }
    }

    fn enter_network(&mut self) {
        self.lifecycle.advance(NodeState::JoiningNetwork);

        let bootstrap = Bootstrap::begin(&self.config.seeds, &mut self.engine);
        self.bootstrap = Some(bootstrap);

        self.maybe_joined();
    }

    fn maybe_joined(&mut self) {
        let Some(bootstrap) = &self.bootstrap else {
            return;
        };

        if !bootstrap.is_done() || !self.lifecycle.advance(NodeState::Joined) {
            return;
        }

        let report = bootstrap.report();
        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            "Joined the network"
        );

        for sender in self.joined_senders.drain(..) {
            let _ = sender.send(());
        }
    }

    fn handle_report(&mut self, report: EngineReport) {
        if !report.connects.is_empty() {
            if let Some(bootstrap) = &mut self.bootstrap {
                for (seed, result) in report.connects {
                    bootstrap.settle(seed, result);
                }
            }

            self.maybe_joined();
        }

        for (target, value) in report.gets {
            if let Some(senders) = self.get_senders.remove(&target) {
                let result = value.ok_or(Error::ValueNotFound(target));

                for (sender, _) in senders {
                    let _ = sender.send(clone_result(&result));
                }
            }
        }

        for (target, result) in report.puts {
            if let Some(senders) = self.put_senders.remove(&target) {
                let result = result.map_err(Error::from);

                for (sender, _) in senders {
                    let _ = sender.send(clone_result(&result));
                }
            }
        }
    }

    /// Fail operations past their deadline with [Error::RequestTimeout].
    fn expire_operations(&mut self) {
        let now = Instant::now();

        expire(&mut self.get_senders, now);
        expire(&mut self.put_senders, now);
    }

    fn save_telemetry(&self) {
        let (Some(telemetry), Some(path)) = (&self.telemetry, &self.telemetry_path) else {
            return;
        };

        match telemetry.save(path) {
            Ok(()) => debug!(?path, samples = telemetry.len(), "Saved telemetry"),
            Err(error) => warn!(?path, %error, "Could not save telemetry"),
        }
    }
}

fn expire<T>(pending: &mut Pending<T>, now: Instant) {
    pending.retain(|target, senders| {
        senders.retain(|(sender, deadline)| {
            if now < *deadline {
                return true;
            }

            debug!(?target, "Operation timed out");
            let _ = sender.send(Err(Error::RequestTimeout));

            false
        });

        !senders.is_empty()
    });
}

/// Fan out one result to many waiters. [Error] isn't Clone, so errors are
/// rebuilt from their kind and message.
fn clone_result<T: Clone>(result: &Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value.clone()),
        Err(Error::ValueNotFound(target)) => Err(Error::ValueNotFound(*target)),
        Err(Error::RoutingUnavailable) => Err(Error::RoutingUnavailable),
        Err(Error::Rejected { code, description }) => Err(Error::Rejected {
            code: *code,
            description: description.clone(),
        }),
        Err(Error::PeerUnreachable(reason)) => Err(Error::PeerUnreachable(reason.clone())),
        Err(error) => Err(Error::Control {
            kind: error.kind(),
            message: error.to_string(),
        }),
    }
}
