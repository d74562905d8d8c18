//! Dht node.
//!
//! A [DhtNode] is a cheap, cloneable handle to an actor thread owning the
//! transport pipeline, the routing facade and the engine. Build one with
//! [DhtNode::builder].

mod actor;
mod bootstrap;
mod lifecycle;

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread;

#[cfg(unix)]
use std::sync::OnceLock;

use flume::Sender;
use tracing::info_span;

use crate::common::{Contact, Id};
use crate::config::{Config, PartialConfig};
use crate::engine::{AcceptAll, FsStore, MemStore, Storage, Validator};
use crate::identity::{IdentityStore, Keypair};
use crate::{Error, Result};

pub(crate) use actor::ActorMessage;
use actor::{Actor, ActorSetup, Inbox};

pub use actor::Info;
pub use bootstrap::{Bootstrap, BootstrapReport, SeedConnector};
pub use lifecycle::{Lifecycle, NodeState};

#[cfg(unix)]
use crate::control::ControlServer;

#[derive(Debug, Clone)]
/// Handle to a running DHT node.
///
/// The node stops on [Self::shutdown], or once every handle is dropped.
pub struct DhtNode(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    sender: Sender<ActorMessage>,
    inbox: Inbox,
    contact: Contact,
    config: Config,
    #[cfg(unix)]
    control: OnceLock<ControlServer>,
}

impl Inner {
    fn stop_control_plane(&self) {
        #[cfg(unix)]
        if let Some(control) = self.control.get() {
            control.shutdown();
        }
    }
}

/// The actor stops on its own once the last sender is dropped.
impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_control_plane();
    }
}

#[derive(Debug, Clone)]
/// A [DhtNode] handle that doesn't keep the node running.
pub(crate) struct WeakDhtNode(Weak<Inner>);

impl WeakDhtNode {
    pub fn upgrade(&self) -> Result<DhtNode> {
        self.0.upgrade().map(DhtNode).ok_or(Error::NodeWasShutdown)
    }
}

impl DhtNode {
    /// Returns a builder to configure and start a node.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    /// Start a node from the data directory at `datadir`, creating it if needed.
    pub fn start(datadir: impl Into<PathBuf>) -> Result<Self> {
        DhtNode::builder().datadir(datadir).build()
    }

    /// Crate version, as answered by the control plane's `getinfo`.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    // === Getters ===

    /// This node's contact, with the bound port.
    pub fn contact(&self) -> &Contact {
        &self.0.contact
    }

    /// The resolved configuration, immutable for the node's lifetime.
    pub fn config(&self) -> &Config {
        &self.0.config
    }

    /// Information about the node's identity, addresses and routing table.
    pub fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)
    }

    pub fn state(&self) -> Result<NodeState> {
        let (sender, receiver) = flume::bounded::<NodeState>(1);

        self.send(ActorMessage::State(sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)
    }

    // === Public Methods ===

    /// Block until every seed connection settled and the node is [NodeState::Joined].
    pub fn wait_joined(&self) -> Result<()> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.send(ActorMessage::WaitJoined(sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)
    }

    /// Known contacts nearest to `key`, excluding ourselves. See
    /// [TelemetryRouter::get_nearest_contacts](crate::TelemetryRouter::get_nearest_contacts).
    pub fn get_peers(&self, key: Id, limit: usize) -> Result<Vec<Contact>> {
        let (sender, receiver) = flume::bounded::<Result<Vec<Contact>>>(1);

        self.send(ActorMessage::GetPeers { key, limit, sender })?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)?
    }

    /// Get the value stored under `target`, locally or from the network.
    pub fn get(&self, target: Id) -> Result<Vec<u8>> {
        let (sender, receiver) = flume::bounded::<Result<Vec<u8>>>(1);

        self.send(ActorMessage::GetItem(target, sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)?
    }

    /// Store `value` under `target` at the closest nodes.
    pub fn put(&self, target: Id, value: &[u8]) -> Result<()> {
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::PutItem(target, value.to_vec(), sender))?;

        receiver.recv().map_err(|_| Error::NodeWasShutdown)?
    }

    /// Same as [Self::get], with the SHA-1 of `key` as target.
    pub fn get_item(&self, key: &str) -> Result<Vec<u8>> {
        self.get(Id::hash(key.as_bytes()))
    }

    /// Same as [Self::put], with the SHA-1 of `key` as target.
    pub fn put_item(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put(Id::hash(key.as_bytes()), value)
    }

    /// Stop the control plane and the actor thread, saving telemetry.
    ///
    /// Blocks until the actor is done. Calling it more than once is harmless.
    pub fn shutdown(&self) {
        self.stop_control_plane();

        let (sender, receiver) = flume::bounded::<()>(1);

        if self.send(ActorMessage::Shutdown(sender)).is_ok() {
            let _ = receiver.recv();
        }
    }

    // === Crate Methods ===

    pub(crate) fn downgrade(&self) -> WeakDhtNode {
        WeakDhtNode(Arc::downgrade(&self.0))
    }

    pub(crate) fn stop_control_plane(&self) {
        self.0.stop_control_plane();
    }

    /// Queue a message for the actor. Fails once the actor stopped.
    pub(crate) fn send(&self, message: ActorMessage) -> Result<()> {
        let inbox = &self.0.inbox;

        if inbox.is_closed() {
            return Err(Error::NodeWasShutdown);
        }

        self.0
            .sender
            .send(message)
            .map_err(|_| Error::NodeWasShutdown)?;

        // The actor may have closed its inbox after the check above; drop
        // what it left behind so the waiter doesn't hang.
        if inbox.is_closed() {
            inbox.close();
        }

        Ok(())
    }
}

#[derive(Debug)]
/// Configures and starts a [DhtNode].
pub struct NodeBuilder {
    datadir: Option<PathBuf>,
    keypair: Option<Keypair>,
    overrides: PartialConfig,
    validator: Box<dyn Validator>,
    control_plane: bool,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        NodeBuilder {
            datadir: None,
            keypair: None,
            overrides: PartialConfig::default(),
            validator: Box::new(AcceptAll),
            control_plane: true,
        }
    }
}

impl NodeBuilder {
    /// Persistent node: identity, `config.json` and values live in `datadir`.
    pub fn datadir(mut self, datadir: impl Into<PathBuf>) -> Self {
        self.datadir = Some(datadir.into());
        self
    }

    /// Identity of an ephemeral node. Ignored when a [Self::datadir] is set.
    pub fn keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// In-memory configuration layer, winning over `config.json`.
    pub fn config(mut self, overrides: PartialConfig) -> Self {
        self.overrides = overrides;
        self
    }

    /// Policy for values pushed by remote nodes, accepting everything by default.
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Don't expose the control plane on `config.ipc`.
    pub fn without_control_plane(mut self) -> Self {
        self.control_plane = false;
        self
    }

    /// Load or create the identity, then start the actor thread and the control plane.
    ///
    /// Fails on identity, configuration or storage errors, or if the socket can't be bound.
    pub fn build(self) -> Result<DhtNode> {
        let (keypair, config, storage, telemetry_path) =
            match &self.datadir {
                Some(datadir) => {
                    let store = IdentityStore::new(datadir);
                    let (keypair, config) = store.load_or_create_with(self.overrides)?;

                    let data_path = store.data_path();
                    let storage = FsStore::open(&data_path)
                        .map_err(|error| Error::storage(data_path, error))?;

                    (
                        keypair,
                        config,
                        Box::new(storage) as Box<dyn Storage>,
                        Some(store.telemetry_path()),
                    )
                }
                None => (
                    self.keypair.unwrap_or_else(Keypair::random),
                    Config::resolve([self.overrides]),
                    Box::new(MemStore::default()) as Box<dyn Storage>,
                    None,
                ),
            };

        let setup = ActorSetup {
            config: config.clone(),
            keypair,
            storage,
            validator: self.validator,
            telemetry_path,
        };

        let (sender, receiver) = flume::unbounded();
        let inbox = Inbox::new(receiver);
        let (started_sender, started_receiver) = flume::bounded::<Result<Contact>>(1);

        let label = config.log_label.clone();

        {
            let inbox = inbox.clone();

            thread::Builder::new()
                .name(format!("{label} actor"))
                .spawn(move || {
                    let span = info_span!("node", label = %label);
                    let _entered = span.enter();

                    match Actor::new(setup, inbox) {
                        Ok(actor) => {
                            let _ = started_sender.send(Ok(actor.contact().clone()));
                            actor.run();
                        }
                        Err(error) => {
                            let _ = started_sender.send(Err(error));
                        }
                    }
                })?;
        }

        let contact = started_receiver
            .recv()
            .map_err(|_| Error::NodeWasShutdown)??;

        let node = DhtNode(Arc::new(Inner {
            sender,
            inbox,
            contact,
            config,
            #[cfg(unix)]
            control: OnceLock::new(),
        }));

        #[cfg(unix)]
        if self.control_plane {
            let config = node.config();

            match ControlServer::bind(&config.ipc, node.downgrade(), &config.log_label) {
                Ok(server) => {
                    let _ = node.0.control.set(server);
                }
                Err(error) => {
                    node.shutdown();
                    return Err(error);
                }
            }
        }

        Ok(node)
    }
}
