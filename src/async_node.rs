//! AsyncDhtNode node.

use crate::common::{Contact, Id};
use crate::node::{ActorMessage, DhtNode, Info, NodeState};
use crate::{Error, Result};

impl DhtNode {
    /// Return an async version of the node handle.
    pub fn as_async(self) -> AsyncDhtNode {
        AsyncDhtNode(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of [DhtNode].
pub struct AsyncDhtNode(DhtNode);

impl AsyncDhtNode {
    // === Getters ===

    pub fn contact(&self) -> &Contact {
        self.0.contact()
    }

    /// Information about the node's identity, addresses and routing table.
    pub async fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv_async().await.map_err(|_| Error::NodeWasShutdown)
    }

    pub async fn state(&self) -> Result<NodeState> {
        let (sender, receiver) = flume::bounded::<NodeState>(1);

        self.send(ActorMessage::State(sender))?;

        receiver.recv_async().await.map_err(|_| Error::NodeWasShutdown)
    }

    // === Public Methods ===

    /// Stop the control plane and the actor thread loop.
    pub async fn shutdown(&self) {
        self.0.stop_control_plane();

        let (sender, receiver) = flume::bounded::<()>(1);

        if self.send(ActorMessage::Shutdown(sender)).is_ok() {
            let _ = receiver.recv_async().await;
        }
    }

    /// Wait until every seed connection settled.
    pub async fn wait_joined(&self) -> Result<()> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.send(ActorMessage::WaitJoined(sender))?;

        receiver.recv_async().await.map_err(|_| Error::NodeWasShutdown)
    }

    pub async fn get_peers(&self, key: Id, limit: usize) -> Result<Vec<Contact>> {
        let (sender, receiver) = flume::bounded::<Result<Vec<Contact>>>(1);

        self.send(ActorMessage::GetPeers { key, limit, sender })?;

        receiver
            .recv_async()
            .await
            .map_err(|_| Error::NodeWasShutdown)?
    }

    pub async fn get_item(&self, key: &str) -> Result<Vec<u8>> {
        let (sender, receiver) = flume::bounded::<Result<Vec<u8>>>(1);

        self.send(ActorMessage::GetItem(Id::hash(key.as_bytes()), sender))?;

        receiver
            .recv_async()
            .await
            .map_err(|_| Error::NodeWasShutdown)?
    }

    pub async fn put_item(&self, key: &str, value: &[u8]) -> Result<()> {
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::PutItem(
            Id::hash(key.as_bytes()),
            value.to_vec(),
            sender,
        ))?;

        receiver
            .recv_async()
            .await
            .map_err(|_| Error::NodeWasShutdown)?
    }

    // === Private Methods ===

    fn send(&self, message: ActorMessage) -> Result<()> {
        self.0.send(message)
    }
}

#[cfg(test)]
mod test {
    use futures::executor;

    use super::*;
    use crate::config::PartialConfig;

    #[test]
    fn put_get() {
        async fn test() {
            let node = DhtNode::builder()
                .config(PartialConfig::default().with_port(0).with_logger(0))
                .without_control_plane()
                .build()
                .unwrap()
                .as_async();

            node.wait_joined().await.unwrap();
            node.put_item("k", b"v").await.unwrap();

            assert_eq!(node.get_item("k").await.unwrap(), b"v".to_vec());
            assert_eq!(node.state().await.unwrap(), NodeState::Joined);

            node.shutdown().await;
        }

        executor::block_on(test());
    }

    #[cfg(unix)]
    #[test]
    fn shutdown_closes_the_control_plane() {
        async fn test(ipc: std::path::PathBuf) {
            let node = DhtNode::builder()
                .config(
                    PartialConfig::default()
                        .with_port(0)
                        .with_logger(0)
                        .with_ipc(&ipc),
                )
                .build()
                .unwrap()
                .as_async();

            assert!(ipc.exists());

            node.shutdown().await;

            assert!(!ipc.exists());
            assert!(crate::control::ControlClient::connect(&ipc).is_err());
            assert!(matches!(node.info().await, Err(Error::NodeWasShutdown)));
        }

        let dir = tempfile::tempdir().unwrap();
        executor::block_on(test(dir.path().join("node.sock")));
    }
}
