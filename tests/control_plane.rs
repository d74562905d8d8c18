//! The control plane over a real unix socket.
#![cfg(unix)]

use std::path::Path;
use std::thread;
use std::time::Duration;

use dhtnode::control::{ControlApi, ControlClient, ControlInfo, ControlServer};
use dhtnode::{Contact, DhtNode, ErrorKind, PartialConfig, Result};

fn node(ipc: &Path) -> DhtNode {
    DhtNode::builder()
        .config(
            PartialConfig::default()
                .with_port(0)
                .with_logger(0)
                .with_ipc(ipc),
        )
        .build()
        .unwrap()
}

#[test]
fn restart_over_stale_socket() {
    let dir = tempfile::tempdir().unwrap();
    let ipc = dir.path().join("dhtnode.sock");

    // Left over by an unclean shutdown.
    std::fs::write(&ipc, b"").unwrap();

    let node = node(&ipc);

    let mut client = ControlClient::connect(&ipc).unwrap();
    assert_eq!(
        client.get_info().unwrap(),
        ControlInfo {
            version: env!("CARGO_PKG_VERSION").to_string()
        }
    );

    node.shutdown();
    assert!(!ipc.exists());
}

#[test]
fn datadir_node_over_stale_socket() {
    let dir = tempfile::tempdir().unwrap();
    let ipc = dir.path().join("dhtnode.sock");
    let overrides = PartialConfig::default()
        .with_port(0)
        .with_logger(0)
        .with_ipc(&ipc);

    let first = DhtNode::builder()
        .datadir(dir.path().join("node"))
        .config(overrides.clone())
        .build()
        .unwrap();

    first.shutdown();
    assert!(!ipc.exists());

    // Left over by a crash.
    std::fs::write(&ipc, b"").unwrap();

    let second = DhtNode::builder()
        .datadir(dir.path().join("node"))
        .config(overrides)
        .build()
        .unwrap();

    assert_eq!(second.contact().fingerprint, first.contact().fingerprint);

    let mut client = ControlClient::connect(&ipc).unwrap();
    assert!(client.get_info().is_ok());

    second.shutdown();
}

#[test]
fn put_get_peers() {
    let dir = tempfile::tempdir().unwrap();
    let ipc = dir.path().join("dhtnode.sock");
    let node = node(&ipc);
    node.wait_joined().unwrap();

    let mut client = ControlClient::connect(&ipc).unwrap();

    client.put_item("k", "v").unwrap();
    assert_eq!(client.get_item("k").unwrap(), "v");

    let error = client.get_item("missing").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ValueNotFound);

    let error = client.get_peers("somewhere", 20).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RoutingUnavailable);

    let own_id = node.contact().fingerprint.to_string();
    assert_eq!(client.get_peers(&own_id, 20).unwrap(), vec![]);

    node.shutdown();
}

#[derive(Clone)]
/// `get_item` blocks until released.
struct SlowItems {
    release: flume::Receiver<()>,
}

impl ControlApi for SlowItems {
    fn get_info(&self) -> ControlInfo {
        ControlInfo {
            version: "slow".into(),
        }
    }

    fn get_peers(&self, _key: &str, _limit: usize) -> Result<Vec<Contact>> {
        Ok(vec![])
    }

    fn get_item(&self, _key: &str) -> Result<Vec<u8>> {
        let _ = self.release.recv();
        Ok(b"late".to_vec())
    }

    fn put_item(&self, _key: &str, _value: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[test]
fn slow_get_item_does_not_block_get_info() {
    let dir = tempfile::tempdir().unwrap();
    let ipc = dir.path().join("slow.sock");

    let (release, receiver) = flume::bounded::<()>(1);
    let server = ControlServer::bind(&ipc, SlowItems { release: receiver }, "slow").unwrap();

    let slow = {
        let ipc = ipc.clone();
        thread::spawn(move || ControlClient::connect(&ipc).unwrap().get_item("k").unwrap())
    };

    // Let the slow session start waiting.
    thread::sleep(Duration::from_millis(100));

    let mut client = ControlClient::connect(&ipc).unwrap();
    assert_eq!(client.get_info().unwrap().version, "slow");
    assert!(!slow.is_finished());

    release.send(()).unwrap();
    assert_eq!(slow.join().unwrap(), "late");

    server.shutdown();
}
