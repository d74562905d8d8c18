//! Local network simulation: a chain of ephemeral nodes on loopback.

use std::time::Duration;

use flume::Receiver;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use dhtnode::{DhtNode, Keypair, PartialConfig};

/// Start at the highest port and count down for each node.
const FIRST_PORT: u16 = 65535;

const WORDS: &[&str] = &[
    "bypass", "compress", "parse", "index", "override", "synthesize", "navigate", "hack",
    "primary", "virtual", "neural", "optical", "redundant", "digital", "wireless", "auxiliary",
    "bus", "circuit", "firewall", "protocol", "matrix", "array", "driver", "sensor",
];

pub fn run(count: u16, interrupted: Receiver<()>) -> dhtnode::Result<()> {
    let mut nodes: Vec<DhtNode> = Vec::new();
    let mut seeds = vec![];

    for i in 0..count {
        let port = FIRST_PORT - i;

        let node = DhtNode::builder()
            .keypair(Keypair::random())
            .config(
                PartialConfig::default()
                    .with_address("127.0.0.1")
                    .with_port(port)
                    .with_logger(3)
                    .with_log_label(format!("DHTNode{i}"))
                    .with_ipc(std::env::temp_dir().join(format!("dhtnode{i}.sock")))
                    .with_seeds(seeds),
            )
            .build()?;

        seeds = vec![node.contact().clone()];
        nodes.push(node);
    }

    // Throttle stores with the number of nodes, they all share this machine.
    let interval = Duration::from_secs(u64::from(count.max(1)));

    let Some(first) = nodes.first() else {
        return Ok(());
    };

    while let Err(flume::RecvTimeoutError::Timeout) = interrupted.recv_timeout(interval) {
        let key = random_key();
        let value = random_phrase();

        if let Err(error) = first.put_item(&key, value.as_bytes()) {
            warn!(%key, %error, "Simulation put failed");
            continue;
        }

        match first.get_item(&key) {
            Ok(value) => info!("got phrase: {}", String::from_utf8_lossy(&value)),
            Err(error) => warn!(%key, %error, "Simulation get failed"),
        }
    }

    for node in &nodes {
        node.shutdown();
    }

    Ok(())
}

fn random_key() -> String {
    hex::encode(rand::thread_rng().gen::<[u8; 16]>())
}

fn random_phrase() -> String {
    let mut rng = rand::thread_rng();

    WORDS
        .choose_multiple(&mut rng, 5)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
