//! Nodes talking to each other over loopback UDP.

use std::net::UdpSocket;

use dhtnode::{Contact, DhtNode, Error, Id, NodeState, PartialConfig};

fn node(seeds: Vec<Contact>) -> DhtNode {
    DhtNode::builder()
        .config(
            PartialConfig::default()
                .with_port(0)
                .with_logger(0)
                .with_request_timeout(300)
                .with_seeds(seeds),
        )
        .without_control_plane()
        .build()
        .unwrap()
}

/// A bound socket nobody answers on.
fn silent_seed() -> (UdpSocket, Contact) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let contact = Contact::from_socket_addr(socket.local_addr().unwrap(), Id::random());

    (socket, contact)
}

#[test]
fn first_node_joins_alone() {
    let a = node(vec![]);

    a.wait_joined().unwrap();

    assert_eq!(a.state().unwrap(), NodeState::Joined);
    a.shutdown();
}

#[test]
fn put_on_seeded_node_get_on_seed() {
    let a = node(vec![]);
    let b = node(vec![a.contact().clone()]);

    b.wait_joined().unwrap();
    assert_eq!(b.info().unwrap().routing_table_size, 1);

    b.put_item("k", b"v").unwrap();

    assert_eq!(a.get_item("k").unwrap(), b"v".to_vec());

    b.shutdown();
    a.shutdown();
}

#[test]
fn get_through_the_network() {
    let a = node(vec![]);
    let b = node(vec![a.contact().clone()]);
    let c = node(vec![a.contact().clone()]);

    b.wait_joined().unwrap();
    c.wait_joined().unwrap();

    b.put_item("shared", b"value").unwrap();

    assert_eq!(c.get_item("shared").unwrap(), b"value".to_vec());
    assert!(matches!(
        c.get_item("missing"),
        Err(Error::ValueNotFound(_))
    ));

    for node in [a, b, c] {
        node.shutdown();
    }
}

#[test]
fn unreachable_seeds_still_join() {
    let a = node(vec![]);

    let (_first, first) = silent_seed();
    let (_second, second) = silent_seed();

    let b = node(vec![first, a.contact().clone(), second]);

    b.wait_joined().unwrap();

    assert_eq!(b.state().unwrap(), NodeState::Joined);

    let peers = b.get_peers(Id::random(), 20).unwrap();
    assert_eq!(peers, vec![a.contact().clone()]);

    b.shutdown();
    a.shutdown();
}

#[test]
fn all_seeds_unreachable() {
    let (_socket, seed) = silent_seed();
    let a = node(vec![seed]);

    a.wait_joined().unwrap();

    assert!(matches!(
        a.get_peers(Id::random(), 20),
        Err(Error::RoutingUnavailable)
    ));

    // Still serving.
    a.put_item("k", b"v").unwrap();
    assert_eq!(a.get_item("k").unwrap(), b"v".to_vec());

    a.shutdown();
}

#[test]
fn peers_ordered_by_distance() {
    let a = node(vec![]);
    let others: Vec<DhtNode> = (0..4).map(|_| node(vec![a.contact().clone()])).collect();

    for other in &others {
        other.wait_joined().unwrap();
    }

    let key = Id::random();
    let peers = a.get_peers(key, 3).unwrap();

    assert_eq!(peers.len(), 3);

    let distances: Vec<u8> = peers.iter().map(|c| key.distance(&c.fingerprint)).collect();
    let mut sorted = distances.clone();
    sorted.sort();
    assert_eq!(distances, sorted);

    for node in others {
        node.shutdown();
    }
    a.shutdown();
}
