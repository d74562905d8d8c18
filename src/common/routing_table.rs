//! Simplified Kademlia routing table

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::common::{ClosestContacts, Contact, Id};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

/// A node not heard from in this long is replaced by any newcomer.
pub const STALE_TIME: Duration = Duration::from_secs(15 * 60);
/// A node not heard from in this long gets pinged during maintenance.
const MIN_PING_BACKOFF_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
pub struct RoutingTable {
    id: Id,
    buckets: BTreeMap<u8, KBucket>,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub contact: Contact,
    pub address: SocketAddr,
    pub last_seen: Instant,
}

impl Entry {
    pub fn new(contact: Contact, address: SocketAddr) -> Self {
        Entry {
            contact,
            address,
            last_seen: Instant::now(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > STALE_TIME
    }

    pub fn should_ping(&self) -> bool {
        self.last_seen.elapsed() > MIN_PING_BACKOFF_INTERVAL
    }
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            buckets: BTreeMap::new(),
        }
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    // === Public Methods ===

    /// Attempts to add a contact to this routing table, and return `true` if it did.
    ///
    /// Adding a known fingerprint refreshes its `last_seen` and address.
    pub fn add(&mut self, contact: Contact, address: SocketAddr) -> bool {
        let distance = self.id.distance(contact.id());

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        let bucket = self.buckets.entry(distance).or_default();

        bucket.add(Entry::new(contact, address))
    }

    /// Remove a contact from this routing table.
    pub fn remove(&mut self, id: &Id) {
        let distance = self.id.distance(id);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(id)
        }
    }

    /// Return up to [MAX_BUCKET_SIZE_K] contacts closest to the target.
    pub fn closest(&self, target: &Id) -> Vec<Contact> {
        let mut closest = ClosestContacts::new(*target);

        for entry in self.entries() {
            closest.add(entry.contact.clone());
        }

        closest.take(MAX_BUCKET_SIZE_K)
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of contacts in this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.entries.len())
    }

    /// Returns an iterator over the entries in this routing table, closest buckets first.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.buckets.values().flat_map(|bucket| bucket.entries.iter())
    }

    pub fn get(&self, id: &Id) -> Option<&Entry> {
        self.buckets
            .get(&self.id.distance(id))
            .and_then(|bucket| bucket.entries.iter().find(|e| e.contact.id() == id))
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.get(id).is_some()
    }
}

/// Kbuckets are similar to LRU caches that checks and evicts unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Entries in the k-bucket, sorted by the least recently seen.
    entries: Vec<Entry>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            entries: Vec::with_capacity(MAX_BUCKET_SIZE_K),
        }
    }

    // === Public Methods ===

    pub fn add(&mut self, incoming: Entry) -> bool {
        if let Some(index) = self
            .entries
            .iter()
            .position(|e| e.contact.id() == incoming.contact.id())
        {
            // Messages are authenticated, so the fingerprint is trusted to have
            // moved to its new address.
            self.entries.remove(index);
            self.entries.push(incoming);

            true
        } else if self.entries.len() < MAX_BUCKET_SIZE_K {
            self.entries.push(incoming);
            true
        } else if self.entries[0].is_stale() {
            // Remove the least recently seen entry and add the new one
            self.entries.remove(0);
            self.entries.push(incoming);

            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: &Id) {
        self.entries.retain(|entry| entry.contact.id() != id);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn random_contact(port: u16) -> (Contact, SocketAddr) {
        let contact = Contact::new("127.0.0.1", port, Id::random());
        let address = contact.socket_addr().unwrap();

        (contact, address)
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        let (contact, address) = random_contact(1);
        table.add(contact, address);
        assert!(!table.is_empty());
    }

    #[test]
    fn should_not_add_self() {
        let id = Id::random();
        let mut table = RoutingTable::new(id);

        let contact = Contact::new("127.0.0.1", 1, id);
        let address = contact.socket_addr().unwrap();

        assert!(!table.add(contact, address));
        assert!(table.is_empty())
    }

    #[test]
    fn re_adding_updates_address() {
        let mut table = RoutingTable::new(Id::random());

        let (contact, address) = random_contact(1);
        table.add(contact.clone(), address);

        let moved = Contact::new("127.0.0.1", 2, contact.fingerprint);
        let new_address = moved.socket_addr().unwrap();
        assert!(table.add(moved, new_address));

        assert_eq!(table.size(), 1);
        assert_eq!(table.get(&contact.fingerprint).unwrap().address, new_address);
    }

    #[test]
    fn full_bucket_refuses_fresh_newcomers() {
        let mut bucket = KBucket::new();

        for i in 0..MAX_BUCKET_SIZE_K {
            let (contact, address) = random_contact(i as u16);
            assert!(bucket.add(Entry::new(contact, address)));
        }

        let (contact, address) = random_contact(9999);
        assert!(!bucket.add(Entry::new(contact, address)));
    }

    #[test]
    fn closest() {
        let ids = [
            "fb449c17f6c34fa4b2ee2d6ca1bfa4e4fb9a1d62",
            "7d3d0d07d3b1b9a4a1d7cbf1f1c63f57e2ac3e0e",
            "fb4d15c1b1d8a34bd0bfb2d4f6c3aa5b6c1f9d2e",
            "fb44a3e0d1b2c3d4e5f60718293a4b5c6d7e8f90",
        ];

        let mut table = RoutingTable::new(Id::random());
        for (i, id) in ids.iter().enumerate() {
            let contact = Contact::new("127.0.0.1", i as u16 + 1, id.parse().unwrap());
            let address = contact.socket_addr().unwrap();
            table.add(contact, address);
        }

        let target: Id = "fb449c17f6c34fa4b2ee2d6ca1bfa4e4fb9a1d61".parse().unwrap();
        let closest = table.closest(&target);

        assert_eq!(closest.len(), 4);
        assert_eq!(closest[0].fingerprint.to_string(), ids[0]);
        assert_eq!(closest[1].fingerprint.to_string(), ids[3]);
        assert_eq!(closest[3].fingerprint.to_string(), ids[1]);
    }
}
