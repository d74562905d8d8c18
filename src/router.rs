//! Routing facade: the routing table, re-ranked by link quality.

use crate::common::{Contact, Id, RoutingTable};
use crate::transport::Telemetry;
use crate::{Error, Result};

#[derive(Debug)]
/// Decorates a [RoutingTable] with telemetry-informed peer selection.
///
/// Maintenance (adding, refreshing and evicting entries) stays with the
/// engine through [Self::table_mut]; this facade only answers queries.
pub struct TelemetryRouter {
    table: RoutingTable,
    telemetry: Option<Telemetry>,
}

impl TelemetryRouter {
    pub fn new(table: RoutingTable, telemetry: Option<Telemetry>) -> Self {
        TelemetryRouter { table, telemetry }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        self.table.id()
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut RoutingTable {
        &mut self.table
    }

    // === Public Methods ===

    /// Known contacts nearest to `key`, excluding `exclude`, at most `limit`.
    ///
    /// Ordered by overlay (log2 XOR) distance, then by reachability
    /// confidence, higher first, then by full XOR distance.
    ///
    /// Fails with [Error::RoutingUnavailable] if the table is empty, unless
    /// `key` is our own id.
    pub fn get_nearest_contacts(
        &self,
        key: &Id,
        limit: usize,
        exclude: Option<&Id>,
    ) -> Result<Vec<Contact>> {
        if self.table.is_empty() {
            return if key == self.id() {
                Ok(vec![])
            } else {
                Err(Error::RoutingUnavailable)
            };
        }

        let mut ranked: Vec<(u8, f64, Id, &Contact)> = self
            .table
            .entries()
            .filter(|entry| Some(entry.contact.id()) != exclude)
            .map(|entry| {
                let confidence = self
                    .telemetry
                    .as_ref()
                    .map(|telemetry| telemetry.confidence(&entry.address))
                    .unwrap_or_default();

                (
                    key.distance(entry.contact.id()),
                    confidence,
                    key.xor(entry.contact.id()),
                    &entry.contact,
                )
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.total_cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, _, _, contact)| contact.clone())
            .collect())
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::*;

    fn by_overlay_distance(key: &Id, a: &Contact, b: &Contact) -> std::cmp::Ordering {
        key.distance(a.id()).cmp(&key.distance(b.id()))
    }

    fn router(telemetry: Option<Telemetry>) -> TelemetryRouter {
        TelemetryRouter::new(RoutingTable::new(Id::random()), telemetry)
    }

    fn add(router: &mut TelemetryRouter, port: u16, id: Id) -> Contact {
        let contact = Contact::new("127.0.0.1", port, id);
        let address = contact.socket_addr().unwrap();
        router.table_mut().add(contact.clone(), address);
        contact
    }

    #[test]
    fn empty_table() {
        let router = router(None);

        assert!(matches!(
            router.get_nearest_contacts(&Id::random(), 10, None),
            Err(Error::RoutingUnavailable)
        ));
        assert_eq!(
            router
                .get_nearest_contacts(&*router.id(), 10, None)
                .unwrap(),
            vec![]
        );
    }

    #[test]
    fn limit_and_order() {
        let mut router = router(None);
        for port in 1..=30 {
            add(&mut router, port, Id::random());
        }

        let key = Id::random();
        let nearest = router.get_nearest_contacts(&key, 8, None).unwrap();

        assert_eq!(nearest.len(), 8);
        assert!(nearest
            .windows(2)
            .all(|pair| by_overlay_distance(&key, &pair[0], &pair[1]) != std::cmp::Ordering::Greater));
    }

    #[test]
    fn exclude() {
        let mut router = router(None);
        let excluded = add(&mut router, 1, Id::random());
        add(&mut router, 2, Id::random());

        let nearest = router
            .get_nearest_contacts(excluded.id(), 10, Some(excluded.id()))
            .unwrap();

        assert_eq!(nearest.len(), 1);
        assert_ne!(nearest[0], excluded);
    }

    #[test]
    fn confidence_breaks_distance_ties() {
        let telemetry = Telemetry::default();
        let mut router = router(Some(telemetry.clone()));

        let key = Id::from([0; 20]);

        // Same overlay distance (160) from the key, the flaky one is XOR closer.
        let mut flaky_bytes = [0; 20];
        flaky_bytes[0] = 0x80;
        let steady_bytes = [0xff; 20];

        let flaky = add(&mut router, 1, Id::from(flaky_bytes));
        let steady = add(&mut router, 2, Id::from(steady_bytes));

        let flaky_addr: SocketAddr = flaky.socket_addr().unwrap();
        let steady_addr: SocketAddr = steady.socket_addr().unwrap();

        telemetry.record_failure(flaky_addr);
        telemetry.record_success(steady_addr, Duration::from_millis(1));

        let nearest = router.get_nearest_contacts(&key, 2, None).unwrap();
        assert_eq!(nearest, vec![steady.clone(), flaky.clone()]);

        // Without samples the raw XOR distance decides.
        let mut plain = TelemetryRouter::new(RoutingTable::new(Id::random()), None);
        add(&mut plain, 1, Id::from(flaky_bytes));
        add(&mut plain, 2, Id::from(steady_bytes));

        let nearest = plain.get_nearest_contacts(&key, 2, None).unwrap();
        assert_eq!(nearest, vec![flaky, steady]);
    }
}
