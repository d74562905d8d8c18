//! Routing table maintenance logic.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::common::{Id, RoutingTable};

const REFRESH_TABLE_INTERVAL: Duration = Duration::from_secs(15 * 60);
const PING_TABLE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Routing table maintenance state
#[derive(Debug)]
pub struct RoutingMaintenance {
    last_table_refresh: Instant,
    last_table_ping: Instant,
}

/// Decisions about routing table maintenance
#[derive(Debug, Default)]
pub struct MaintenanceDecisions {
    /// Whether to look ourselves up again to refresh the table
    pub should_refresh: bool,

    /// Node IDs to purge from the routing table
    pub nodes_to_purge: Vec<Id>,

    /// Node addresses to ping
    pub nodes_to_ping: Vec<SocketAddr>,
}

impl RoutingMaintenance {
    pub fn new() -> Self {
        RoutingMaintenance {
            last_table_refresh: Instant::now(),
            last_table_ping: Instant::now(),
        }
    }

    /// Computes decisions and resets internal timers when intervals elapse.
    pub fn decisions(&mut self, routing_table: &RoutingTable) -> MaintenanceDecisions {
        self.decisions_at(Instant::now(), routing_table)
    }

    fn decisions_at(&mut self, now: Instant, routing_table: &RoutingTable) -> MaintenanceDecisions {
        let mut decisions = MaintenanceDecisions::default();

        if now.duration_since(self.last_table_refresh) >= REFRESH_TABLE_INTERVAL {
            self.last_table_refresh = now;
            decisions.should_refresh = !routing_table.is_empty();
        }

        if now.duration_since(self.last_table_ping) >= PING_TABLE_INTERVAL {
            self.last_table_ping = now;

            for entry in routing_table.entries() {
                if entry.is_stale() {
                    decisions.nodes_to_purge.push(entry.contact.fingerprint);
                } else if entry.should_ping() {
                    decisions.nodes_to_ping.push(entry.address);
                }
            }
        }

        decisions
    }
}

impl Default for RoutingMaintenance {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Contact;

    #[test]
    fn nothing_due_right_away() {
        let mut maintenance = RoutingMaintenance::new();
        let table = RoutingTable::new(Id::random());

        let decisions = maintenance.decisions(&table);

        assert!(!decisions.should_refresh);
        assert!(decisions.nodes_to_ping.is_empty());
    }

    #[test]
    fn due_intervals() {
        let mut maintenance = RoutingMaintenance::new();
        let mut table = RoutingTable::new(Id::random());

        let contact = Contact::new("127.0.0.1", 1, Id::random());
        let address = contact.socket_addr().unwrap();
        table.add(contact, address);

        // Add to Instant::now() instead of subtracting, Instant may be close to its epoch.
        let future = Instant::now() + REFRESH_TABLE_INTERVAL + Duration::from_secs(1);

        let decisions = maintenance.decisions_at(future, &table);

        assert!(decisions.should_refresh);
        assert_eq!(maintenance.last_table_refresh, future);
        assert_eq!(maintenance.last_table_ping, future);

        // Just added, neither stale nor due for a ping.
        assert!(decisions.nodes_to_purge.is_empty());
        assert!(decisions.nodes_to_ping.is_empty());
    }
}
