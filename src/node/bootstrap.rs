//! Bootstrap sequencer: from transport ready to joined.

use tracing::{info, warn};

use crate::common::Contact;
use crate::engine::Engine;
use crate::{Error, Result};

/// Anything that can start a connect handshake with a seed.
///
/// The outcome is reported back through [Bootstrap::settle].
pub trait SeedConnector {
    fn connect(&mut self, seed: Contact);
}

impl SeedConnector for Engine {
    fn connect(&mut self, seed: Contact) {
        Engine::connect(self, seed)
    }
}

#[derive(Debug, Default)]
/// Outcome of a bootstrap, once every seed settled.
pub struct BootstrapReport {
    pub connected: Vec<Contact>,
    pub failed: Vec<(Contact, Error)>,
}

#[derive(Debug)]
/// Connects to all seeds at once and waits for every attempt to settle.
///
/// Failures are logged and tolerated; there are no retries.
pub struct Bootstrap {
    pending: Vec<Contact>,
    report: BootstrapReport,
}

impl Bootstrap {
    /// Start a connect attempt for every seed.
    pub fn begin(seeds: &[Contact], connector: &mut dyn SeedConnector) -> Self {
        info!(seeds = seeds.len(), "Entering network");

        for seed in seeds {
            connector.connect(seed.clone());
        }

        Bootstrap {
            pending: seeds.to_vec(),
            report: BootstrapReport::default(),
        }
    }

    /// Record the outcome of a connect attempt.
    ///
    /// Returns `false` for seeds this bootstrap is not waiting for.
    pub fn settle(&mut self, seed: Contact, result: Result<()>) -> bool {
        let Some(position) = self.pending.iter().position(|pending| pending == &seed) else {
            return false;
        };
        self.pending.swap_remove(position);

        match result {
            Ok(()) => {
                info!(address = %seed.address, port = seed.port, "Connected to seed");
                self.report.connected.push(seed);
            }
            Err(error) => {
                warn!(address = %seed.address, port = seed.port, %error, "Failed to connect to seed");
                self.report.failed.push((seed, error));
            }
        }

        true
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }
}
