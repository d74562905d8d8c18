//! Node configuration and its layered resolver.
//!
//! A [Config] is resolved once, at startup, from three layers:
//!
//! 1. [Config::default()]
//! 2. the persisted `config.json` document, if any
//! 3. explicit in-memory overrides (tests, simulations)
//!
//! Each layer is a [PartialConfig]; a field set in a higher layer wins over
//! the same field in a lower one. The result is immutable for the node's
//! lifetime.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::common::Contact;
use crate::{Error, Result};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 52398;
pub const DEFAULT_LOGGER: u8 = 4;
pub const DEFAULT_LOG_LABEL: &str = "DHTNode";
/// Default request timeout before abandoning an inflight request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);
/// Default deadline for a whole get, put or connect operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Node configuration, see the [module docs](self).
pub struct Config {
    /// Address to bind and to advertise in our contact.
    pub address: String,
    /// UDP port to bind and to advertise in our contact.
    pub port: u16,
    /// Log verbosity: 0 off, 1 error, 2 warn, 3 info, 4 debug.
    pub logger: u8,
    /// Label attached to every log line of this node.
    pub log_label: String,
    /// Filesystem path of the control-plane endpoint.
    pub ipc: PathBuf,
    /// Contacts used once to join the network.
    pub seeds: Vec<Contact>,
    pub reachability: ReachabilityOptions,
    pub telemetry: TelemetryOptions,
    pub request_timeout_ms: u64,
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Options of the reachability (NAT traversal) transport decorator.
pub struct ReachabilityOptions {
    /// Wrap the transport with the reachability decorator.
    pub enabled: bool,
    /// Externally mapped `ip:port` (e.g. a forwarded port). When unset,
    /// negotiation is skipped and the public address is learned from peers.
    pub public_address: Option<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Options of the link-quality telemetry transport decorator.
pub struct TelemetryOptions {
    pub enabled: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            logger: DEFAULT_LOGGER,
            log_label: DEFAULT_LOG_LABEL.to_string(),
            ipc: std::env::temp_dir().join("dhtnode.sock"),
            seeds: vec![],
            reachability: ReachabilityOptions {
                enabled: true,
                public_address: None,
            },
            telemetry: TelemetryOptions::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Fold `layers` over [Config::default()], lowest priority first.
    pub fn resolve<I: IntoIterator<Item = PartialConfig>>(layers: I) -> Config {
        layers
            .into_iter()
            .fold(Config::default(), |config, layer| layer.apply(config))
    }

    /// Write this configuration as a pretty-printed json document.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|error| Error::ConfigInvalid(error.to_string()))?;

        std::fs::write(path, json).map_err(|error| Error::storage(path, error))
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self.logger {
            0 => LevelFilter::OFF,
            1 => LevelFilter::ERROR,
            2 => LevelFilter::WARN,
            3 => LevelFilter::INFO,
            4 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// One layer of configuration; unset fields fall through to the layer below.
pub struct PartialConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub logger: Option<u8>,
    pub log_label: Option<String>,
    pub ipc: Option<PathBuf>,
    pub seeds: Option<Vec<Contact>>,
    pub reachability: Option<ReachabilityOptions>,
    pub telemetry: Option<TelemetryOptions>,
    pub request_timeout_ms: Option<u64>,
    pub operation_timeout_ms: Option<u64>,
}

impl PartialConfig {
    /// Read a layer from a json document. A missing file is an empty layer.
    pub fn from_file(path: &Path) -> Result<PartialConfig> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PartialConfig::default())
            }
            Err(error) => return Err(Error::storage(path, error)),
        };

        serde_json::from_slice(&bytes)
            .map_err(|error| Error::ConfigInvalid(format!("{}: {}", path.display(), error)))
    }

    /// Overlay this layer on top of `base`.
    pub fn apply(self, base: Config) -> Config {
        Config {
            address: self.address.unwrap_or(base.address),
            port: self.port.unwrap_or(base.port),
            logger: self.logger.unwrap_or(base.logger),
            log_label: self.log_label.unwrap_or(base.log_label),
            ipc: self.ipc.unwrap_or(base.ipc),
            seeds: self.seeds.unwrap_or(base.seeds),
            reachability: self.reachability.unwrap_or(base.reachability),
            telemetry: self.telemetry.unwrap_or(base.telemetry),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(base.request_timeout_ms),
            operation_timeout_ms: self
                .operation_timeout_ms
                .unwrap_or(base.operation_timeout_ms),
        }
    }

    // === Options ===

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_logger(mut self, logger: u8) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_log_label(mut self, label: impl Into<String>) -> Self {
        self.log_label = Some(label.into());
        self
    }

    pub fn with_ipc(mut self, ipc: impl Into<PathBuf>) -> Self {
        self.ipc = Some(ipc.into());
        self
    }

    pub fn with_seeds(mut self, seeds: Vec<Contact>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    pub fn with_reachability(mut self, reachability: ReachabilityOptions) -> Self {
        self.reachability = Some(reachability);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryOptions) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets requests timeout in milliseconds
    pub fn with_request_timeout(mut self, timeout: u64) -> Self {
        self.request_timeout_ms = Some(timeout);
        self
    }

    /// Sets whole operations timeout in milliseconds
    pub fn with_operation_timeout(mut self, timeout: u64) -> Self {
        self.operation_timeout_ms = Some(timeout);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Id;

    #[test]
    fn higher_layers_win() {
        let file: PartialConfig =
            serde_json::from_str(r#"{"port": 4000, "logLabel": "from-file"}"#).unwrap();
        let overrides = PartialConfig::default().with_port(5000);

        let config = Config::resolve([file, overrides]);

        assert_eq!(config.port, 5000);
        assert_eq!(config.log_label, "from-file");
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.logger, DEFAULT_LOGGER);
    }

    #[test]
    fn default_document_roundtrips_as_a_layer() {
        let defaults = Config::default();
        let json = serde_json::to_string_pretty(&defaults).unwrap();

        let layer: PartialConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(Config::resolve([layer]), defaults);
    }

    #[test]
    fn missing_file_is_an_empty_layer() {
        let dir = tempfile::tempdir().unwrap();

        let layer = PartialConfig::from_file(&dir.path().join("config.json")).unwrap();

        assert_eq!(layer, PartialConfig::default());
    }

    #[test]
    fn corrupt_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ port: ").unwrap();

        let error = PartialConfig::from_file(&path).unwrap_err();

        assert!(matches!(error, Error::ConfigInvalid(_)));
    }

    #[test]
    fn seeds_from_json() {
        let id = Id::random();
        let json = format!(
            r#"{{"seeds": [{{"address": "127.0.0.1", "port": 65535, "fingerprint": "{}"}}]}}"#,
            id
        );

        let config = Config::resolve([serde_json::from_str::<PartialConfig>(&json).unwrap()]);

        assert_eq!(config.seeds, vec![Contact::new("127.0.0.1", 65535, id)]);
    }

    #[test]
    fn verbosity_levels() {
        let config = |logger| Config::resolve([PartialConfig::default().with_logger(logger)]);

        assert_eq!(config(0).level_filter(), LevelFilter::OFF);
        assert_eq!(config(2).level_filter(), LevelFilter::WARN);
        assert_eq!(config(4).level_filter(), LevelFilter::DEBUG);
    }
}
