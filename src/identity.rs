//! Node identity: an ed25519 keypair persisted next to the node's configuration.
//!
//! Data directory layout:
//!
//! ```text
//! <datadir>/
//!   config.json    configuration document, human-editable
//!   id_ecdsa       hex encoded private key, sensitive
//!   data/          storage owned by the DHT engine
//!   telemetry.dat  link quality samples, optional
//! ```

use std::fmt::{self, Debug, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use tracing::{debug, info};

use crate::common::{Contact, Id};
use crate::config::{Config, PartialConfig};
use crate::{Error, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const KEY_FILE: &str = "id_ecdsa";
pub const DATA_DIR: &str = "data";
pub const TELEMETRY_FILE: &str = "telemetry.dat";

#[derive(Clone)]
/// The node's signing keypair. Only the secret half is ever persisted.
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn random() -> Self {
        Keypair(SigningKey::from_bytes(&rand::random()))
    }

    pub fn from_secret_key(secret_key: &[u8; 32]) -> Self {
        Keypair(SigningKey::from_bytes(secret_key))
    }

    /// Decode a hex encoded secret key, as stored in `id_ecdsa`.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|error| Error::IdentityCorrupt(error.to_string()))?;

        let secret_key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::IdentityCorrupt(format!("expected 32 bytes secret key, got {}", bytes.len()))
        })?;

        Ok(Keypair::from_secret_key(&secret_key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.0.verifying_key().to_bytes()
    }

    /// SHA-1 fingerprint of the public key, used as the node [Id].
    pub fn fingerprint(&self) -> Id {
        Id::from_public_key(&self.public_key())
    }

    /// The contact descriptor advertised for this keypair at `address:port`.
    pub fn contact(&self, address: impl Into<String>, port: u16) -> Contact {
        Contact::new(address, port, self.fingerprint())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.0.sign(message).to_bytes()
    }
}

impl Debug for Keypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.fingerprint())
    }
}

/// Verify an ed25519 `signature` of `message` by `public_key`.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key
            .verify(message, &Signature::from_bytes(signature))
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
/// Loads or creates the identity and configuration of a node instance.
pub struct IdentityStore {
    root: PathBuf,
}

impl IdentityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        IdentityStore { root: root.into() }
    }

    /// Default data directory, `$HOME/.dhtnode`.
    pub fn default_root() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join(".dhtnode")
    }

    // === Getters ===

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.root.join(KEY_FILE)
    }

    pub fn data_path(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.root.join(TELEMETRY_FILE)
    }

    // === Public Methods ===

    /// Same as [Self::load_or_create_with] without overrides.
    pub fn load_or_create(&self) -> Result<(Keypair, Config)> {
        self.load_or_create_with(PartialConfig::default())
    }

    /// Create missing directories, configuration and key, then return the
    /// persisted keypair and the configuration resolved as
    /// `defaults <- config.json <- overrides`.
    pub fn load_or_create_with(&self, overrides: PartialConfig) -> Result<(Keypair, Config)> {
        for dir in [self.root.clone(), self.data_path()] {
            std::fs::create_dir_all(&dir).map_err(|error| Error::storage(&dir, error))?;
        }

        let config_path = self.config_path();
        if !config_path.exists() {
            debug!(path = ?config_path, "Writing default configuration");
            Config::default().write(&config_path)?;
        }

        let key_path = self.key_path();
        if !key_path.exists() {
            info!(path = ?key_path, "Generating a new identity");
            write_secret(&key_path, &Keypair::random().to_hex())?;
        }

        let encoded = std::fs::read_to_string(&key_path)
            .map_err(|error| Error::IdentityCorrupt(format!("{}: {}", key_path.display(), error)))?;
        let keypair = Keypair::from_hex(&encoded)?;

        let config = Config::resolve([PartialConfig::from_file(&config_path)?, overrides]);

        Ok((keypair, config))
    }
}

fn write_secret(path: &Path, contents: &str) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
        .open(path)
        .and_then(|mut file| file.write_all(contents.as_bytes()))
        .map_err(|error| Error::storage(path, error))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("node"));

        let (first_keypair, first_config) = store.load_or_create().unwrap();

        assert!(store.config_path().is_file());
        assert!(store.key_path().is_file());
        assert!(store.data_path().is_dir());
        assert_eq!(first_config, Config::default());

        let (second_keypair, second_config) = store.load_or_create().unwrap();

        assert_eq!(first_keypair.to_hex(), second_keypair.to_hex());
        assert_eq!(first_config, second_config);
    }

    #[test]
    fn persisted_values_win_over_defaults_and_overrides_win_over_both() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        std::fs::write(store.config_path(), r#"{"port": 4000, "address": "0.0.0.0"}"#).unwrap();

        let (_, config) = store
            .load_or_create_with(PartialConfig::default().with_port(5000))
            .unwrap();

        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn only_the_secret_key_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        let (keypair, _) = store.load_or_create().unwrap();
        let persisted = std::fs::read_to_string(store.key_path()).unwrap();

        assert_eq!(persisted, keypair.to_hex());
        assert_eq!(persisted.len(), 64);
    }

    #[test]
    fn corrupt_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        std::fs::write(store.key_path(), "definitely not hex").unwrap();

        let error = store.load_or_create().unwrap_err();
        assert!(matches!(error, Error::IdentityCorrupt(_)));

        std::fs::write(store.key_path(), "abcd").unwrap();

        let error = store.load_or_create().unwrap_err();
        assert!(matches!(error, Error::IdentityCorrupt(_)));
    }

    #[test]
    fn unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let store = IdentityStore::new(blocker.join("node"));

        let error = store.load_or_create().unwrap_err();
        assert!(matches!(error, Error::StorageUnavailable { .. }));
        assert!(error.is_fatal());
    }

    #[test]
    fn signatures() {
        let keypair = Keypair::random();
        let signature = keypair.sign(b"hello");

        assert!(verify(&keypair.public_key(), b"hello", &signature));
        assert!(!verify(&keypair.public_key(), b"hellp", &signature));
        assert!(!verify(&Keypair::random().public_key(), b"hello", &signature));
    }

    #[test]
    fn contact_fingerprint_matches_keypair() {
        let keypair = Keypair::random();
        let contact = keypair.contact("127.0.0.1", 4000);

        assert_eq!(contact.fingerprint, Id::from_public_key(&keypair.public_key()));
    }
}
