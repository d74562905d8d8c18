#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

#[cfg(feature = "async")]
pub mod async_node;
pub mod config;
#[cfg(unix)]
pub mod control;
pub mod engine;
mod error;
pub mod identity;
pub mod node;
mod router;
pub mod transport;

pub use crate::common::{messages, Contact, Id, RoutingTable, MAX_BUCKET_SIZE_K};
pub use config::{Config, PartialConfig};
pub use error::{Error, ErrorKind, Result};
pub use identity::{IdentityStore, Keypair};
pub use node::{DhtNode, Info, NodeBuilder, NodeState};
pub use router::TelemetryRouter;
pub use transport::Telemetry;

pub use engine::{AcceptAll, Validator, ValidatorFn};
