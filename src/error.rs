//! Main Crate Error

use serde::{Deserialize, Serialize};

use crate::common::Id;

#[derive(thiserror::Error, Debug)]
/// Dhtnode crate error enum.
pub enum Error {
    /// The persisted private key could not be read or decoded.
    #[error("Identity is corrupt: {0}")]
    IdentityCorrupt(String),

    /// The data directory (or a file inside it) could not be created or written.
    #[error("Storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `config.json` exists but is not a valid configuration document.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The routing table has no known peers to answer a non-self query.
    #[error("Routing table has no known peers")]
    RoutingUnavailable,

    /// A peer did not answer within the request timeout.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// An operation did not settle before its deadline.
    #[error("Request timed out")]
    RequestTimeout,

    /// A message or a handshake could not be authenticated.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No node in the lookup path holds a value for this key.
    #[error("No value found for target {0}")]
    ValueNotFound(Id),

    /// Value bigger than what fits in a single datagram.
    #[error("Value too large: {0} bytes (max {max})", max = crate::engine::MAX_VALUE_SIZE)]
    ValueTooLarge(usize),

    /// A remote node answered with an error message.
    #[error("Rejected by remote node: {code} {description}")]
    Rejected { code: i32, description: String },

    /// The node's actor thread is gone.
    #[error("Node was shutdown")]
    NodeWasShutdown,

    /// An error answered by a node's control plane.
    #[error("{kind:?}: {message}")]
    Control { kind: ErrorKind, message: String },

    #[error(transparent)]
    /// Transparent [crate::transport::TransportError], only at startup.
    Transport(#[from] crate::transport::TransportError),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

/// Stable, serializable discriminant of [Error], shipped across the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    IdentityCorrupt,
    StorageUnavailable,
    ConfigInvalid,
    RoutingUnavailable,
    PeerUnreachable,
    RequestTimeout,
    AuthenticationFailed,
    ValueNotFound,
    ValueTooLarge,
    Rejected,
    NodeWasShutdown,
    Transport,
    Io,
    /// Malformed control-plane request or response.
    Protocol,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IdentityCorrupt(_) => ErrorKind::IdentityCorrupt,
            Error::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            Error::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Error::RoutingUnavailable => ErrorKind::RoutingUnavailable,
            Error::PeerUnreachable(_) => ErrorKind::PeerUnreachable,
            Error::RequestTimeout => ErrorKind::RequestTimeout,
            Error::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Error::ValueNotFound(_) => ErrorKind::ValueNotFound,
            Error::ValueTooLarge(_) => ErrorKind::ValueTooLarge,
            Error::Rejected { .. } => ErrorKind::Rejected,
            Error::NodeWasShutdown => ErrorKind::NodeWasShutdown,
            Error::Control { kind, .. } => *kind,
            Error::Transport(_) => ErrorKind::Transport,
            Error::IO(_) => ErrorKind::Io,
        }
    }

    /// Errors that prevent a node from starting at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IdentityCorrupt(_) | Error::StorageUnavailable { .. } | Error::ConfigInvalid(_)
        )
    }

    pub(crate) fn storage(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Error::StorageUnavailable {
            path: path.into(),
            source,
        }
    }
}

impl From<crate::engine::PutError> for Error {
    fn from(error: crate::engine::PutError) -> Self {
        use crate::engine::PutError;

        match error {
            PutError::NoClosestNodes => Error::RoutingUnavailable,
            PutError::ErrorResponse(error) => Error::Rejected {
                code: error.code,
                description: error.description,
            },
            PutError::Timeout => {
                Error::PeerUnreachable("no node acknowledged the store".to_string())
            }
        }
    }
}

/// Alias for `Result<T, dhtnode::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_startup_errors_are_fatal() {
        assert!(Error::IdentityCorrupt("bad hex".into()).is_fatal());
        assert!(Error::ConfigInvalid("eof".into()).is_fatal());
        assert!(Error::storage("/x", std::io::Error::other("ro")).is_fatal());

        assert!(!Error::RoutingUnavailable.is_fatal());
        assert!(!Error::RequestTimeout.is_fatal());
        assert!(!Error::PeerUnreachable("127.0.0.1:1".into()).is_fatal());
        assert!(!Error::AuthenticationFailed("sig".into()).is_fatal());
    }

    #[test]
    fn store_errors() {
        use crate::common::ErrorSpecific;
        use crate::engine::PutError;

        let error: Error = PutError::ErrorResponse(ErrorSpecific {
            code: 203,
            description: "Rejected by validator".into(),
        })
        .into();

        assert!(matches!(error, Error::Rejected { code: 203, .. }));
        assert_eq!(Error::from(PutError::Timeout).kind(), ErrorKind::PeerUnreachable);
    }

    #[test]
    fn kind_serializes_by_name() {
        let json = serde_json::to_string(&Error::RoutingUnavailable.kind()).unwrap();
        assert_eq!(json, "\"RoutingUnavailable\"");
    }
}
