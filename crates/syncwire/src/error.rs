//! Engine error types.

use syncwire_types::{ServiceName, TypeName, UnknownEventKind};
use thiserror::Error;

use crate::remote_error::{ErrorKind, RemoteError, TransportError, classify};

/// Result type for engine operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors that can occur while synchronizing with a remote service.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A classified remote failure.
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// A remote failure whose name was not recognized, passed through as is.
    #[error("remote call failed: {0}")]
    Transport(TransportError),

    /// A payload that must address a record carried no primary key.
    #[error("payload for '{type_name}' has no identity in field '{field}'")]
    MissingIdentity { type_name: TypeName, field: String },

    /// An event name outside created/updated/patched/removed.
    #[error(transparent)]
    UnknownEventKind(#[from] UnknownEventKind),

    /// A service was re-registered with a different record type.
    #[error("service '{service}' is bound to type '{existing}', cannot rebind to '{requested}'")]
    TypeNameMismatch {
        service: ServiceName,
        existing: TypeName,
        requested: TypeName,
    },

    /// A record type was bound to a second service.
    #[error("type '{type_name}' is bound to service '{existing}', cannot rebind to '{requested}'")]
    ServiceNameMismatch {
        type_name: TypeName,
        existing: ServiceName,
        requested: ServiceName,
    },

    /// A singular endpoint returned more than one record.
    #[error("expected at most one '{type_name}' record, received {count}")]
    UnexpectedCardinality { type_name: TypeName, count: usize },

    /// A response or event payload did not have the expected shape.
    #[error("malformed payload for '{type_name}': {reason}")]
    MalformedPayload { type_name: TypeName, reason: String },

    /// The service was unregistered; its registration is frozen.
    #[error("service '{0}' is no longer registered")]
    Unregistered(ServiceName),
}

impl SyncError {
    /// Wraps a transport failure, classifying it when its name is known.
    pub fn from_transport(error: TransportError) -> Self {
        match classify(error) {
            Ok(remote) => SyncError::Remote(remote),
            Err(raw) => SyncError::Transport(raw),
        }
    }

    pub fn malformed(type_name: &TypeName, reason: impl Into<String>) -> Self {
        SyncError::MalformedPayload {
            type_name: type_name.clone(),
            reason: reason.into(),
        }
    }

    /// Kind of remote failure, if this error came from the remote side.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SyncError::Remote(remote) => Some(remote.kind),
            SyncError::Transport(_) => Some(ErrorKind::Unknown),
            _ => None,
        }
    }

    /// Returns true for programming-contract violations that callers must not
    /// swallow.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::MissingIdentity { .. }
                | SyncError::UnknownEventKind(_)
                | SyncError::TypeNameMismatch { .. }
                | SyncError::ServiceNameMismatch { .. }
                | SyncError::UnexpectedCardinality { .. }
                | SyncError::MalformedPayload { .. }
        )
    }
}
