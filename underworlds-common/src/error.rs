//! Error kinds produced by the core.

use crate::ids::NodeId;

/// Errors the replication engine can surface to a caller.
///
/// `IndexOutOfRange`, `UnknownKey` and `InconsistentState` leave the
/// originating proxy usable. `TransportFailure` is retried on the
/// background task's next tick. `ProtocolViolation` is fatal for the
/// background task that observed it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An integer index was requested past the collection's current
    /// `length()`.
    #[error("index {index} is out of range (length is {length})")]
    IndexOutOfRange { index: usize, length: usize },

    /// A node or situation id is not known to the server.
    #[error("no such id: {id}")]
    UnknownKey { id: String },

    /// Extend-by-one found no pending updates after the grace wait: the
    /// server's invalidation stream is pathologically late or broken.
    #[error("inconsistent state: server did not notify all advertised ids")]
    InconsistentState,

    /// An RPC call failed or exceeded its deadline.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The background task observed an invalidation action code it did not
    /// recognize. Fatal for that task; the proxy's cache stops updating but
    /// remains readable.
    #[error("protocol violation: unknown invalidation action {action:?}")]
    ProtocolViolation { action: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unknown_node(id: NodeId) -> Self {
        Self::UnknownKey { id: id.to_string() }
    }

    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::TransportFailure(Box::new(err))
    }
}
