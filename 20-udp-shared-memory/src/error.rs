//! Error taxonomy for the replicated store.
//!
//! Only local write-path failures (`NotFound`, `PayloadTooLarge`) and
//! lifecycle/configuration problems reach the embedding application. Everything
//! that happens on the receive path is absorbed by the listener and only shows
//! up in [`crate::metrics::MetricsSnapshot`].

use crate::node::NodeState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local delete of a key this node holds no value for.
    #[error("key not found")]
    NotFound,

    /// Encoded record does not fit in one datagram.
    #[error("record of {size} bytes exceeds the {limit}-byte datagram limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The stored version for the key already carries `u64::MAX`; no newer
    /// local write can be numbered.
    #[error("sequence numbers exhausted for key")]
    SequenceExhausted,

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Datagram is not a valid wire record.
    #[error("malformed record: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unknown operation type {0}")]
    UnknownOperation(i32),

    #[error("cannot resolve endpoint {endpoint}: {reason}")]
    Resolve { endpoint: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot {operation} a node that is {state:?}")]
    InvalidState {
        state: NodeState,
        operation: &'static str,
    },

    #[error("forwarder already started")]
    ForwarderStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the application-level key/value codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("bincode codec: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
}
