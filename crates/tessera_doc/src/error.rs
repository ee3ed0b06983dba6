//! Error types for the document substrate.

use crate::id::{ContainerId, ContainerKind};
use thiserror::Error;

/// Result type for document operations.
pub type DocResult<T> = Result<T, DocError>;

/// Errors that can occur while mutating or exchanging a document.
#[derive(Debug, Error)]
pub enum DocError {
    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tessera_codec::CodecError),

    /// An update could not be decoded into operations.
    #[error("malformed update: {message}")]
    MalformedUpdate {
        /// Description of the problem.
        message: String,
    },

    /// A state vector could not be decoded.
    #[error("malformed state vector: {message}")]
    MalformedStateVector {
        /// Description of the problem.
        message: String,
    },

    /// The container exists but holds a different kind.
    #[error("container {container} is a {actual:?}, not a {expected:?}")]
    KindMismatch {
        /// Container addressed.
        container: ContainerId,
        /// Kind the caller expected.
        expected: ContainerKind,
        /// Kind stored in the document.
        actual: ContainerKind,
    },

    /// The container has never been integrated into this document.
    #[error("unknown container {container}")]
    UnknownContainer {
        /// Container addressed.
        container: ContainerId,
    },

    /// The local lamport clock cannot advance any further.
    #[error("lamport clock exhausted")]
    ClockExhausted,

    /// A write was attempted after its transaction closed.
    #[error("transaction is no longer open")]
    TransactionClosed,
}

impl DocError {
    /// Creates a malformed update error.
    pub fn malformed_update(message: impl Into<String>) -> Self {
        Self::MalformedUpdate {
            message: message.into(),
        }
    }

    /// Creates a malformed state vector error.
    pub fn malformed_state_vector(message: impl Into<String>) -> Self {
        Self::MalformedStateVector {
            message: message.into(),
        }
    }
}
