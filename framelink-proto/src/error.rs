//! Message-pipeline errors.

use thiserror::Error;

use crate::message::MessageId;

/// Errors raised while parsing, serializing or routing typed messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// No factory registered for this message id.
    #[error("unknown message id {0}")]
    UnknownMessageId(MessageId),

    /// The payload did not parse as the registered type.
    #[error("failed to decode message {id}: {source}")]
    Decode {
        id: MessageId,
        source: bincode::Error,
    },

    /// The message failed to serialize.
    #[error("failed to encode message {id}: {source}")]
    Encode {
        id: MessageId,
        source: bincode::Error,
    },

    /// The encoded message does not fit a framed packet.
    #[error("message {id} does not fit a packet: {size} bytes (max {max})")]
    Oversize {
        id: MessageId,
        size: usize,
        max: usize,
    },
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
