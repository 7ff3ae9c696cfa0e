//! Wire-message trait and id space.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtoError;

/// Message-type code carried in the framing header. Uniquely identifies a
/// message schema and stays stable across versions.
pub type MessageId = u16;

/// A typed application message with a fixed wire id.
///
/// Payloads use a self-describing binary encoding; the framing header is
/// written separately by the serializer.
pub trait WireMessage: Serialize + DeserializeOwned + std::fmt::Debug + Send + 'static {
    /// The message-type code written into the packet header.
    const MESSAGE_ID: MessageId;
}

/// Encoded payload size of a message.
pub fn encoded_len<M: WireMessage>(message: &M) -> Result<usize, ProtoError> {
    bincode::serialized_size(message)
        .map(|size| size as usize)
        .map_err(|source| ProtoError::Encode {
            id: M::MESSAGE_ID,
            source,
        })
}
