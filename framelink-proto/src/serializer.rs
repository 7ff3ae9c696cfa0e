//! Typed message to framed send chunk.
//!
//! Serialization opens exactly one chunk per packet: header first, payload
//! straight into the reservation, then close. The returned chunk is
//! immutable and may be unicast or broadcast without copying.

use framelink_core::alloc::{SendBufferManager, SendChunk};
use framelink_core::options::NetOptions;
use framelink_core::packet::{PacketHeader, HEADER_SIZE};

use crate::error::ProtoError;
use crate::message::{encoded_len, WireMessage};

/// Serializes typed messages into framed packets backed by a send-buffer
/// arena. One serializer per producing thread.
pub struct MessageSerializer {
    buffers: SendBufferManager,
    max_packet_size: usize,
}

impl MessageSerializer {
    #[must_use]
    pub fn new(options: &NetOptions) -> Self {
        Self {
            buffers: SendBufferManager::new(options.send_slab_size),
            max_packet_size: options.max_packet_size,
        }
    }

    /// Frame `message` into a closed chunk: `size = HEADER_SIZE + payload`.
    pub fn serialize<M: WireMessage>(&mut self, message: &M) -> Result<SendChunk, ProtoError> {
        let payload_len = encoded_len(message)?;
        let total = HEADER_SIZE + payload_len;
        if total > self.max_packet_size {
            return Err(ProtoError::Oversize {
                id: M::MESSAGE_ID,
                size: total,
                max: self.max_packet_size,
            });
        }

        let mut chunk = self.buffers.open(total);
        let header = PacketHeader {
            size: total as u16,
            id: M::MESSAGE_ID,
        };
        header.encode(chunk.unwritten_mut());
        chunk.on_written(HEADER_SIZE);
        bincode::serialize_into(&mut chunk, message).map_err(|source| ProtoError::Encode {
            id: M::MESSAGE_ID,
            source,
        })?;
        debug_assert_eq!(chunk.written(), total);
        Ok(chunk.close())
    }
}

impl Default for MessageSerializer {
    fn default() -> Self {
        Self::new(&NetOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageId;
    use crate::registry::MessageRegistry;
    use framelink_core::packet;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct Probe {
        name: String,
        value: u64,
    }

    impl WireMessage for Probe {
        const MESSAGE_ID: MessageId = 321;
    }

    #[test]
    fn framing_roundtrip() {
        let mut serializer = MessageSerializer::default();
        let message = Probe {
            name: "roundtrip".into(),
            value: 0xDEAD_BEEF,
        };
        let chunk = serializer.serialize(&message).unwrap();

        let view = packet::front_packet(chunk.as_slice()).expect("chunk holds a whole packet");
        assert_eq!(view.header.id, 321);
        assert_eq!(view.header.size as usize, chunk.len());
        assert_eq!(
            view.header.size as usize,
            HEADER_SIZE + bincode::serialized_size(&message).unwrap() as usize
        );

        let mut registry = MessageRegistry::new();
        registry.register::<Probe>();
        let boxed = registry.create(view.header.id, view.payload).unwrap();
        assert_eq!(boxed.downcast_ref::<Probe>(), Some(&message));
    }

    #[test]
    fn consecutive_packets_pack_into_one_slab() {
        let mut serializer = MessageSerializer::default();
        let first = serializer
            .serialize(&Probe {
                name: "a".into(),
                value: 1,
            })
            .unwrap();
        let second = serializer
            .serialize(&Probe {
                name: "b".into(),
                value: 2,
            })
            .unwrap();
        // adjacent reservations in the same slab
        let end_of_first = first.as_slice().as_ptr() as usize + first.len();
        assert_eq!(end_of_first, second.as_slice().as_ptr() as usize);
    }

    #[test]
    fn oversize_message_is_rejected() {
        let options = NetOptions::default().max_packet_size(32);
        let mut serializer = MessageSerializer::new(&options);
        let message = Probe {
            name: "x".repeat(64),
            value: 0,
        };
        assert!(matches!(
            serializer.serialize(&message),
            Err(ProtoError::Oversize { id: 321, .. })
        ));
    }
}
