//! Parsed-message FIFO.
//!
//! Packets drained from a session are parsed here and queued until the loop
//! dispatches them. Parse failures drop the packet with a structured log
//! entry; an unknown id is fatal to the session only in strict mode.

use std::collections::VecDeque;

use framelink_core::packet::PacketView;
use framelink_core::session::SessionId;
use tracing::{error, warn};

use crate::error::ProtoError;
use crate::message::MessageId;
use crate::registry::{BoxedMessage, MessageRegistry};

/// One parsed message awaiting dispatch.
pub struct MessageEntry {
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub message: BoxedMessage,
}

/// FIFO of parsed messages.
#[derive(Default)]
pub struct MessageQueue {
    queue: VecDeque<MessageEntry>,
    strict: bool,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// In strict mode an unknown message id is returned as an error so the
    /// caller can stop the offending session.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            queue: VecDeque::new(),
            strict: true,
        }
    }

    /// Parse the packet behind `view` and enqueue it.
    ///
    /// Undecodable payloads are logged and dropped (`Ok`); an unknown id is
    /// an error only in strict mode.
    pub fn push(
        &mut self,
        session_id: SessionId,
        view: &PacketView<'_>,
        registry: &MessageRegistry,
    ) -> Result<(), ProtoError> {
        let message_id = view.header.id;
        match registry.create(message_id, view.payload) {
            Ok(message) => {
                self.queue.push_back(MessageEntry {
                    session_id,
                    message_id,
                    message,
                });
                Ok(())
            }
            Err(error @ ProtoError::UnknownMessageId(_)) => {
                if self.strict {
                    error!(session = session_id, message_id, "unknown message id");
                    return Err(error);
                }
                warn!(session = session_id, message_id, "dropping packet with unknown message id");
                Ok(())
            }
            Err(error) => {
                error!(session = session_id, message_id, %error, "dropping unparseable packet");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn front(&self) -> Option<&MessageEntry> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<MessageEntry> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framelink_core::packet::{PacketHeader, HEADER_SIZE};
    use serde::{Deserialize, Serialize};

    use crate::message::WireMessage;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Probe {
        value: u32,
    }

    impl WireMessage for Probe {
        const MESSAGE_ID: MessageId = 7;
    }

    fn view_of(id: MessageId, payload: &[u8]) -> PacketView<'_> {
        PacketView {
            header: PacketHeader {
                size: (HEADER_SIZE + payload.len()) as u16,
                id,
            },
            payload,
        }
    }

    #[test]
    fn parsed_messages_queue_in_order() {
        let mut registry = MessageRegistry::new();
        registry.register::<Probe>();
        let mut queue = MessageQueue::new();
        let first = bincode::serialize(&Probe { value: 1 }).unwrap();
        let second = bincode::serialize(&Probe { value: 2 }).unwrap();
        queue.push(10, &view_of(7, &first), &registry).unwrap();
        queue.push(11, &view_of(7, &second), &registry).unwrap();
        assert_eq!(queue.len(), 2);

        let entry = queue.pop().unwrap();
        assert_eq!(entry.session_id, 10);
        assert_eq!(entry.message.downcast_ref::<Probe>().unwrap().value, 1);
        let entry = queue.pop().unwrap();
        assert_eq!(entry.session_id, 11);
        assert!(queue.is_empty());
    }

    #[test]
    fn unknown_id_drops_unless_strict() {
        let registry = MessageRegistry::new();
        let mut lenient = MessageQueue::new();
        assert!(lenient.push(1, &view_of(9, &[]), &registry).is_ok());
        assert!(lenient.is_empty());

        let mut strict = MessageQueue::strict();
        assert!(matches!(
            strict.push(1, &view_of(9, &[]), &registry),
            Err(ProtoError::UnknownMessageId(9))
        ));
    }

    #[test]
    fn undecodable_payload_is_dropped() {
        let mut registry = MessageRegistry::new();
        registry.register::<Probe>();
        let mut queue = MessageQueue::new();
        assert!(queue.push(1, &view_of(7, &[0xFF]), &registry).is_ok());
        assert!(queue.is_empty());
    }
}
