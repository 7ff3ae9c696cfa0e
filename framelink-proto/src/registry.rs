//! Message-type factory table.
//!
//! Maps a wire id to a factory that parses a payload into a type-erased
//! message. The dispatcher downcasts back to the concrete type, so registry
//! and dispatcher are registered from the same schema.

use std::any::Any;

use hashbrown::HashMap;

use crate::error::ProtoError;
use crate::message::{MessageId, WireMessage};

/// A parsed, type-erased message.
pub type BoxedMessage = Box<dyn Any + Send>;

type MessageFactory = Box<dyn Fn(&[u8]) -> Result<BoxedMessage, ProtoError> + Send + Sync>;

/// Id-indexed parse factories.
#[derive(Default)]
pub struct MessageRegistry {
    factories: HashMap<MessageId, MessageFactory>,
}

impl MessageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Install the factory for `M`. Registering two types with the same id
    /// is a schema bug.
    pub fn register<M: WireMessage>(&mut self) {
        let previous = self.factories.insert(
            M::MESSAGE_ID,
            Box::new(|payload| {
                bincode::deserialize::<M>(payload)
                    .map(|message| Box::new(message) as BoxedMessage)
                    .map_err(|source| ProtoError::Decode {
                        id: M::MESSAGE_ID,
                        source,
                    })
            }),
        );
        debug_assert!(previous.is_none(), "duplicate message id registered");
    }

    /// Parse `payload` as the type registered under `id`.
    pub fn create(&self, id: MessageId, payload: &[u8]) -> Result<BoxedMessage, ProtoError> {
        match self.factories.get(&id) {
            Some(factory) => factory(payload),
            None => Err(ProtoError::UnknownMessageId(id)),
        }
    }

    #[must_use]
    pub fn knows(&self, id: MessageId) -> bool {
        self.factories.contains_key(&id)
    }
}
