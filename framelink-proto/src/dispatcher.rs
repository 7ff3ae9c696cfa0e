//! Id-indexed message dispatch.
//!
//! Handlers run on the application loop thread. They may synchronously send
//! responses, schedule timers, mutate application state and stop sessions;
//! they must not block. A missing handler is logged and skipped, not fatal.

use hashbrown::HashMap;
use tracing::error;

use framelink_core::session::SessionId;

use crate::message::{MessageId, WireMessage};
use crate::queue::MessageEntry;
use crate::registry::BoxedMessage;

type Handler = Box<dyn FnMut(SessionId, &BoxedMessage)>;

/// Handler table keyed by message id.
#[derive(Default)]
pub struct MessageDispatcher {
    handlers: HashMap<MessageId, Handler>,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Install the handler for `M`, replacing any previous one.
    pub fn register<M, F>(&mut self, mut handler: F)
    where
        M: WireMessage,
        F: FnMut(SessionId, &M) + 'static,
    {
        self.handlers.insert(
            M::MESSAGE_ID,
            Box::new(move |session_id, message| match message.downcast_ref::<M>() {
                Some(message) => handler(session_id, message),
                None => error!(
                    message_id = M::MESSAGE_ID,
                    "queued payload does not match the registered handler type"
                ),
            }),
        );
    }

    pub fn unregister(&mut self, id: MessageId) {
        self.handlers.remove(&id);
    }

    #[must_use]
    pub fn has_handler(&self, id: MessageId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Invoke the handler for one queued entry; logs and skips unknown ids.
    pub fn dispatch(&mut self, entry: &MessageEntry) {
        match self.handlers.get_mut(&entry.message_id) {
            Some(handler) => handler(entry.session_id, &entry.message),
            None => error!(
                message_id = entry.message_id,
                session = entry.session_id,
                "no handler registered for message"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Probe {
        value: u32,
    }

    impl WireMessage for Probe {
        const MESSAGE_ID: MessageId = 7;
    }

    fn entry_of(session_id: SessionId, message: Probe) -> MessageEntry {
        MessageEntry {
            session_id,
            message_id: Probe::MESSAGE_ID,
            message: Box::new(message),
        }
    }

    #[test]
    fn dispatches_to_the_typed_handler() {
        let mut dispatcher = MessageDispatcher::new();
        let seen = Rc::new(Cell::new(0u32));
        {
            let seen = seen.clone();
            dispatcher.register::<Probe, _>(move |session_id, message: &Probe| {
                assert_eq!(session_id, 3);
                seen.set(message.value);
            });
        }
        assert!(dispatcher.has_handler(7));
        dispatcher.dispatch(&entry_of(3, Probe { value: 42 }));
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn missing_handler_is_skipped() {
        let mut dispatcher = MessageDispatcher::new();
        dispatcher.dispatch(&entry_of(1, Probe { value: 1 }));
    }

    #[test]
    fn unregister_removes_the_handler() {
        let mut dispatcher = MessageDispatcher::new();
        dispatcher.register::<Probe, _>(|_, _: &Probe| {});
        dispatcher.unregister(7);
        assert!(!dispatcher.has_handler(7));
    }
}
