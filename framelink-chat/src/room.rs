//! Authoritative chat room.
//!
//! Tracks active sessions and their server-assigned display names, and
//! broadcasts every chat line to the whole room. Runs entirely on the
//! application loop thread.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use tracing::{error, warn};

use framelink_core::manager::SessionManager;
use framelink_core::session::SessionId;
use framelink_proto::{MessageDispatcher, MessageSerializer};

use crate::now_ms;
use crate::schema::{ChatBroadcast, ChatRequest};

pub struct ChatRoom {
    serializer: MessageSerializer,
    next_message_id: u64,
    active_sessions: HashSet<SessionId>,
    display_names: HashMap<SessionId, String>,
}

impl ChatRoom {
    #[must_use]
    pub fn new(serializer: MessageSerializer) -> Self {
        Self {
            serializer,
            next_message_id: 1,
            active_sessions: HashSet::new(),
            display_names: HashMap::new(),
        }
    }

    /// Admit a session and assign its authoritative display name.
    pub fn on_client_accepted(&mut self, session_id: SessionId) {
        self.active_sessions.insert(session_id);
        self.display_names
            .insert(session_id, format!("player-{session_id}"));
    }

    pub fn on_client_closed(&mut self, session_id: SessionId) {
        self.active_sessions.remove(&session_id);
        self.display_names.remove(&session_id);
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.active_sessions.len()
    }

    /// Wire the room's handlers into a dispatcher.
    pub fn register_handlers(
        room: &Rc<RefCell<ChatRoom>>,
        manager: &Rc<RefCell<SessionManager>>,
        dispatcher: &mut MessageDispatcher,
    ) {
        let room = Rc::clone(room);
        let manager = Rc::clone(manager);
        dispatcher.register::<ChatRequest, _>(move |session_id, message: &ChatRequest| {
            room.borrow_mut()
                .handle_chat(&manager.borrow(), session_id, message);
        });
    }

    fn handle_chat(
        &mut self,
        manager: &SessionManager,
        session_id: SessionId,
        message: &ChatRequest,
    ) {
        // the client-sent sender_name is deliberately ignored
        let sender_name = self
            .display_names
            .get(&session_id)
            .cloned()
            .unwrap_or_else(|| format!("player-{session_id}"));
        let broadcast = ChatBroadcast {
            sender_name,
            content: message.content.clone(),
            client_message_id: message.client_message_id,
            server_message_id: self.next_message_id,
            server_sent_at_ms: now_ms(),
            sender_session_id: session_id,
        };
        self.next_message_id += 1;

        let chunk = match self.serializer.serialize(&broadcast) {
            Ok(chunk) => chunk,
            Err(error) => {
                error!(%error, "failed to serialize chat broadcast");
                return;
            }
        };
        let mut delivered = 0;
        for member in &self.active_sessions {
            if manager.send(*member, chunk.clone()) {
                delivered += 1;
            } else {
                warn!(session = *member, "failed to deliver chat broadcast");
            }
        }
        if delivered == 0 {
            warn!("chat broadcast had no recipients");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_tracks_names() {
        let mut room = ChatRoom::new(MessageSerializer::default());
        room.on_client_accepted(4);
        room.on_client_accepted(9);
        assert_eq!(room.member_count(), 2);
        assert_eq!(room.display_names.get(&4).unwrap(), "player-4");
        room.on_client_closed(4);
        assert_eq!(room.member_count(), 1);
        assert!(!room.display_names.contains_key(&4));
    }
}
