//! Chat wire schema.
//!
//! The server is authoritative: it ignores the client-supplied sender name,
//! assigns display names per session, and stamps its own message id and
//! send time on every broadcast.

use serde::{Deserialize, Serialize};

use framelink_proto::{MessageId, WireMessage};

/// Client-to-server chat line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// Display name suggested by the client; never trusted.
    pub sender_name: String,
    pub content: String,
    /// Client-side sequence number, echoed back for latency measurement.
    pub client_message_id: u64,
    pub client_sent_at_ms: i64,
}

impl WireMessage for ChatRequest {
    const MESSAGE_ID: MessageId = 1000;
}

/// Server-to-client chat broadcast.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatBroadcast {
    /// Server-assigned display name of the sender.
    pub sender_name: String,
    pub content: String,
    /// Echo of the originating request's sequence number.
    pub client_message_id: u64,
    /// Monotonic server-side message id.
    pub server_message_id: u64,
    pub server_sent_at_ms: i64,
    pub sender_session_id: u64,
}

impl WireMessage for ChatBroadcast {
    const MESSAGE_ID: MessageId = 2000;
}
