//! Cross-thread event queues.
//!
//! Services and sessions publish lifecycle events from I/O worker threads;
//! the application loop drains both queues each tick with `try_recv`. The
//! queues are multi-producer single-consumer and never carry a session
//! handle, only sockets being handed off and plain ids.

pub use tokio::net::TcpStream;

use crate::session::SessionId;

/// Events emitted by a service.
#[derive(Debug)]
pub enum ServiceEvent {
    /// The server side accepted a connection; the socket is handed off to
    /// the application, which wraps it in a session.
    Accept(TcpStream),
    /// The client side established a connection.
    Connect(TcpStream),
    /// The service shut down. Emitted exactly once, after all other events.
    Close,
}

/// Events emitted by a session after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A read completed; complete packets are waiting to be drained.
    Receive(SessionId),
    /// The session closed. The last event emitted for this id.
    Close(SessionId),
}

pub type ServiceEventTx = flume::Sender<ServiceEvent>;
pub type ServiceEventRx = flume::Receiver<ServiceEvent>;
pub type SessionEventTx = flume::Sender<SessionEvent>;
pub type SessionEventRx = flume::Receiver<SessionEvent>;

/// Create the service-to-application event queue.
#[must_use]
pub fn service_event_queue() -> (ServiceEventTx, ServiceEventRx) {
    flume::unbounded()
}

/// Create the session-to-application event queue.
#[must_use]
pub fn session_event_queue() -> (SessionEventTx, SessionEventRx) {
    flume::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_drain_in_post_order() {
        let (tx, rx) = session_event_queue();
        tx.send(SessionEvent::Receive(1)).unwrap();
        tx.send(SessionEvent::Receive(2)).unwrap();
        tx.send(SessionEvent::Close(1)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Receive(1));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Receive(2));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Close(1));
        assert!(rx.try_recv().is_err());
    }
}
