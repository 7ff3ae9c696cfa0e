//! Session manager.
//!
//! An associative map from session id to session handle with unicast,
//! broadcast and subset-broadcast send. Only ever touched from the
//! application loop thread, so it carries no synchronization.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::alloc::SendChunk;
use crate::session::{Session, SessionId};

/// Loop-thread index of live sessions.
#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<SessionId, Arc<Session>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Register a freshly created (not yet started) session.
    pub fn add(&mut self, session: Arc<Session>) {
        debug_assert!(!session.is_running(), "sessions are added before start");
        debug!(session = session.id(), "session registered");
        self.sessions.insert(session.id(), session);
    }

    /// Drop a session by id; unknown ids are ignored.
    pub fn remove(&mut self, session_id: SessionId) {
        if self.sessions.remove(&session_id).is_some() {
            debug!(session = session_id, "session deregistered");
        }
    }

    /// Drop a session by handle.
    pub fn remove_session(&mut self, session: &Arc<Session>) {
        self.remove(session.id());
    }

    #[must_use]
    pub fn find(&self, session_id: SessionId) -> Option<&Arc<Session>> {
        self.sessions.get(&session_id)
    }

    #[must_use]
    pub fn has(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Unicast; false when the session is unknown or no longer running.
    pub fn send(&self, session_id: SessionId, chunk: SendChunk) -> bool {
        let Some(session) = self.find(session_id) else {
            return false;
        };
        if !session.is_running() {
            return false;
        }
        session.send(chunk);
        true
    }

    /// Share one chunk with every registered session.
    pub fn broadcast(&self, chunk: &SendChunk) {
        for session in self.sessions.values() {
            session.send(chunk.clone());
        }
    }

    /// Share one chunk with a subset of sessions; stopped or unknown ids are
    /// skipped.
    pub fn broadcast_to(&self, session_ids: &[SessionId], chunk: &SendChunk) {
        for session_id in session_ids {
            if let Some(session) = self.find(*session_id) {
                if session.is_running() {
                    session.send(chunk.clone());
                }
            }
        }
    }

    /// Post an orderly close to every session. The entries stay registered
    /// until their Close events are observed and `remove` is called.
    pub fn stop_all(&self) {
        for session in self.sessions.values() {
            session.stop();
        }
        debug!("all sessions stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SendBufferManager;
    use crate::event::session_event_queue;
    use crate::options::NetOptions;
    use crate::pool::IoThreadPool;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    fn test_chunk(bytes: &[u8]) -> SendChunk {
        let mut manager = SendBufferManager::default();
        let mut chunk = manager.open(bytes.len());
        chunk.put_slice(bytes);
        chunk.close()
    }

    struct Rig {
        pool: IoThreadPool,
        manager: SessionManager,
        peers: Vec<TcpStream>,
        event_rx: crate::event::SessionEventRx,
    }

    fn rig(count: usize) -> Rig {
        let mut pool = IoThreadPool::new();
        pool.run(2).unwrap();
        let io = pool.handle();
        let (event_tx, event_rx) = session_event_queue();
        let mut manager = SessionManager::new();
        let mut peers = Vec::new();
        for _ in 0..count {
            let (peer, ours) = io.block_on(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                let (client, accepted) = tokio::join!(TcpStream::connect(addr), async {
                    listener.accept().await.map(|(socket, _)| socket)
                });
                (client.unwrap(), accepted.unwrap())
            });
            let session = Session::spawn(ours, event_tx.clone(), &io, &NetOptions::default());
            session.start();
            manager.add(session);
            peers.push(peer);
        }
        Rig {
            pool,
            manager,
            peers,
            event_rx,
        }
    }

    #[test]
    fn lookup_and_membership() {
        let mut rig = rig(2);
        let ids: Vec<SessionId> = rig.manager.sessions.keys().copied().collect();
        assert_eq!(rig.manager.len(), 2);
        for id in &ids {
            assert!(rig.manager.has(*id));
            assert!(rig.manager.find(*id).is_some());
        }
        assert!(!rig.manager.has(u64::MAX));
        rig.manager.remove(ids[0]);
        assert_eq!(rig.manager.len(), 1);
        rig.manager.stop_all();
        rig.pool.reset();
        rig.pool.join();
    }

    #[test]
    fn send_fails_for_unknown_or_stopped_sessions() {
        let mut rig = rig(1);
        let id = *rig.manager.sessions.keys().next().unwrap();
        assert!(rig.manager.send(id, test_chunk(b"up")));
        assert!(!rig.manager.send(u64::MAX, test_chunk(b"nobody")));

        rig.manager.find(id).unwrap().stop();
        // wait for the close to land so running is definitively false
        loop {
            match rig.event_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                crate::event::SessionEvent::Close(closed) if closed == id => break,
                _ => {}
            }
        }
        assert!(!rig.manager.send(id, test_chunk(b"down")));
        rig.pool.reset();
        rig.pool.join();
    }

    #[test]
    fn subset_broadcast_skips_unknown_ids() {
        let mut rig = rig(2);
        let mut ids: Vec<SessionId> = rig.manager.sessions.keys().copied().collect();
        ids.sort_unstable();
        let chunk = test_chunk(b"subset");
        // one live target, one bogus id
        rig.manager.broadcast_to(&[ids[0], u64::MAX], &chunk);

        let io = rig.pool.handle();
        let lowest_peer = rig.peers.remove(0);
        let bytes = io.block_on(async move {
            let mut peer = lowest_peer;
            let mut out = vec![0u8; 6];
            peer.read_exact(&mut out).await.unwrap();
            out
        });
        assert_eq!(bytes, b"subset");
        rig.manager.stop_all();
        rig.pool.reset();
        rig.pool.join();
    }

    #[test]
    fn broadcast_shares_one_chunk() {
        let mut rig = rig(3);
        let chunk = test_chunk(b"all hands");
        rig.manager.broadcast(&chunk);
        let io = rig.pool.handle();
        for peer in rig.peers.drain(..) {
            let bytes = io.block_on(async move {
                let mut peer = peer;
                let mut out = vec![0u8; 9];
                peer.read_exact(&mut out).await.unwrap();
                out
            });
            assert_eq!(bytes, b"all hands");
        }
        rig.manager.stop_all();
        rig.pool.reset();
        rig.pool.join();
    }
}
