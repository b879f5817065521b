//! # Concurrent Session Manager
//!
//! Per-connection session state and the room registry for the TCP
//! multi-user variant (spec §4.6). A single reader/writer lock guards the
//! session table; broadcasts take the read lock and iterate a snapshot of
//! sessions, since room membership is read-dominant and broadcasts should
//! not serialize behind other broadcasts any more than necessary.
//!
//! Grounded in `original_source/projects/prj5/prj5-sol/server.c`'s
//! `AllThreadInfos`/`ThreadInfo` tables (one slot per connection, a
//! `pthread_rwlock_t` guarding validity/user/room and iteration), and in the
//! teacher's `Arc<Mutex<HashMap<...>>>` connection-table pattern in
//! `ipc/tcp_socket.rs` — upgraded to `tokio::sync::RwLock` here because the
//! spec explicitly calls for a reader/writer lock over a Mutex.

use crate::protocol::{ServerHeader, Status};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

pub type SessionId = u64;

/// Per-connection session state: who they are, which room they're in, and a
/// channel to push unsolicited frames (broadcasts) onto their connection.
struct Session {
    user: String,
    room: String,
    /// Outbound frames (header + body) destined for this session's writer
    /// task. A closed channel means the session already disconnected; a
    /// full channel (backpressure) is logged and dropped rather than
    /// blocking the broadcaster, matching spec §4.6's "a peer's send
    /// failure is logged but does not abort the broadcast".
    outbox: mpsc::Sender<(ServerHeader, Vec<u8>)>,
}

/// The server-wide room registry: all active sessions keyed by connection
/// id, guarded by one reader/writer lock (spec §4.6).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionRegistry::default())
    }

    /// Publish a newly-INIT'd session under `id`, taking the write lock.
    pub async fn init_session(
        &self,
        id: SessionId,
        user: String,
        room: String,
        outbox: mpsc::Sender<(ServerHeader, Vec<u8>)>,
    ) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            Session {
                user,
                room,
                outbox,
            },
        );
    }

    /// Invalidate and free a session's state, taking the write lock.
    pub async fn cleanup_session(&self, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
    }

    /// Broadcast one message to every valid session in `room` other than
    /// `exclude`, taking only the read lock. Sent as a body frame followed by
    /// a terminal empty-OK frame, the same two-frame shape `query_sequence`
    /// uses for a single-result response, so a receiving client's response
    /// state machine treats a pushed broadcast exactly like a reply to its
    /// own request (spec §4.4's "no reply correlation is required"). A send
    /// failure on one peer (closed/full channel) is logged and does not
    /// abort the broadcast for the remaining peers.
    pub async fn broadcast_to_room(&self, room: &str, exclude: Option<SessionId>, body: String) {
        let sessions = self.sessions.read().await;
        for (id, session) in sessions.iter() {
            if Some(*id) == exclude || !session.room.eq_ignore_ascii_case(room) {
                continue;
            }
            let header = ServerHeader {
                status: Status::Ok,
                n_bytes: body.len(),
            };
            if let Err(e) = session.outbox.try_send((header, body.clone().into_bytes())) {
                tracing::warn!(session = id, "broadcast send failed: {e}");
                continue;
            }
            if let Err(e) = session.outbox.try_send((ServerHeader::ok(0), Vec::new())) {
                tracing::warn!(session = id, "broadcast terminal frame send failed: {e}");
            }
        }
    }

    /// The `user`/`room` currently recorded for `id`, if any.
    pub async fn session_identity(&self, id: SessionId) -> Option<(String, String)> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).map(|s| (s.user.clone(), s.room.clone()))
    }
}

/// A session identifier allocator: TCP sessions are numbered by monotonic
/// counter rather than by file descriptor (the original's `AllThreadInfos`
/// indexing scheme), since connections are not backed by raw fds in an
/// async runtime.
#[derive(Default)]
pub struct SessionIdAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        SessionIdAllocator::default()
    }

    pub fn next_id(&self) -> SessionId {
        self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_same_room_peers_only() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry
            .init_session(1, "@a".into(), "sysprog".into(), tx_a)
            .await;
        registry
            .init_session(2, "@b".into(), "other".into(), tx_b)
            .await;

        registry
            .broadcast_to_room("sysprog", None, "user @c has entered the room\n".into())
            .await;

        let (hdr, body) = rx_a.try_recv().unwrap();
        assert_eq!(hdr.status, Status::Ok);
        assert_eq!(body, b"user @c has entered the room\n");
        let (terminal_hdr, terminal_body) = rx_a.try_recv().unwrap();
        assert_eq!(terminal_hdr.status, Status::Ok);
        assert!(terminal_body.is_empty());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excludes_originating_session() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        registry
            .init_session(1, "@a".into(), "sysprog".into(), tx_a)
            .await;

        registry
            .broadcast_to_room("sysprog", Some(1), "message from @a\nhi".into())
            .await;

        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_session_from_future_broadcasts() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        registry
            .init_session(1, "@a".into(), "sysprog".into(), tx_a)
            .await;
        registry.cleanup_session(1).await;

        registry
            .broadcast_to_room("sysprog", None, "msg".into())
            .await;
        assert!(rx_a.try_recv().is_err());
    }
}
