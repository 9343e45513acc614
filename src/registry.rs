//! Session Registry
//!
//! Maps `call-id` to session state, enforces the max-concurrent-calls limit,
//! and is the only place a connection is rebound on `session_resume`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::types::{CallId, CallerMetadata, Direction, SeqCounter};

/// Identifies one live WebSocket connection from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-call state, mutated only by the session's own control task.
/// `connection_id` is the sole field ever touched from outside that task,
/// and only through [`SessionRegistry::rebind`].
pub struct Session {
    pub call_id: CallId,
    pub direction: Direction,
    pub metadata: CallerMetadata,
    pub started_at: DateTime<Utc>,
    pub last_sent_seq: SeqCounter,
    pub last_recv_seq: SeqCounter,
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    connection_id: RwLock<ConnectionId>,
    last_activity: RwLock<Instant>,
    /// Parents every per-response token; cancelling this tears the whole
    /// call down.
    pub session_token: CancellationToken,
}

impl Session {
    pub fn connection_id(&self) -> ConnectionId {
        *self.connection_id.read().unwrap()
    }

    pub fn is_bound_to(&self, connection_id: ConnectionId) -> bool {
        self.connection_id() == connection_id
    }

    /// Creates a child token for one response, parented under the session
    /// token so a session teardown aborts any in-flight response too.
    pub fn new_response_token(&self) -> CancellationToken {
        self.session_token.child_token()
    }

    /// Records that the call made progress (audio, transcript, response) so
    /// the idle-timeout guard doesn't treat it as abandoned.
    pub fn touch(&self) {
        *self.last_activity.write().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.read().unwrap().elapsed()
    }
}

/// An immutable point-in-time copy of session state for external readers
/// (status endpoints, logging) that must never mutate live state directly.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub call_id: CallId,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub last_sent_seq: i64,
    pub last_recv_seq: i64,
    pub frames_received: u64,
    pub frames_sent: u64,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<CallId, std::sync::Arc<Session>>>,
    max_concurrent_calls: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_calls: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_calls,
        }
    }

    pub fn create(
        &self,
        call_id: CallId,
        direction: Direction,
        metadata: CallerMetadata,
        connection_id: ConnectionId,
    ) -> Result<std::sync::Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.len() >= self.max_concurrent_calls {
            return Err(BridgeError::Internal(format!(
                "max concurrent calls ({}) reached",
                self.max_concurrent_calls
            )));
        }
        if sessions.contains_key(&call_id) {
            return Err(BridgeError::Protocol(format!(
                "call-id {call_id} already has a session"
            )));
        }

        let session = std::sync::Arc::new(Session {
            call_id: call_id.clone(),
            direction,
            metadata,
            started_at: Utc::now(),
            last_sent_seq: SeqCounter::new(),
            last_recv_seq: SeqCounter::new(),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            connection_id: RwLock::new(connection_id),
            last_activity: RwLock::new(Instant::now()),
            session_token: CancellationToken::new(),
        });

        info!(call_id = %call_id, ?direction, "session created");
        sessions.insert(call_id, session.clone());
        Ok(session)
    }

    pub fn get(&self, call_id: &CallId) -> Option<std::sync::Arc<Session>> {
        self.sessions.read().unwrap().get(call_id).cloned()
    }

    /// Rebinds an existing session onto a new connection, as on
    /// `session_resume`. Returns `None` (with a caller-side warning logged)
    /// if the call-id is unknown.
    pub fn rebind(&self, call_id: &CallId, new_connection_id: ConnectionId) -> Option<std::sync::Arc<Session>> {
        let session = self.get(call_id)?;
        *session.connection_id.write().unwrap() = new_connection_id;
        info!(call_id = %call_id, connection_id = %new_connection_id, "session rebound");
        Some(session)
    }

    pub fn remove(&self, call_id: &CallId) -> Option<std::sync::Arc<Session>> {
        let removed = self.sessions.write().unwrap().remove(call_id);
        if let Some(session) = &removed {
            session.session_token.cancel();
            info!(call_id = %call_id, "session removed");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Drops every session bound to `connection_id`, as on connection loss.
    pub fn remove_by_connection(&self, connection_id: ConnectionId) -> Vec<std::sync::Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap();
        let to_remove: Vec<CallId> = sessions
            .iter()
            .filter(|(_, s)| s.is_bound_to(connection_id))
            .map(|(id, _)| id.clone())
            .collect();
        let mut removed = Vec::with_capacity(to_remove.len());
        for id in to_remove {
            if let Some(s) = sessions.remove(&id) {
                s.session_token.cancel();
                removed.push(s);
            }
        }
        removed
    }

    pub fn snapshot(&self, call_id: &CallId) -> Option<SessionSnapshot> {
        let session = self.get(call_id)?;
        Some(SessionSnapshot {
            call_id: session.call_id.clone(),
            direction: session.direction,
            started_at: session.started_at,
            last_sent_seq: session.last_sent_seq.current(),
            last_recv_seq: session.last_recv_seq.current(),
            frames_received: session.frames_received.load(Ordering::SeqCst),
            frames_sent: session.frames_sent.load(Ordering::SeqCst),
        })
    }
}
