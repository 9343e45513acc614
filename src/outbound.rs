//! Outbound Call Coordinator
//!
//! Issues `initiate_call` toward the gateway and resolves the resulting
//! future on the matching `session_start` or a terminal `call_status`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::warn;

use crate::codec::{CallStatusValue, CallTarget, ServerMessage};
use crate::error::{BridgeError, Result};
use crate::registry::ConnectionId;
use crate::types::{CallId, Direction};

/// Picks a live connection to carry an outbound request.
pub trait ConnectionSelector: Send + Sync {
    fn pick_round_robin(&self) -> Option<ConnectionId>;
}

/// Sends a server message on a specific connection.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn send(&self, connection_id: ConnectionId, message: ServerMessage) -> Result<()>;
}

type Resolution = std::result::Result<(), BridgeError>;

pub struct OutboundCoordinator {
    pending: Mutex<HashMap<CallId, oneshot::Sender<Resolution>>>,
}

impl OutboundCoordinator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn initiate(
        &self,
        call_id: CallId,
        target: CallTarget,
        greeting: Option<String>,
        timeout: Duration,
        outbound_enabled: bool,
        selector: &dyn ConnectionSelector,
        sink: &dyn ConnectionSink,
    ) -> Result<()> {
        if !outbound_enabled {
            return Err(BridgeError::Disabled("outbound calling is disabled".to_string()));
        }

        let connection_id = selector
            .pick_round_robin()
            .ok_or(BridgeError::GatewayNotConnected)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(call_id.clone(), tx);

        if let Err(e) = sink
            .send(
                connection_id,
                ServerMessage::InitiateCall {
                    call_id: call_id.to_string(),
                    target,
                    message: greeting,
                },
            )
            .await
        {
            self.pending.lock().unwrap().remove(&call_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Err(BridgeError::Internal("pending outbound call dropped".to_string())),
            Err(_) => {
                self.pending.lock().unwrap().remove(&call_id);
                Err(BridgeError::Timeout("outbound ring timed out".to_string()))
            }
        }
    }

    /// Resolves a pending call on success: a `session_start` arrived for it
    /// with direction `outbound`.
    pub fn resolve_session_start(&self, call_id: &CallId, direction: Direction) {
        if direction != Direction::Outbound {
            return;
        }
        if let Some(tx) = self.pending.lock().unwrap().remove(call_id) {
            let _ = tx.send(Ok(()));
        }
    }

    /// Applies a `call_status` update: terminal statuses resolve the pending
    /// call with a failure; `ringing`/`answered` without a `session_start`
    /// are informational only and never resolve it.
    pub fn resolve_call_status(&self, call_id: &CallId, status: CallStatusValue, error: Option<String>) {
        let terminal = matches!(
            status,
            CallStatusValue::Failed | CallStatusValue::Busy | CallStatusValue::NoAnswer
        );
        if !terminal {
            return;
        }
        if let Some(tx) = self.pending.lock().unwrap().remove(call_id) {
            let message = error.unwrap_or_else(|| format!("{status:?}"));
            let _ = tx.send(Err(BridgeError::UpstreamProtocolError(message)));
        }
    }

    /// Fails any pending call on the given connection when it drops.
    pub fn fail_for_connection(&self, failed_call_ids: &[CallId]) {
        let mut pending = self.pending.lock().unwrap();
        for id in failed_call_ids {
            if let Some(tx) = pending.remove(id) {
                let _ = tx.send(Err(BridgeError::GatewayNotConnected));
            } else {
                warn!(call_id = %id, "no pending outbound call to fail for dropped connection");
            }
        }
    }
}

impl Default for OutboundCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SingleConnection(ConnectionId);

    impl ConnectionSelector for SingleConnection {
        fn pick_round_robin(&self) -> Option<ConnectionId> {
            Some(self.0)
        }
    }

    struct NoConnection;
    impl ConnectionSelector for NoConnection {
        fn pick_round_robin(&self) -> Option<ConnectionId> {
            None
        }
    }

    struct RecordingSink {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionSink for RecordingSink {
        async fn send(&self, _connection_id: ConnectionId, _message: ServerMessage) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn call_id(s: &str) -> CallId {
        CallId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn fails_immediately_when_disabled() {
        let coordinator = OutboundCoordinator::new();
        let selector = NoConnection;
        let sink = RecordingSink { sent: Arc::new(AtomicUsize::new(0)) };
        let result = coordinator
            .initiate(
                call_id("c1"),
                CallTarget::User { user_id: "u1".to_string() },
                None,
                Duration::from_millis(100),
                false,
                &selector,
                &sink,
            )
            .await;
        assert!(matches!(result, Err(BridgeError::Disabled(_))));
    }

    #[tokio::test]
    async fn fails_when_no_connection_available() {
        let coordinator = OutboundCoordinator::new();
        let selector = NoConnection;
        let sink = RecordingSink { sent: Arc::new(AtomicUsize::new(0)) };
        let result = coordinator
            .initiate(
                call_id("c1"),
                CallTarget::User { user_id: "u1".to_string() },
                None,
                Duration::from_millis(100),
                true,
                &selector,
                &sink,
            )
            .await;
        assert!(matches!(result, Err(BridgeError::GatewayNotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_resolution() {
        let coordinator = Arc::new(OutboundCoordinator::new());
        let selector = SingleConnection(ConnectionId::new());
        let sink = RecordingSink { sent: Arc::new(AtomicUsize::new(0)) };

        let result = coordinator
            .initiate(
                call_id("c2"),
                CallTarget::User { user_id: "u9".to_string() },
                None,
                Duration::from_millis(500),
                true,
                &selector,
                &sink,
            )
            .await;
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
    }

    #[tokio::test]
    async fn resolves_on_matching_session_start() {
        let coordinator = Arc::new(OutboundCoordinator::new());
        let selector = SingleConnection(ConnectionId::new());
        let sink = RecordingSink { sent: Arc::new(AtomicUsize::new(0)) };
        let coordinator2 = coordinator.clone();

        let handle = tokio::spawn(async move {
            coordinator2
                .initiate(
                    call_id("c3"),
                    CallTarget::User { user_id: "u1".to_string() },
                    None,
                    Duration::from_secs(5),
                    true,
                    &selector,
                    &sink,
                )
                .await
        });

        tokio::task::yield_now().await;
        coordinator.resolve_session_start(&call_id("c3"), Direction::Outbound);
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn ringing_status_does_not_resolve() {
        let coordinator = Arc::new(OutboundCoordinator::new());
        let selector = SingleConnection(ConnectionId::new());
        let sink = RecordingSink { sent: Arc::new(AtomicUsize::new(0)) };
        let coordinator2 = coordinator.clone();

        let handle = tokio::spawn(async move {
            coordinator2
                .initiate(
                    call_id("c4"),
                    CallTarget::Phone { number: "+1555".to_string() },
                    None,
                    Duration::from_millis(300),
                    true,
                    &selector,
                    &sink,
                )
                .await
        });

        tokio::task::yield_now().await;
        coordinator.resolve_call_status(&call_id("c4"), CallStatusValue::Ringing, None);
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
    }
}
