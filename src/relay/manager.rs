use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::channel::ClientChannel;
use crate::agent::AgentHandle;
use crate::error::RelayError;

/// Process-unique id assigned to a connection on accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct ConnectionInfo {
    connected_at: Instant,
}

/// Owns the shared agent handle and the set of active connections.
pub struct ConnectionManager {
    agent: Arc<dyn AgentHandle>,
    connections: RwLock<HashMap<ConnectionId, ConnectionInfo>>,
    next_id: AtomicU64,
    /// Mirrors `connections.len()` for lock-free reads.
    active: AtomicUsize,
}

impl ConnectionManager {
    pub fn new(agent: Arc<dyn AgentHandle>) -> Self {
        Self {
            agent,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
        }
    }

    pub fn agent(&self) -> &dyn AgentHandle {
        self.agent.as_ref()
    }

    /// Accepts the channel's handshake and registers it.
    ///
    /// A channel whose handshake fails is never registered.
    pub async fn connect<C>(&self, channel: &mut C) -> Result<ConnectionId, RelayError>
    where
        C: ClientChannel + ?Sized,
    {
        if let Err(err) = channel.accept().await {
            warn!(error = %err, "rejecting connection");
            return Err(err);
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut connections = self.connections.write().await;
        let _ = connections.insert(
            id,
            ConnectionInfo {
                connected_at: Instant::now(),
            },
        );
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        info!(conn_id = %id, active, "client connected");
        Ok(id)
    }

    /// Removes a connection. Returns `false` if it was already gone.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let Some(entry) = connections.remove(&id) else {
            return false;
        };
        let active = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(
            conn_id = %id,
            active,
            connected_secs = entry.connected_at.elapsed().as_secs(),
            "client disconnected"
        );
        true
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn is_active(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::agent::{ResponseStream, RunOptions};
    use crate::error::AgentError;
    use crate::relay::channel::Inbound;

    struct IdleAgent;

    #[async_trait]
    impl AgentHandle for IdleAgent {
        async fn arun(
            &self,
            _prompt: String,
            _options: RunOptions,
        ) -> Result<ResponseStream, AgentError> {
            Err(AgentError::Config("idle".to_string()))
        }
    }

    struct StubChannel {
        reject: bool,
    }

    #[async_trait]
    impl ClientChannel for StubChannel {
        async fn accept(&mut self) -> Result<(), RelayError> {
            if self.reject {
                Err(RelayError::Handshake("upgrade refused".to_string()))
            } else {
                Ok(())
            }
        }

        async fn recv(&mut self) -> Option<Result<Inbound, RelayError>> {
            None
        }

        async fn send_json(&mut self, _payload: &Value) -> Result<(), RelayError> {
            Ok(())
        }
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Arc::new(IdleAgent))
    }

    #[tokio::test]
    async fn connect_assigns_distinct_ids() {
        let manager = manager();
        let a = manager
            .connect(&mut StubChannel { reject: false })
            .await
            .expect("accepted");
        let b = manager
            .connect(&mut StubChannel { reject: false })
            .await
            .expect("accepted");

        assert_ne!(a, b);
        assert_eq!(manager.active_count(), 2);
        assert!(manager.is_active(a).await);
        assert!(manager.is_active(b).await);
    }

    #[tokio::test]
    async fn failed_handshake_is_not_registered() {
        let manager = manager();
        let err = manager
            .connect(&mut StubChannel { reject: true })
            .await
            .expect_err("rejected");

        assert!(matches!(err, RelayError::Handshake(_)));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_twice_is_a_no_op() {
        let manager = manager();
        let id = manager
            .connect(&mut StubChannel { reject: false })
            .await
            .expect("accepted");

        assert!(manager.disconnect(id).await);
        assert!(!manager.is_active(id).await);
        assert!(!manager.disconnect(id).await);
        assert!(!manager.is_active(id).await);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn connection_ids_display_with_prefix() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
    }
}
