//! Registry of status-subscriber connections.
//!
//! Connections join when a client opens the status socket and leave when
//! it closes. Every join receives one snapshot immediately; every broadcast
//! computes a single snapshot, serializes it once, and fans it out.

use std::sync::Arc;

use dashmap::DashMap;

use crate::domain::{MachineError, SessionId, StatusProjector};
use crate::error::SendError;
use crate::service::dispatcher::BroadcastSink;
use crate::ws::channel::Connection;

/// Outcome of one [`ConnectionRegistry::broadcast_snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the snapshot was queued for.
    pub delivered: usize,
    /// Connections whose queue was full; the snapshot was dropped for them.
    pub dropped: usize,
    /// Dead connections removed during the broadcast.
    pub removed: usize,
}

/// Concurrent set of status subscribers keyed by session id.
///
/// Sends happen outside the map's shard locks, so a slow connection never
/// holds up joins, leaves, or sends to other connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<SessionId, Arc<Connection>>,
    projector: Arc<dyn StatusProjector>,
}

impl ConnectionRegistry {
    /// Creates an empty registry reading snapshots from `projector`.
    #[must_use]
    pub fn new(projector: Arc<dyn StatusProjector>) -> Self {
        Self {
            connections: DashMap::new(),
            projector,
        }
    }

    /// Registers a connection and pushes one snapshot to it.
    ///
    /// A connection already registered under the same session id is
    /// replaced. If the initial push fails the connection is removed again.
    pub fn join(&self, connection: Arc<Connection>) {
        let id = connection.id();
        if self
            .connections
            .insert(id, Arc::clone(&connection))
            .is_some()
        {
            tracing::warn!(session_id = %id, "replaced existing status connection");
        }
        tracing::info!(session_id = %id, total = self.count(), "status subscriber joined");

        match self.send_snapshot_to(&connection) {
            Ok(()) => {}
            Err(SendError::Serialize) => {}
            Err(err) => {
                tracing::warn!(
                    session_id = %id,
                    error = %err,
                    "initial snapshot failed; dropping connection"
                );
                self.remove_exact(&connection);
            }
        }
    }

    /// Removes a connection. Idempotent; unknown ids are ignored.
    pub fn leave(&self, id: SessionId) {
        if self.connections.remove(&id).is_some() {
            tracing::info!(session_id = %id, total = self.count(), "status subscriber left");
        }
    }

    /// Number of registered connections. Observational only.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if a connection with this id is registered.
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Computes one snapshot and queues it on a single connection.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Serialize`] if the snapshot could not be built
    /// or serialized, otherwise the connection's send error.
    pub fn send_snapshot_to(&self, connection: &Connection) -> Result<(), SendError> {
        let text = self.snapshot_text().map_err(|_| SendError::Serialize)?;
        connection.send_text(text)
    }

    /// Computes one snapshot and queues it on every registered connection.
    ///
    /// Closed connections are removed. A full queue drops this snapshot for
    /// that connection only.
    ///
    /// # Errors
    ///
    /// Returns the [`MachineError`] if the snapshot could not be computed;
    /// nothing is sent in that case.
    pub fn broadcast_snapshot(&self) -> Result<BroadcastReport, MachineError> {
        let text = self.snapshot_text()?;
        let targets: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut report = BroadcastReport::default();
        for connection in targets {
            match connection.send_text(Arc::clone(&text)) {
                Ok(()) => report.delivered += 1,
                Err(SendError::Full) => {
                    report.dropped += 1;
                    tracing::warn!(
                        session_id = %connection.id(),
                        send_errors = connection.send_errors(),
                        "status subscriber lagging; snapshot dropped"
                    );
                }
                Err(SendError::Closed | SendError::Serialize) => {
                    if self.remove_exact(&connection) {
                        report.removed += 1;
                        tracing::warn!(
                            session_id = %connection.id(),
                            "removed dead status subscriber"
                        );
                    }
                }
            }
        }
        tracing::debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            removed = report.removed,
            "status snapshot broadcast"
        );
        Ok(report)
    }

    fn snapshot_text(&self) -> Result<Arc<str>, MachineError> {
        let status = self.projector.project().inspect_err(|err| {
            tracing::error!(error = %err, "failed to compute machine status snapshot");
        })?;
        serde_json::to_string(&status)
            .map(Arc::from)
            .map_err(|err| {
                tracing::error!(error = %err, "failed to serialize machine status snapshot");
                MachineError::Other(err.to_string())
            })
    }

    /// Removes `connection` only if it is still the registered entry for
    /// its id, so a newer connection reusing the id is left alone.
    fn remove_exact(&self, connection: &Arc<Connection>) -> bool {
        self.connections
            .remove_if(&connection.id(), |_, current| Arc::ptr_eq(current, connection))
            .is_some()
    }
}

impl BroadcastSink for ConnectionRegistry {
    fn broadcast(&self) {
        // Failures are already logged; the next trigger retries.
        let _ = self.broadcast_snapshot();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::MachineStatus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeProjector {
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl StatusProjector for FakeProjector {
        fn project(&self) -> Result<MachineStatus, MachineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(MachineError::NotConfigured);
            }
            Ok(MachineStatus {
                enabled: true,
                homed: false,
                busy: false,
                current_task: None,
                motion_planner_type: None,
                axes: Vec::new(),
                heads: Vec::new(),
                feeders: Vec::new(),
                job: None,
            })
        }
    }

    fn registry() -> (ConnectionRegistry, Arc<FakeProjector>) {
        let projector = Arc::new(FakeProjector::default());
        (
            ConnectionRegistry::new(Arc::clone(&projector) as Arc<dyn StatusProjector>),
            projector,
        )
    }

    #[tokio::test]
    async fn join_sends_snapshot() {
        let (registry, _) = registry();
        let (conn, mut outbox) = Connection::channel(SessionId::new(), 4);
        registry.join(Arc::clone(&conn));
        assert_eq!(registry.count(), 1);
        let Some(text) = outbox.next().await else {
            panic!("expected a snapshot");
        };
        assert!(text.contains("\"enabled\":true"));
    }

    #[test]
    fn join_of_dead_connection_is_removed() {
        let (registry, _) = registry();
        let (conn, outbox) = Connection::channel(SessionId::new(), 4);
        drop(outbox);
        registry.join(conn);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn join_keeps_connection_when_projection_fails() {
        let (registry, projector) = registry();
        projector.fail.store(true, Ordering::SeqCst);
        let (conn, _outbox) = Connection::channel(SessionId::new(), 4);
        registry.join(conn);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn leave_is_idempotent() {
        let (registry, _) = registry();
        let (conn, _outbox) = Connection::channel(SessionId::new(), 4);
        let id = conn.id();
        registry.join(conn);
        registry.leave(id);
        registry.leave(id);
        registry.leave(SessionId::new());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn rejoin_with_same_id_keeps_single_entry() {
        let (registry, _) = registry();
        let id = SessionId::new();
        let (first, _o1) = Connection::channel(id, 4);
        let (second, _o2) = Connection::channel(id, 4);
        registry.join(first);
        registry.join(second);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn broadcast_skips_and_removes_dead_connections() {
        let (registry, _) = registry();
        let (alive, _alive_outbox) = Connection::channel(SessionId::new(), 4);
        let (dead, dead_outbox) = Connection::channel(SessionId::new(), 4);
        registry.join(Arc::clone(&alive));
        registry.join(Arc::clone(&dead));
        drop(dead_outbox);

        let Ok(report) = registry.broadcast_snapshot() else {
            panic!("broadcast should succeed");
        };
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, 1);
        assert!(registry.contains(alive.id()));
        assert!(!registry.contains(dead.id()));
    }

    #[test]
    fn full_queue_drops_snapshot_but_keeps_connection() {
        let (registry, _) = registry();
        let (conn, _outbox) = Connection::channel(SessionId::new(), 1);
        registry.join(Arc::clone(&conn));
        let Ok(report) = registry.broadcast_snapshot() else {
            panic!("broadcast should succeed");
        };
        assert_eq!(report.dropped, 1);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn projection_failure_aborts_broadcast() {
        let (registry, projector) = registry();
        let (conn, _outbox) = Connection::channel(SessionId::new(), 4);
        registry.join(conn);
        projector.fail.store(true, Ordering::SeqCst);
        assert_eq!(
            registry.broadcast_snapshot(),
            Err(MachineError::NotConfigured)
        );
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn broadcast_projects_once_per_call() {
        let (registry, projector) = registry();
        let mut outboxes = Vec::new();
        for _ in 0..3 {
            let (conn, outbox) = Connection::channel(SessionId::new(), 4);
            registry.join(conn);
            outboxes.push(outbox);
        }
        let before = projector.calls.load(Ordering::SeqCst);
        registry.broadcast();
        assert_eq!(projector.calls.load(Ordering::SeqCst), before + 1);
    }
}
