// SPDX-License-Identifier: Apache-2.0
//! The room registry backing the event channel gateway's broadcast and
//! the request/response gateway's entire-room broadcast.
//!
//! A room is the unordered set of live connections for one tenant,
//! named `store:<tenantId>` conceptually (the name itself is never
//! serialized; tenants are keyed by id directly). Mutations (join/leave)
//! and reads (broadcast enumeration) are serialized per room via a
//! `std::sync::Mutex`: every critical section is synchronous (map
//! lookups and sender clones), with the guard dropped before any
//! `.await`, so there is no need to pay for an async mutex here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use syncd_proto::OutboundEvent;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Outbound channel capacity per connection. A slow or stalled peer can
/// accumulate this many pending broadcasts before sends start failing;
/// a failed send is treated as "peer is gone" by callers.
const CONN_CHANNEL_CAPACITY: usize = 256;

/// Opaque per-connection identifier, unique for the registry's lifetime.
pub type ConnId = u64;

/// A tenant-scoped room: every live connection authenticated for that
/// tenant, keyed by [`ConnId`].
#[derive(Default)]
struct Room {
    conns: HashMap<ConnId, mpsc::Sender<String>>,
}

/// The process-wide room registry. One instance is shared (via `Arc`)
/// across every connection handler and HTTP request handler.
#[derive(Default)]
pub struct RoomRegistry {
    next_conn_id: AtomicU64,
    rooms: Mutex<HashMap<Uuid, Room>>,
}

impl RoomRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `tenant_id`'s room, allocating a fresh connection id and its
    /// outbound channel. The caller is responsible for forwarding
    /// received strings (JSON-encoded [`OutboundEvent`]s) to the
    /// underlying transport, and for calling [`RoomRegistry::leave`] on
    /// disconnect.
    pub fn join(&self, tenant_id: Uuid) -> (ConnId, mpsc::Receiver<String>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CONN_CHANNEL_CAPACITY);
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.entry(tenant_id).or_default().conns.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Remove `conn_id` from `tenant_id`'s room. Idempotent — safe to
    /// call even if the connection was never joined or already left.
    pub fn leave(&self, tenant_id: Uuid, conn_id: ConnId) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(room) = rooms.get_mut(&tenant_id) {
            room.conns.remove(&conn_id);
            if room.conns.is_empty() {
                rooms.remove(&tenant_id);
            }
        }
    }

    /// Broadcast `event` to every connection in `tenant_id`'s room except
    /// `sender` (the connection whose own mutation produced the event).
    pub async fn broadcast_excluding(&self, tenant_id: Uuid, sender: ConnId, event: &OutboundEvent) {
        self.broadcast_filtered(tenant_id, event, |conn_id| conn_id != sender).await;
    }

    /// Broadcast `event` to every connection in `tenant_id`'s room,
    /// including any connection that might itself have originated the
    /// underlying mutation (used for REST-originated mutations, where
    /// there is no "sender" connection to exclude).
    pub async fn broadcast_all(&self, tenant_id: Uuid, event: &OutboundEvent) {
        self.broadcast_filtered(tenant_id, event, |_| true).await;
    }

    async fn broadcast_filtered(
        &self,
        tenant_id: Uuid,
        event: &OutboundEvent,
        mut include: impl FnMut(ConnId) -> bool,
    ) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(err) => {
                warn!(?err, %tenant_id, "failed to serialize outbound event");
                return;
            }
        };

        let targets: Vec<mpsc::Sender<String>> = {
            let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            let Some(room) = rooms.get(&tenant_id) else {
                return;
            };
            room.conns
                .iter()
                .filter(|(conn_id, _)| include(**conn_id))
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        for tx in targets {
            if tx.send(payload.clone()).await.is_err() {
                warn!(%tenant_id, "dropped broadcast to a stalled or closed connection");
            }
        }
    }

    /// Number of live connections in `tenant_id`'s room, for tests and
    /// diagnostics.
    #[must_use]
    pub fn room_size(&self, tenant_id: Uuid) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.get(&tenant_id).map_or(0, |r| r.conns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncd_proto::OutboundEvent;
    use tokio::time::{timeout, Duration};

    fn sample_event() -> OutboundEvent {
        OutboundEvent::deleted("a.txt", chrono_now())
    }

    // Avoid pulling a full chrono dependency into this crate just for
    // tests; a fixed-epoch deserialization round-trip is enough since we
    // only assert on the serialized payload's shape here.
    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc)
    }

    async fn recv_json(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let raw = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no timeout")
            .expect("channel open");
        serde_json::from_str(&raw).expect("valid json")
    }

    #[tokio::test]
    async fn broadcast_excluding_skips_sender() {
        let registry = RoomRegistry::new();
        let tenant_id = Uuid::new_v4();
        let (sender_id, mut sender_rx) = registry.join(tenant_id);
        let (_other_id, mut other_rx) = registry.join(tenant_id);

        registry.broadcast_excluding(tenant_id, sender_id, &sample_event()).await;

        let received = recv_json(&mut other_rx).await;
        assert_eq!(received["event"], "file-deleted");
        assert!(sender_rx.try_recv().is_err(), "sender must not receive its own broadcast");
    }

    #[tokio::test]
    async fn broadcast_all_includes_every_connection() {
        let registry = RoomRegistry::new();
        let tenant_id = Uuid::new_v4();
        let (_a, mut rx_a) = registry.join(tenant_id);
        let (_b, mut rx_b) = registry.join(tenant_id);

        registry.broadcast_all(tenant_id, &sample_event()).await;

        recv_json(&mut rx_a).await;
        recv_json(&mut rx_b).await;
    }

    #[tokio::test]
    async fn leave_removes_connection_from_future_broadcasts() {
        let registry = RoomRegistry::new();
        let tenant_id = Uuid::new_v4();
        let (conn_id, mut rx) = registry.join(tenant_id);
        registry.leave(tenant_id, conn_id);

        registry.broadcast_all(tenant_id, &sample_event()).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.room_size(tenant_id), 0);
    }

    #[tokio::test]
    async fn rooms_are_isolated_per_tenant() {
        let registry = RoomRegistry::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let (_a, mut rx_a) = registry.join(tenant_a);
        let (_b, mut rx_b) = registry.join(tenant_b);

        registry.broadcast_all(tenant_a, &sample_event()).await;

        recv_json(&mut rx_a).await;
        assert!(rx_b.try_recv().is_err());
    }
}
