use crate::protocol::ServerMessage;
use crate::types::PlayerId;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Connection identifier, allocated by the session handle
pub type ConnId = u64;

/// Per-connection outbound queue. The hub pushes serialized frames; a writer
/// task per connection drains them to the socket, so a slow peer never blocks
/// the coordinator.
pub type OutboundSink = mpsc::UnboundedSender<String>;

#[derive(Debug)]
struct Connection {
    sink: OutboundSink,
    /// The player who joined on this connection, once known. Used to render
    /// viewer-redacted payloads and to clean up the roster on eviction.
    player: Option<PlayerId>,
}

/// Registry of live connections with fire-and-forget fan-out.
///
/// Delivery failure (the connection task went away) silently evicts the
/// connection; the bound player id of each evicted connection is returned to
/// the caller so the roster can be cleaned up. Because the single-writer
/// coordinator pushes into each FIFO queue in call order, all live
/// connections observe publishes in the same relative order.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    connections: HashMap<ConnId, Connection>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn: ConnId, sink: OutboundSink) {
        self.connections.insert(conn, Connection { sink, player: None });
    }

    /// Remove a connection, returning the player bound to it (if any)
    pub fn unregister(&mut self, conn: ConnId) -> Option<PlayerId> {
        self.connections.remove(&conn).and_then(|c| c.player)
    }

    pub fn bind_player(&mut self, conn: ConnId, player: PlayerId) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.player = Some(player);
        }
    }

    pub fn viewer(&self, conn: ConnId) -> Option<&PlayerId> {
        self.connections.get(&conn).and_then(|c| c.player.as_ref())
    }

    /// Snapshot of (connection, bound player) pairs, for per-viewer rendering
    pub fn viewers(&self) -> Vec<(ConnId, Option<PlayerId>)> {
        self.connections
            .iter()
            .map(|(conn, c)| (*conn, c.player.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send one frame to one connection. Returns the bound players of any
    /// connection evicted by a failed delivery (at most one here).
    pub fn send_to(&mut self, conn: ConnId, message: &ServerMessage) -> Vec<PlayerId> {
        let Some(json) = encode(message) else {
            return Vec::new();
        };
        let delivered = self
            .connections
            .get(&conn)
            .map(|c| c.sink.send(json).is_ok())
            .unwrap_or(true);
        if delivered {
            Vec::new()
        } else {
            tracing::debug!(conn, "evicting dead connection");
            self.unregister(conn).into_iter().collect()
        }
    }

    /// Fan one frame out to every connection. Dead connections are evicted,
    /// never retried; their bound players are returned.
    pub fn publish(&mut self, message: &ServerMessage) -> Vec<PlayerId> {
        let Some(json) = encode(message) else {
            return Vec::new();
        };
        let dead: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.sink.send(json.clone()).is_err())
            .map(|(conn, _)| *conn)
            .collect();
        self.evict(dead)
    }

    fn evict(&mut self, dead: Vec<ConnId>) -> Vec<PlayerId> {
        let mut evicted = Vec::new();
        for conn in dead {
            tracing::debug!(conn, "evicting dead connection");
            if let Some(player) = self.unregister(conn) {
                evicted.push(player);
            }
        }
        evicted
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode outbound frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (OutboundSink, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn publish_reaches_all_live_connections_in_order() {
        let mut hub = BroadcastHub::new();
        let (tx_a, mut rx_a) = sink();
        let (tx_b, mut rx_b) = sink();
        hub.register(1, tx_a);
        hub.register(2, tx_b);

        hub.publish(&ServerMessage::Pong { timestamp: 1 });
        hub.publish(&ServerMessage::Pong { timestamp: 2 });

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(first.contains(r#""timestamp":1"#));
            assert!(second.contains(r#""timestamp":2"#));
        }
    }

    #[tokio::test]
    async fn dead_connection_is_evicted_and_bound_player_reported() {
        let mut hub = BroadcastHub::new();
        let (tx_a, rx_a) = sink();
        let (tx_b, mut rx_b) = sink();
        hub.register(1, tx_a);
        hub.register(2, tx_b);
        hub.bind_player(1, "p1".into());
        drop(rx_a);

        let evicted = hub.publish(&ServerMessage::Pong { timestamp: 1 });
        assert_eq!(evicted, vec!["p1".to_string()]);
        assert_eq!(hub.len(), 1);

        // The surviving connection still got the frame
        assert!(rx_b.recv().await.unwrap().contains("pong"));
    }

    #[tokio::test]
    async fn send_to_unknown_connection_is_a_no_op() {
        let mut hub = BroadcastHub::new();
        assert!(hub.send_to(42, &ServerMessage::Pong { timestamp: 1 }).is_empty());
    }

    #[tokio::test]
    async fn unregister_returns_bound_player() {
        let mut hub = BroadcastHub::new();
        let (tx, _rx) = sink();
        hub.register(7, tx);
        hub.bind_player(7, "p7".into());
        assert_eq!(hub.viewer(7), Some(&"p7".to_string()));
        assert_eq!(hub.unregister(7), Some("p7".to_string()));
        assert_eq!(hub.unregister(7), None);
    }
}
