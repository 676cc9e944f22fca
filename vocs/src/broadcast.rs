use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::api::ClientSink;
use crate::Socket;

/// The four broadcast topic namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Role,
    Loop,
    User,
    System,
}

/// Set-valued map from topic to subscribed sockets.
#[derive(Debug, Default)]
pub struct BroadcastRegistry {
    topics: HashMap<(Namespace, String), HashSet<Socket>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a socket to a topic.
    pub fn set(&mut self, namespace: Namespace, topic: &str, socket: Socket) {
        self.topics
            .entry((namespace, topic.to_string()))
            .or_default()
            .insert(socket);
    }

    /// Removes the socket from every topic.
    pub fn drop_socket(&mut self, socket: Socket) {
        self.topics.retain(|_, sockets| {
            sockets.remove(&socket);
            !sockets.is_empty()
        });
    }

    /// Sockets subscribed to a topic, in stable order.
    pub fn sockets(&self, namespace: Namespace, topic: &str) -> Vec<Socket> {
        let mut sockets: Vec<Socket> = self
            .topics
            .get(&(namespace, topic.to_string()))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        sockets.sort_unstable();
        sockets
    }

    pub fn is_subscribed(&self, namespace: Namespace, topic: &str, socket: Socket) -> bool {
        self.topics
            .get(&(namespace, topic.to_string()))
            .map(|set| set.contains(&socket))
            .unwrap_or(false)
    }
}

/// Best-effort fan-out of a broadcast frame to a topic.
///
/// A failed delivery is logged and skipped; it neither rolls back state
/// nor ends the socket. Returns the number of successful sends.
pub async fn send(
    sockets: &[Socket],
    message: &Value,
    sink: &Arc<dyn ClientSink + Send + Sync>,
) -> usize {
    let mut delivered = 0;
    for socket in sockets {
        match sink.send(*socket, message).await {
            Ok(()) => delivered += 1,
            Err(err) => {
                log::warn!("broadcast to socket {socket} failed: {err}");
            }
        }
    }
    delivered
}
