use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::Socket;

pub const DEFAULT_CAPACITY: usize = 1024;

/// One in-flight request awaiting a collaborator reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncEntry {
    pub socket: Socket,
    pub request: Value,
}

pub type OnTimeoutHdlrFn = Box<
    dyn (Fn(AsyncEntry) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;

struct Pending {
    entry: AsyncEntry,
    timer: JoinHandle<()>,
}

/// UUID-keyed table of in-flight cross-component requests.
///
/// Every entry either resolves via [`AsyncRequests::resolve`] or fires
/// the timeout handler and vanishes. Must be driven inside a tokio
/// runtime; the per-entry timers are spawned tasks.
pub struct AsyncRequests {
    timeout: Duration,
    capacity: usize,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    on_timeout: Arc<Mutex<Option<OnTimeoutHdlrFn>>>,
}

impl AsyncRequests {
    pub fn new(timeout: Duration) -> Self {
        Self::with_capacity(timeout, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(timeout: Duration, capacity: usize) -> Self {
        Self {
            timeout,
            capacity,
            pending: Arc::new(Mutex::new(HashMap::new())),
            on_timeout: Arc::new(Mutex::new(None)),
        }
    }

    /// Installs the handler invoked with the entry of every expired
    /// request.
    pub fn on_timeout(&self, handler: OnTimeoutHdlrFn) {
        *self.on_timeout.lock() = Some(handler);
    }

    /// Registers a request under its uuid and arms its timer.
    ///
    /// Returns false when the uuid is already pending. A full table with
    /// no expired entry means requests are leaking somewhere; that is a
    /// programming error, not load.
    pub fn insert(&self, uuid: &str, entry: AsyncEntry) -> bool {
        {
            let pending = self.pending.lock();
            if pending.contains_key(uuid) {
                return false;
            }
            assert!(
                pending.len() < self.capacity,
                "async request table exhausted with no expired entries"
            );
        }

        let timer = {
            let uuid = uuid.to_string();
            let timeout = self.timeout;
            let pending = Arc::clone(&self.pending);
            let on_timeout = Arc::clone(&self.on_timeout);

            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;

                let expired = pending.lock().remove(&uuid).map(|pending| pending.entry);
                let Some(entry) = expired else {
                    return;
                };

                let handler_future = {
                    let guard = on_timeout.lock();
                    guard.as_ref().map(|handler| handler(entry))
                };
                if let Some(future) = handler_future {
                    future.await;
                }
            })
        };

        match self.pending.lock().entry(uuid.to_string()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                // lost a race against a concurrent insert for the uuid
                timer.abort();
                false
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(Pending { entry, timer });
                true
            }
        }
    }

    /// Removes and returns the entry for `uuid`, disarming its timer.
    pub fn resolve(&self, uuid: &str) -> Option<AsyncEntry> {
        let pending = self.pending.lock().remove(uuid)?;
        pending.timer.abort();
        Some(pending.entry)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn entry(socket: Socket) -> AsyncEntry {
        AsyncEntry {
            socket,
            request: json!({"event": "media", "uuid": "u"}),
        }
    }

    #[tokio::test]
    async fn test_insert_and_resolve() {
        let table = AsyncRequests::new(Duration::from_secs(5));

        assert!(table.insert("a", entry(1)));
        assert!(table.insert("b", entry(2)));
        assert!(!table.insert("a", entry(3)));
        assert_eq!(table.len(), 2);

        let resolved = table.resolve("a").unwrap();
        assert_eq!(resolved.socket, 1);
        assert!(table.resolve("a").is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fires_handler() {
        let table = AsyncRequests::new(Duration::from_millis(20));

        let fired = Arc::new(AtomicUsize::new(0));
        let seen_socket = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            let seen_socket = Arc::clone(&seen_socket);
            table.on_timeout(Box::new(move |entry| {
                let fired = Arc::clone(&fired);
                let seen_socket = Arc::clone(&seen_socket);
                Box::pin(async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                    seen_socket.store(entry.socket as usize, Ordering::SeqCst);
                })
            }));
        }

        assert!(table.insert("x", entry(7)));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(seen_socket.load(Ordering::SeqCst), 7);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_disarms_timer() {
        let table = AsyncRequests::new(Duration::from_millis(20));

        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            table.on_timeout(Box::new(move |_| {
                let fired = Arc::clone(&fired);
                Box::pin(async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            }));
        }

        assert!(table.insert("x", entry(1)));
        assert!(table.resolve("x").is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[should_panic(expected = "async request table exhausted")]
    async fn test_exhaustion_is_fatal() {
        let table = AsyncRequests::with_capacity(Duration::from_secs(5), 2);
        assert!(table.insert("a", entry(1)));
        assert!(table.insert("b", entry(2)));
        table.insert("c", entry(3));
    }
}
