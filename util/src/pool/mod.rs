
use std::collections::VecDeque;

use parking_lot::Mutex;

/// Bounded object pool.
///
/// Replaces the process-global registered caches of the C generation of this
/// stack: every owner holds its own pool and decides what may be recycled
/// before calling [`Pool::put`].
pub struct Pool<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Takes an item out of the pool, if any is retained.
    pub fn get(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Hands an item back to the pool.
    ///
    /// Returns the item again when the pool is already at capacity, so the
    /// caller can drop it (or do something smarter).
    pub fn put(&self, item: T) -> Option<T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            Some(item)
        } else {
            items.push_back(item);
            None
        }
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
