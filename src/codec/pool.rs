//! Check-out/check-in pool for reusable codec state.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use crate::observability::metrics;

/// Items kept in a [`Pool`].
pub trait Reusable: Default {
    /// Clear state left over from the previous user.
    fn reset(&mut self);

    /// Whether the item is worth keeping; oversized buffers are dropped.
    fn retain(&self) -> bool {
        true
    }
}

/// A mutex-guarded free list.
///
/// Checking out never blocks on other users for longer than the push/pop,
/// and an empty list falls back to a fresh item.
pub struct Pool<T> {
    name: &'static str,
    free: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Reusable> Pool<T> {
    pub const fn new(name: &'static str, max_idle: usize) -> Self {
        Self {
            name,
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Check out an item. It goes back to the pool when the guard drops.
    pub fn get(&self) -> Pooled<'_, T> {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let mut item = match reused {
            Some(item) => item,
            None => {
                metrics::record_pool_miss(self.name);
                T::default()
            }
        };
        item.reset();
        Pooled { pool: self, item }
    }

    fn put(&self, item: T) {
        if !item.retain() {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(item);
        }
    }

    /// Number of idle items.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Scoped checkout from a [`Pool`].
pub struct Pooled<'p, T: Reusable> {
    pool: &'p Pool<T>,
    item: T,
}

impl<T: Reusable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Reusable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Reusable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        buf: Vec<u8>,
    }

    impl Reusable for Scratch {
        fn reset(&mut self) {
            self.buf.clear();
        }

        fn retain(&self) -> bool {
            self.buf.capacity() <= 64
        }
    }

    #[test]
    fn returns_on_drop() {
        let pool: Pool<Scratch> = Pool::new("test", 4);
        {
            let mut s = pool.get();
            s.buf.extend_from_slice(b"abc");
        }
        assert_eq!(pool.idle(), 1);
        let s = pool.get();
        assert!(s.buf.is_empty(), "reset on checkout");
        assert!(s.buf.capacity() >= 3, "buffer reused");
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn returns_on_unwind() {
        let pool: Pool<Scratch> = Pool::new("test", 4);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _s = pool.get();
            panic!("boom");
        }));
        assert!(res.is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn drops_oversized_and_caps_idle() {
        let pool: Pool<Scratch> = Pool::new("test", 1);
        {
            let mut s = pool.get();
            s.buf.reserve(1024);
        }
        assert_eq!(pool.idle(), 0);

        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
