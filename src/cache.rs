//! # Identity-keyed LRU cache
//!
//! `WeakLru` memoizes a method per `(receiver, arguments)` pair. Receivers are
//! identified by the address of their `Arc` allocation, not by value, and the cache
//! only ever holds a `Weak` handle to them: dropping the last `Arc` drops the
//! receiver even while cache entries for it remain.
//!
//! Entries of dropped receivers are never returned. They are removed when a lookup
//! runs into them, swept before an insert would evict a live entry, or on demand via
//! [`WeakLru::purge_dead`] and [`WeakLru::forget`].
//!
//! ## Example
//!
//! ```rust
//! use embedkit::cache::WeakLru;
//! use std::sync::Arc;
//!
//! struct Tokenizer {
//!     lowercase: bool,
//! }
//!
//! impl Tokenizer {
//!     fn count(&self, text: &str) -> usize {
//!         text.split_whitespace().count()
//!     }
//! }
//!
//! # fn main() -> embedkit::Result<()> {
//! let cache = WeakLru::new(128)?;
//! let tokenizer = Arc::new(Tokenizer { lowercase: true });
//!
//! let count = cache.get_or_insert_with(&tokenizer, "a b c".to_string(), |t, text| t.count(text));
//! assert_eq!(count, 3);
//! assert_eq!(cache.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use lru::LruCache;
use std::convert::Infallible;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{Span, debug, debug_span};

/// Default number of entries kept by [`WeakLru`]
pub const DEFAULT_MAXSIZE: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey<A> {
    receiver: usize,
    args: A,
}

struct CacheEntry<R: ?Sized, V> {
    receiver: Weak<R>,
    value: V,
}

impl<R: ?Sized, V> CacheEntry<R, V> {
    fn is_live(&self) -> bool {
        self.receiver.strong_count() > 0
    }
}

/// Bounded LRU cache keyed by receiver identity and call arguments
pub struct WeakLru<R: ?Sized, A, V> {
    entries: Mutex<LruCache<CacheKey<A>, CacheEntry<R, V>>>,
    span: Span,
}

impl<R: ?Sized, A, V> WeakLru<R, A, V>
where
    A: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `maxsize` entries
    pub fn new(maxsize: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(maxsize)
            .ok_or_else(|| Error::Config("cache maxsize must be at least 1".to_string()))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            span: debug_span!("weak_lru", maxsize),
        })
    }

    /// Emit the cache's log events inside `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Return the cached value for `(receiver, args)` or compute and cache it
    pub fn get_or_insert_with<F>(&self, receiver: &Arc<R>, args: A, compute: F) -> V
    where
        F: FnOnce(&R, &A) -> V,
    {
        let result = self.try_get_or_insert_with(receiver, args, |receiver, args| {
            Ok::<V, Infallible>(compute(receiver, args))
        });
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with), but errors from
    /// `compute` are returned and not cached.
    ///
    /// The cache is not locked while `compute` runs, so it may call back into the
    /// cache.
    pub fn try_get_or_insert_with<F, E>(
        &self,
        receiver: &Arc<R>,
        args: A,
        compute: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce(&R, &A) -> std::result::Result<V, E>,
    {
        let key = CacheKey {
            receiver: identity(receiver),
            args,
        };
        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        let value = compute(receiver, &key.args)?;
        self.insert(receiver, key, value.clone());
        Ok(value)
    }

    /// Whether a live entry exists, without touching its recency
    pub fn contains(&self, receiver: &Arc<R>, args: &A) -> bool {
        let key = CacheKey {
            receiver: identity(receiver),
            args: args.clone(),
        };
        self.lock().peek(&key).is_some_and(CacheEntry::is_live)
    }

    /// Drop every entry cached for `receiver`. Returns the number removed.
    pub fn forget(&self, receiver: &Arc<R>) -> usize {
        let id = identity(receiver);
        let mut entries = self.lock();
        let keys: Vec<CacheKey<A>> = entries
            .iter()
            .filter(|(key, _)| key.receiver == id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    /// Drop the entries of receivers that no longer exist. Returns the number removed.
    pub fn purge_dead(&self) -> usize {
        let mut entries = self.lock();
        let removed = sweep(&mut entries);
        if removed > 0 {
            self.span
                .in_scope(|| debug!(removed, "Purged entries of dropped receivers"));
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lookup(&self, key: &CacheKey<A>) -> Option<V> {
        let mut entries = self.lock();
        let hit = entries
            .get(key)
            .map(|entry| entry.is_live().then(|| entry.value.clone()));
        match hit {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, receiver: &Arc<R>, key: CacheKey<A>, value: V) {
        let mut entries = self.lock();
        if !entries.contains(&key) && entries.len() >= entries.cap().get() {
            let removed = sweep(&mut entries);
            if removed == 0 && entries.pop_lru().is_some() {
                self.span
                    .in_scope(|| debug!("Evicted least recently used entry"));
            }
        }
        entries.put(
            key,
            CacheEntry {
                receiver: Arc::downgrade(receiver),
                value,
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey<A>, CacheEntry<R, V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn identity<R: ?Sized>(receiver: &Arc<R>) -> usize {
    Arc::as_ptr(receiver).cast::<()>() as usize
}

fn sweep<R: ?Sized, A, V>(entries: &mut LruCache<CacheKey<A>, CacheEntry<R, V>>) -> usize
where
    A: Hash + Eq + Clone,
{
    let dead: Vec<CacheKey<A>> = entries
        .iter()
        .filter(|(_, entry)| !entry.is_live())
        .map(|(key, _)| key.clone())
        .collect();
    for key in &dead {
        entries.pop(key);
    }
    dead.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Receiver {
        scale: u32,
    }

    impl Receiver {
        fn new(scale: u32) -> Arc<Self> {
            Arc::new(Self { scale })
        }

        fn scaled(&self, x: &u32) -> u32 {
            self.scale * x
        }
    }

    struct DropFlag<'a>(&'a AtomicUsize);

    impl Drop for DropFlag<'_> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_repeated_call_is_cached() {
        let cache = WeakLru::new(4).unwrap();
        let receiver = Receiver::new(3);
        let computed = Cell::new(0);

        for _ in 0..3 {
            let value = cache.get_or_insert_with(&receiver, 2, |r, x| {
                computed.set(computed.get() + 1);
                r.scaled(x)
            });
            assert_eq!(value, 6);
        }
        assert_eq!(computed.get(), 1);
        assert!(cache.contains(&receiver, &2));
        assert!(!cache.contains(&receiver, &5));
    }

    #[test]
    fn test_arguments_are_part_of_the_key() {
        let cache = WeakLru::new(4).unwrap();
        let receiver = Receiver::new(3);

        assert_eq!(cache.get_or_insert_with(&receiver, 1, |r, x| r.scaled(x)), 3);
        assert_eq!(cache.get_or_insert_with(&receiver, 2, |r, x| r.scaled(x)), 6);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_receivers_compared_by_identity() {
        let cache = WeakLru::new(4).unwrap();
        let first = Receiver::new(3);
        let second = Receiver::new(3);
        assert_eq!(first, second);
        let computed = Cell::new(0);

        for receiver in [&first, &second] {
            cache.get_or_insert_with(receiver, 1, |r, x| {
                computed.set(computed.get() + 1);
                r.scaled(x)
            });
        }
        assert_eq!(computed.get(), 2);

        let clone = Arc::clone(&first);
        cache.get_or_insert_with(&clone, 1, |_, _| unreachable!("cached by identity"));
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = WeakLru::new(2).unwrap();
        let receivers: Vec<Arc<Receiver>> = (1..=3).map(Receiver::new).collect();
        let computed = Cell::new(0);
        let call = |receiver: &Arc<Receiver>| {
            cache.get_or_insert_with(receiver, 1, |r, x| {
                computed.set(computed.get() + 1);
                r.scaled(x)
            })
        };

        call(&receivers[0]);
        call(&receivers[1]);
        call(&receivers[0]);
        call(&receivers[2]);
        assert_eq!(computed.get(), 3);
        assert_eq!(cache.len(), 2);

        // receivers[1] was least recently used
        call(&receivers[0]);
        assert_eq!(computed.get(), 3);
        call(&receivers[1]);
        assert_eq!(computed.get(), 4);
    }

    #[test]
    fn test_cache_does_not_keep_receiver_alive() {
        let drops = AtomicUsize::new(0);
        let cache = WeakLru::new(4).unwrap();
        let receiver = Arc::new(DropFlag(&drops));
        let weak = Arc::downgrade(&receiver);

        cache.get_or_insert_with(&receiver, "key", |_, _| 42);
        drop(receiver);

        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(weak.upgrade().is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_dead(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_sweeps_dead_entries_before_evicting() {
        let cache = WeakLru::new(2).unwrap();
        let short_lived = Receiver::new(1);
        let kept = Receiver::new(2);
        let late = Receiver::new(3);
        let computed = Cell::new(0);
        let call = |receiver: &Arc<Receiver>| {
            cache.get_or_insert_with(receiver, 1, |r, x| {
                computed.set(computed.get() + 1);
                r.scaled(x)
            })
        };

        call(&kept);
        call(&short_lived);
        drop(short_lived);
        call(&late);
        call(&kept);

        assert_eq!(computed.get(), 2 + 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_forget_removes_receiver_entries() {
        let cache = WeakLru::new(8).unwrap();
        let first = Receiver::new(1);
        let second = Receiver::new(2);
        for x in 0..3 {
            cache.get_or_insert_with(&first, x, |r, x| r.scaled(x));
        }
        cache.get_or_insert_with(&second, 0, |r, x| r.scaled(x));

        assert_eq!(cache.forget(&first), 3);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&second, &0));
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = WeakLru::new(2).unwrap();
        let receiver = Receiver::new(2);

        let result: std::result::Result<u32, &str> =
            cache.try_get_or_insert_with(&receiver, 1, |_, _| Err("unavailable"));
        assert_eq!(result, Err("unavailable"));
        assert!(cache.is_empty());

        let result: std::result::Result<u32, &str> =
            cache.try_get_or_insert_with(&receiver, 1, |r, x| Ok(r.scaled(x)));
        assert_eq!(result, Ok(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_maxsize_is_config_error() {
        let result = WeakLru::<Receiver, u32, u32>::new(0);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_default_maxsize() {
        let cache = WeakLru::<Receiver, u32, u32>::new(DEFAULT_MAXSIZE).unwrap();
        assert_eq!(cache.capacity(), 128);
    }
}
