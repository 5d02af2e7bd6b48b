use std::{
    collections::hash_map::Entry,
    hash::Hash,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::FastHashMap;

/// Deduplicates shared resources by key.
///
/// The pool only keeps weak references, so an entry lives exactly as long as
/// some caller holds the resource. A dead entry is replaced on the next lookup.
pub(crate) struct ResourcePool<K, V> {
    inner: Mutex<FastHashMap<K, Weak<V>>>,
}

impl<K: Clone + Eq + Hash, V> ResourcePool<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(FastHashMap::default()),
        }
    }

    /// Get the live resource for `key`, or create one with `constructor`.
    ///
    /// The map stays locked while the constructor runs, so at most one
    /// resource per key is ever alive.
    pub(crate) fn get_or_init<F, E>(&self, key: K, constructor: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(K) -> Result<Arc<V>, E>,
    {
        let mut map_guard = self.inner.lock();
        match map_guard.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(strong) = entry.get().upgrade() {
                    return Ok(strong);
                }
                let strong = constructor(key)?;
                entry.insert(Arc::downgrade(&strong));
                Ok(strong)
            }
            Entry::Vacant(entry) => {
                let strong = constructor(key)?;
                entry.insert(Arc::downgrade(&strong));
                Ok(strong)
            }
        }
    }

    /// Number of entries whose resource is still alive.
    pub(crate) fn live_count(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|weak| weak.strong_count() != 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Barrier,
    };

    use super::*;

    #[test]
    fn deduplication() {
        let pool = ResourcePool::<u32, u32>::new();

        let mut counter = 0_u32;

        let arc1 = pool
            .get_or_init::<_, ()>(0, |key| {
                counter += 1;
                Ok(Arc::new(key))
            })
            .unwrap();

        assert_eq!(*arc1, 0);
        assert_eq!(counter, 1);

        let arc2 = pool
            .get_or_init::<_, ()>(0, |key| {
                counter += 1;
                Ok(Arc::new(key))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&arc1, &arc2));
        assert_eq!(counter, 1);
        assert_eq!(pool.live_count(), 1);

        drop(arc1);
        drop(arc2);
        assert_eq!(pool.live_count(), 0);

        let arc3 = pool
            .get_or_init::<_, ()>(0, |key| {
                counter += 1;
                Ok(Arc::new(key))
            })
            .unwrap();

        assert_eq!(*arc3, 0);
        assert_eq!(counter, 2);
    }

    #[test]
    fn failed_construction_leaves_no_entry() {
        let pool = ResourcePool::<u32, u32>::new();
        let result = pool.get_or_init(7, |_| Err("out of memory"));
        assert_eq!(result, Err("out of memory"));
        assert_eq!(pool.live_count(), 0);
        let arc = pool.get_or_init::<_, ()>(7, |key| Ok(Arc::new(key))).unwrap();
        assert_eq!(*arc, 7);
    }

    // Test name has "2_threads" in the name so nextest reserves two threads for it.
    #[test]
    fn concurrent_creation_2_threads() {
        struct Resources {
            pool: ResourcePool<u32, u32>,
            counter: AtomicU32,
            barrier: Barrier,
        }

        let resources = Arc::new(Resources {
            pool: ResourcePool::<u32, u32>::new(),
            counter: AtomicU32::new(0),
            barrier: Barrier::new(2),
        });

        fn thread_inner(resources: &Resources) -> Arc<u32> {
            resources.barrier.wait();
            resources
                .pool
                .get_or_init::<_, ()>(0, |key| {
                    // Long running constructor, so both threads are inside get_or_init.
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    resources.counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(key))
                })
                .unwrap()
        }

        let thread1 = std::thread::spawn({
            let resource_clone = Arc::clone(&resources);
            move || thread_inner(&resource_clone)
        });

        let arc0 = thread_inner(&resources);
        let arc1 = thread1.join().unwrap();

        assert_eq!(resources.counter.load(Ordering::Acquire), 1);
        assert!(Arc::ptr_eq(&arc0, &arc1));
    }
}
