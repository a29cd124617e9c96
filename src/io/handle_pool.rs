//! Pooled OS file-handle management.
//!
//! A process-global LRU of open handles, where each logical file stores
//! only its [`PoolKey`]; the pool maps `PoolKey` to a lazily (re)opened
//! handle. Removal from the LRU is O(1) and no file object needs a
//! back-reference into the pool's internal list.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{PosDbError, Result};

/// How a pooled file should be (re)opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Opened for random/sequential reads only.
    ReadOnly,
    /// Opened for reads and appends; reopening never truncates, since
    /// the file may hold data already written before eviction.
    ReadWrite,
}

/// A handle into [`HandlePool`]'s registry, owned by one logical file
/// object for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey(usize);

struct Registration {
    path: PathBuf,
    mode: OpenMode,
}

struct OpenSlot {
    handle: Arc<Mutex<File>>,
}

struct Inner {
    registrations: HashMap<usize, Registration>,
    open_slots: HashMap<usize, OpenSlot>,
    /// Most-recently-used at the back.
    mru: VecDeque<usize>,
}

/// A process-wide (per-[`HandlePool`] instance) cap on concurrently open
/// OS handles for "pooled" files. Acquiring a handle moves its key to
/// MRU; exceeding capacity closes the LRU handle. The bookkeeping mutex
/// here guards only the registry/LRU list, never an actual I/O call.
pub struct HandlePool {
    inner: Mutex<Inner>,
    capacity: usize,
    next_key: AtomicUsize,
}

impl HandlePool {
    pub fn new(capacity: usize) -> Arc<HandlePool> {
        Arc::new(HandlePool {
            inner: Mutex::new(Inner {
                registrations: HashMap::new(),
                open_slots: HashMap::new(),
                mru: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            next_key: AtomicUsize::new(0),
        })
    }

    /// Register a new pooled file. Does not open an OS handle yet.
    pub fn register(&self, path: PathBuf, mode: OpenMode) -> PoolKey {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        inner.registrations.insert(key, Registration { path, mode });
        PoolKey(key)
    }

    /// Drop a file's registration. If currently open, closes it
    /// without touching other slots' LRU order.
    pub fn unregister(&self, key: PoolKey) {
        let mut inner = self.inner.lock().unwrap();
        inner.registrations.remove(&key.0);
        inner.open_slots.remove(&key.0);
        inner.mru.retain(|k| *k != key.0);
    }

    /// Acquire the shared handle for `key`, opening (or reopening) the
    /// OS file if it isn't currently resident, and moving it to MRU.
    /// Evicts the LRU handle if this pushes the pool over capacity.
    pub fn acquire(&self, key: PoolKey) -> Result<Arc<Mutex<File>>> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(slot) = inner.open_slots.get(&key.0) {
            let handle = Arc::clone(&slot.handle);
            touch_mru(&mut inner.mru, key.0);
            return Ok(handle);
        }

        let registration = inner
            .registrations
            .get(&key.0)
            .expect("PoolKey used after unregister")
            ;
        let path = registration.path.clone();
        let mode = registration.mode;

        let file = open_for(&path, mode)?;
        let handle = Arc::new(Mutex::new(file));
        inner.open_slots.insert(key.0, OpenSlot { handle: Arc::clone(&handle) });
        touch_mru(&mut inner.mru, key.0);

        while inner.open_slots.len() > self.capacity {
            if let Some(evict) = inner.mru.pop_front() {
                if evict == key.0 {
                    // Shouldn't happen (just touched), but never evict
                    // what we just acquired.
                    inner.mru.push_front(evict);
                    break;
                }
                inner.open_slots.remove(&evict);
            } else {
                break;
            }
        }

        Ok(handle)
    }
}

fn touch_mru(mru: &mut VecDeque<usize>, key: usize) {
    mru.retain(|k| *k != key);
    mru.push_back(key);
}

fn open_for(path: &PathBuf, mode: OpenMode) -> Result<File> {
    let (opts, mode_name) = match mode {
        OpenMode::ReadOnly => (OpenOptions::new().read(true).clone(), "read"),
        OpenMode::ReadWrite => (
            OpenOptions::new().read(true).write(true).create(true).clone(),
            "read-write",
        ),
    };
    opts.open(path)
        .map_err(|e| PosDbError::OpenFailed { path: path.clone(), mode: mode_name, source: e })
}

/// A process-wide cap on concurrently open "direct" (non-pooled) file
/// handles, which keep their handle for their lifetime rather than
/// participating in LRU eviction. Exceeding the cap fails `open`.
pub struct DirectFileLimiter {
    max_open: u32,
    open_count: AtomicUsize,
}

/// An RAII guard for one direct-file open slot; releases on drop.
pub struct DirectFileGuard<'a> {
    limiter: &'a DirectFileLimiter,
}

impl DirectFileLimiter {
    pub fn new(max_open: u32) -> Self {
        DirectFileLimiter { max_open, open_count: AtomicUsize::new(0) }
    }

    /// Reserve a direct-file slot, or fail if the cap is already reached.
    pub fn acquire(&self) -> Result<DirectFileGuard<'_>> {
        loop {
            let current = self.open_count.load(Ordering::Relaxed);
            if current as u32 >= self.max_open {
                return Err(PosDbError::StringError(format!(
                    "direct open-file cap reached ({} files)",
                    self.max_open
                )));
            }
            if self
                .open_count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(DirectFileGuard { limiter: self });
            }
        }
    }
}

impl Drop for DirectFileGuard<'_> {
    fn drop(&mut self) {
        self.limiter.open_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn evicts_lru_when_over_capacity() {
        let dir = tempdir().unwrap();
        let pool = HandlePool::new(2);

        let mut keys = Vec::new();
        for i in 0..4 {
            let path = dir.path().join(format!("f{i}"));
            std::fs::write(&path, b"hello").unwrap();
            keys.push(pool.register(path, OpenMode::ReadOnly));
        }

        for &k in &keys {
            pool.acquire(k).unwrap();
        }

        let inner = pool.inner.lock().unwrap();
        assert!(inner.open_slots.len() <= 2);
    }

    #[test]
    fn reopen_after_eviction_does_not_truncate() {
        let dir = tempdir().unwrap();
        let pool = HandlePool::new(1);
        let path = dir.path().join("a");
        let key_a = pool.register(path.clone(), OpenMode::ReadWrite);
        {
            let handle = pool.acquire(key_a).unwrap();
            use std::io::Write;
            handle.lock().unwrap().write_all(b"persisted").unwrap();
        }

        let path_b = dir.path().join("b");
        let key_b = pool.register(path_b, OpenMode::ReadOnly);
        std::fs::write(dir.path().join("b"), b"x").unwrap();
        pool.acquire(key_b).unwrap(); // evicts a's slot

        pool.acquire(key_a).unwrap(); // reopens a
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"persisted");
    }

    #[test]
    fn direct_limiter_rejects_past_cap() {
        let limiter = DirectFileLimiter::new(2);
        let _a = limiter.acquire().unwrap();
        let _b = limiter.acquire().unwrap();
        assert!(limiter.acquire().is_err());
    }
}
