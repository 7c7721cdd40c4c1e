//! In-process named locks with a deferred-rerun flag.
//!
//! A pass holds the lock for its calendar. A trigger that cannot get the
//! lock within its timeout leaves a rerun request instead of waiting; the
//! holder checks that request when it finishes and keeps the lock for
//! exactly one more pass. Setting the request and releasing the lock happen
//! under the same mutex, so a request is never lost between the holder's
//! last check and its release.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockEntry {
    held: bool,
    generation: u64,
    rerun_requested: bool,
}

/// Registry of named locks.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, LockEntry>>,
    released: Condvar,
}

impl LockManager {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Waits up to `timeout` for `name`.
    pub fn acquire(self: &Arc<Self>, name: &str, timeout: Duration) -> Option<LockGuard> {
        self.acquire_inner(name, timeout, false)
    }

    /// Like [`acquire`](Self::acquire), but on timeout records a rerun
    /// request for the current holder.
    pub fn acquire_or_defer(self: &Arc<Self>, name: &str, timeout: Duration) -> Option<LockGuard> {
        self.acquire_inner(name, timeout, true)
    }

    fn acquire_inner(
        self: &Arc<Self>,
        name: &str,
        timeout: Duration,
        defer: bool,
    ) -> Option<LockGuard> {
        let deadline = Instant::now() + timeout;
        let mut locks = self.locks.lock();
        loop {
            let entry = locks.entry(name.to_string()).or_default();
            if !entry.held {
                entry.held = true;
                entry.generation += 1;
                return Some(LockGuard {
                    manager: Arc::clone(self),
                    name: name.to_string(),
                    generation: entry.generation,
                    released: false,
                });
            }
            if Instant::now() >= deadline {
                if defer {
                    entry.rerun_requested = true;
                    tracing::debug!(lock = name, "lock busy; rerun requested");
                }
                return None;
            }
            self.released.wait_until(&mut locks, deadline);
        }
    }

    /// Force-releases `name`. Any outstanding guard becomes inert.
    ///
    /// Used at startup to clear a lock left behind by a crashed pass.
    pub fn steal(&self, name: &str) -> bool {
        let mut locks = self.locks.lock();
        let Some(entry) = locks.get_mut(name) else {
            return false;
        };
        let was_held = entry.held;
        entry.held = false;
        entry.rerun_requested = false;
        entry.generation += 1;
        drop(locks);
        if was_held {
            tracing::warn!(lock = name, "stale lock stolen");
            self.released.notify_all();
        }
        was_held
    }

    /// Returns true if `name` is held.
    pub fn is_held(&self, name: &str) -> bool {
        self.locks.lock().get(name).is_some_and(|entry| entry.held)
    }

    /// Returns true if a rerun is pending for `name`.
    pub fn rerun_requested(&self, name: &str) -> bool {
        self.locks
            .lock()
            .get(name)
            .is_some_and(|entry| entry.rerun_requested)
    }

    fn release(&self, name: &str, generation: u64) {
        let mut locks = self.locks.lock();
        if let Some(entry) = locks.get_mut(name) {
            if entry.generation == generation && entry.held {
                entry.held = false;
                drop(locks);
                self.released.notify_all();
            }
        }
    }
}

/// Ownership of a named lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    manager: Arc<LockManager>,
    name: String,
    generation: u64,
    released: bool,
}

impl LockGuard {
    /// Returns the lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes a pass.
    ///
    /// If a rerun was requested the request is cleared and the guard is
    /// handed back for one more pass. Otherwise the lock is released.
    pub fn finish(mut self) -> Option<LockGuard> {
        let mut locks = self.manager.locks.lock();
        let Some(entry) = locks.get_mut(&self.name) else {
            self.released = true;
            return None;
        };
        if entry.generation != self.generation {
            self.released = true;
            return None;
        }
        if entry.rerun_requested {
            entry.rerun_requested = false;
            drop(locks);
            return Some(self);
        }
        entry.held = false;
        drop(locks);
        self.released = true;
        self.manager.released.notify_all();
        None
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release(&self.name, self.generation);
        }
    }
}
