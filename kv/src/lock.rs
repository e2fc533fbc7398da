// SPDX-License-Identifier: CC0-1.0

//! TTL-bounded named locks over the fast store.
//!
//! A lock is a `SET NX PX` key; expiry releases it forcibly, so no holder may
//! block past its TTL. These locks serialize cross-process work (log cursor
//! writes, mempool file appends, per-txid aggregation) and are best-effort by
//! design: a lost lock means a dropped observation, not corruption.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::{FastStore, Result};

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

/// How often acquisition re-polls a contended lock.
const ACQUIRE_POLL: Duration = Duration::from_millis(10);

/// A named mutual-exclusion region backed by the fast store.
pub struct NamedLock<'a> {
    store: &'a dyn FastStore,
    key: String,
    ttl: Duration,
}

impl fmt::Debug for NamedLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamedLock({}, ttl {:?})", self.key, self.ttl)
    }
}

impl<'a> NamedLock<'a> {
    /// A lock named `name` whose holder is evicted after `ttl`.
    pub fn new(store: &'a dyn FastStore, name: &str, ttl: Duration) -> NamedLock<'a> {
        NamedLock { store, key: format!("lock.{}", name), ttl }
    }

    /// Try to take the lock once, without waiting.
    pub fn try_acquire(&self) -> Result<Option<LockGuard<'a>>> {
        let token = next_token();
        if self.store.set_nx_px(&self.key, &token, self.ttl.as_millis() as u64)? {
            Ok(Some(LockGuard { store: self.store, key: self.key.clone() }))
        } else {
            Ok(None)
        }
    }

    /// Take the lock, polling for up to `wait`.
    pub fn acquire(&self, wait: Duration) -> Result<Option<LockGuard<'a>>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(ACQUIRE_POLL);
        }
    }
}

/// Holds a [`NamedLock`]; dropping it releases the lock.
pub struct LockGuard<'a> {
    store: &'a dyn FastStore,
    key: String,
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockGuard({})", self.key)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.del(&[&self.key]) {
            // The TTL will release it eventually.
            log::warn!("failed to release lock {}: {}", self.key, e);
        }
    }
}

/// A process-unique lock token.
fn next_token() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("{}-{}-{}", std::process::id(), LOCK_SEQ.fetch_add(1, Ordering::Relaxed), nanos)
}
