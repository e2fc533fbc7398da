// SPDX-License-Identifier: CC0-1.0

//! Fast key-value store seam for the bmon daemons.
//!
//! All cross-thread and cross-process mutation in bmon goes through a store
//! that speaks a small subset of the Redis command set: plain keys with TTLs,
//! counters, lists (used as durable work queues), sorted sets (used as
//! time-scored indexes) and `SET NX PX` named locks. [`FastStore`] is that
//! subset as a trait; [`RedisStore`] implements it against a live Redis and
//! [`MemoryStore`] implements it in-process for tests and development.
//!
//! There are deliberately no in-memory singletons: callers hold an
//! `Arc<dyn FastStore>` and pass it down explicitly.

mod error;
mod lock;
mod memory;
mod redis_store;

use std::time::Duration;

#[doc(inline)]
pub use self::{
    error::StoreError,
    lock::{LockGuard, NamedLock},
    memory::MemoryStore,
    redis_store::RedisStore,
};

/// Crate-specific Result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The store operations the monitoring pipeline relies on.
///
/// Semantics follow the like-named Redis commands; TTLs are honored by every
/// implementation. Sorted-set scores are `f64` epoch seconds throughout.
pub trait FastStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// `SET key value EX ttl_secs`. Returns false only on store refusal.
    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// `SET key value NX PX ttl_ms`; the primitive behind named locks.
    fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;

    /// Delete keys, returning how many existed.
    fn del(&self, keys: &[&str]) -> Result<u64>;

    /// Batched multi-get; the result is positionally aligned with `keys`.
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Increment an integer key, creating it at zero.
    fn incr(&self, key: &str) -> Result<i64>;

    /// Remaining TTL in seconds; `None` when the key is absent or persistent.
    fn ttl(&self, key: &str) -> Result<Option<i64>>;

    /// Set a TTL only if the key has none yet.
    fn expire_nx(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Append to a list, returning the new length.
    fn rpush(&self, key: &str, value: &str) -> Result<u64>;

    /// Pop from the head of a list, blocking up to `timeout`.
    fn lpop_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    fn llen(&self, key: &str) -> Result<u64>;

    /// Inclusive range over a list; negative indexes count from the tail.
    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// `ZADD key NX score member`. Returns true when the member was added.
    fn zadd_nx(&self, key: &str, member: &str, score: f64) -> Result<bool>;

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Members with score in `(-inf, max]`, ascending.
    fn zrangebyscore(&self, key: &str, max: f64) -> Result<Vec<String>>;

    /// All members, ascending by score.
    fn zrange_all(&self, key: &str) -> Result<Vec<String>>;

    fn zrem(&self, key: &str, members: &[&str]) -> Result<u64>;

    /// Remove members with score in `(-inf, max]`, returning the count.
    fn zremrangebyscore(&self, key: &str, max: f64) -> Result<u64>;
}
