// SPDX-License-Identifier: CC0-1.0

//! The production [`FastStore`]: a thin wrapper over a Redis connection.

use std::sync::Mutex;
use std::time::Duration;

use crate::{FastStore, Result, StoreError};

/// A [`FastStore`] backed by a single Redis connection.
///
/// The connection lives behind a mutex; on any transport error it is dropped
/// and reopened on the next call, so a Redis restart costs one failed
/// operation rather than a wedged daemon.
pub struct RedisStore {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RedisStore({:?})", self.client.get_connection_info().addr)
    }
}

impl RedisStore {
    /// Connect to the Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// The connection itself is established lazily on first use.
    pub fn open(url: &str) -> Result<RedisStore> {
        let client = redis::Client::open(url)?;
        Ok(RedisStore { client, conn: Mutex::new(None) })
    }

    /// Run `f` against the live connection, reconnecting first if needed.
    fn query<T>(&self, f: impl Fn(&mut redis::Connection) -> redis::RedisResult<T>) -> Result<T> {
        let mut slot = self.conn.lock()?;
        if slot.is_none() {
            *slot = Some(self.client.get_connection()?);
        }
        let conn = slot.as_mut().ok_or(StoreError::Poisoned)?;
        match f(conn) {
            Ok(v) => Ok(v),
            Err(e) => {
                // Force a fresh connection on the next call.
                log::warn!("redis call failed, dropping connection: {}", e);
                *slot = None;
                Err(e.into())
            }
        }
    }
}

impl FastStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(|c| redis::cmd("GET").arg(key).query(c))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.query(|c| redis::cmd("SET").arg(key).arg(value).query(c))
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let ok: Option<String> =
            self.query(|c| redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs).query(c))?;
        Ok(ok.is_some())
    }

    fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let ok: Option<String> = self.query(|c| {
            redis::cmd("SET").arg(key).arg(value).arg("NX").arg("PX").arg(ttl_ms).query(c)
        })?;
        Ok(ok.is_some())
    }

    fn del(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(|c| redis::cmd("DEL").arg(keys).query(c))
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        // MGET with a single key returns a scalar, so always go through the
        // array form.
        self.query(|c| redis::cmd("MGET").arg(keys).query(c))
    }

    fn incr(&self, key: &str) -> Result<i64> {
        self.query(|c| redis::cmd("INCR").arg(key).query(c))
    }

    fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let ttl: i64 = self.query(|c| redis::cmd("TTL").arg(key).query(c))?;
        Ok(if ttl < 0 { None } else { Some(ttl) })
    }

    fn expire_nx(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let set: i64 =
            self.query(|c| redis::cmd("EXPIRE").arg(key).arg(ttl_secs).arg("NX").query(c))?;
        Ok(set == 1)
    }

    fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        self.query(|c| redis::cmd("RPUSH").arg(key).arg(value).query(c))
    }

    fn lpop_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let got: Option<(String, String)> = self.query(|c| {
            redis::cmd("BLPOP").arg(key).arg(timeout.as_secs_f64()).query(c)
        })?;
        Ok(got.map(|(_, value)| value))
    }

    fn llen(&self, key: &str) -> Result<u64> {
        self.query(|c| redis::cmd("LLEN").arg(key).query(c))
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.query(|c| redis::cmd("LRANGE").arg(key).arg(start).arg(stop).query(c))
    }

    fn zadd_nx(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        let added: i64 = self.query(|c| {
            redis::cmd("ZADD").arg(key).arg("NX").arg(score).arg(member).query(c)
        })?;
        Ok(added > 0)
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.query(|c| redis::cmd("ZSCORE").arg(key).arg(member).query(c))
    }

    fn zrangebyscore(&self, key: &str, max: f64) -> Result<Vec<String>> {
        self.query(|c| redis::cmd("ZRANGEBYSCORE").arg(key).arg("-inf").arg(max).query(c))
    }

    fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        self.query(|c| redis::cmd("ZRANGE").arg(key).arg(0).arg(-1).query(c))
    }

    fn zrem(&self, key: &str, members: &[&str]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(|c| redis::cmd("ZREM").arg(key).arg(members).query(c))
    }

    fn zremrangebyscore(&self, key: &str, max: f64) -> Result<u64> {
        self.query(|c| redis::cmd("ZREMRANGEBYSCORE").arg(key).arg("-inf").arg(max).query(c))
    }
}
