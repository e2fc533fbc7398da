// SPDX-License-Identifier: CC0-1.0

//! An in-process [`FastStore`] for tests and development.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{FastStore, Result};

/// A [`FastStore`] backed by process memory.
///
/// Honors TTLs (lazily, on access) and blocking list pops, so code written
/// against Redis behaves the same here. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Condvar,
}

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    expiries: HashMap<String, Instant>,
}

impl Inner {
    /// Drop `key` everywhere if its TTL has lapsed.
    fn purge_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if Instant::now() >= *deadline {
                self.expiries.remove(key);
                self.strings.remove(key);
                self.lists.remove(key);
                self.zsets.remove(key);
            }
        }
    }

    fn exists(&mut self, key: &str) -> bool {
        self.purge_expired(key);
        self.strings.contains_key(key)
            || self.lists.contains_key(key)
            || self.zsets.contains_key(key)
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore { MemoryStore::default() }
}

impl FastStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        Ok(inner.strings.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.expiries.remove(key);
        inner.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.strings.insert(key.to_string(), value.to_string());
        inner.expiries.insert(key.to_string(), Instant::now() + Duration::from_secs(ttl_secs));
        Ok(true)
    }

    fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(key.to_string(), value.to_string());
        inner.expiries.insert(key.to_string(), Instant::now() + Duration::from_millis(ttl_ms));
        Ok(true)
    }

    fn del(&self, keys: &[&str]) -> Result<u64> {
        let mut inner = self.inner.lock()?;
        let mut removed = 0;
        for key in keys {
            inner.purge_expired(key);
            let existed = inner.strings.remove(*key).is_some()
                | inner.lists.remove(*key).is_some()
                | inner.zsets.remove(*key).is_some();
            inner.expiries.remove(*key);
            if existed {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut inner = self.inner.lock()?;
        Ok(keys
            .iter()
            .map(|key| {
                inner.purge_expired(key);
                inner.strings.get(key.as_str()).cloned()
            })
            .collect())
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        let current: i64 = match inner.strings.get(key) {
            Some(v) => v.parse().map_err(|_| crate::StoreError::BadValue {
                key: key.to_string(),
                detail: "not an integer".to_string(),
            })?,
            None => 0,
        };
        let next = current + 1;
        inner.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        if !inner.exists(key) {
            return Ok(None);
        }
        Ok(inner
            .expiries
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs() as i64))
    }

    fn expire_nx(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        if !inner.exists(key) || inner.expiries.contains_key(key) {
            return Ok(false);
        }
        inner.expiries.insert(key.to_string(), Instant::now() + Duration::from_secs(ttl_secs));
        Ok(true)
    }

    fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        let len = list.len() as u64;
        drop(inner);
        self.pushed.notify_all();
        Ok(len)
    }

    fn lpop_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock()?;
        loop {
            inner.purge_expired(key);
            if let Some(list) = inner.lists.get_mut(key) {
                if let Some(value) = list.pop_front() {
                    return Ok(Some(value));
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let (guard, result) = self.pushed.wait_timeout(inner, remaining)?;
            inner = guard;
            if result.timed_out() {
                // One final check before giving up.
                inner.purge_expired(key);
                return Ok(inner.lists.get_mut(key).and_then(|l| l.pop_front()));
            }
        }
    }

    fn llen(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        Ok(inner.lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        let list = match inner.lists.get(key) {
            Some(l) => l,
            None => return Ok(vec![]),
        };
        let len = list.len() as i64;
        let clamp = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len - 1)
            }
        };
        if len == 0 {
            return Ok(vec![]);
        }
        let (start, stop) = (clamp(start), clamp(stop));
        if start > stop {
            return Ok(vec![]);
        }
        Ok(list.iter().skip(start as usize).take((stop - start + 1) as usize).cloned().collect())
    }

    fn zadd_nx(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        let zset = inner.zsets.entry(key.to_string()).or_default();
        if zset.contains_key(member) {
            return Ok(false);
        }
        zset.insert(member.to_string(), score);
        Ok(true)
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        Ok(inner.zsets.get(key).and_then(|z| z.get(member).copied()))
    }

    fn zrangebyscore(&self, key: &str, max: f64) -> Result<Vec<String>> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        let mut members: Vec<(String, f64)> = inner
            .zsets
            .get(key)
            .map(|z| z.iter().filter(|(_, s)| **s <= max).map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        Ok(members.into_iter().map(|(m, _)| m).collect())
    }

    fn zrange_all(&self, key: &str) -> Result<Vec<String>> { self.zrangebyscore(key, f64::INFINITY) }

    fn zrem(&self, key: &str, members: &[&str]) -> Result<u64> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        let zset = match inner.zsets.get_mut(key) {
            Some(z) => z,
            None => return Ok(0),
        };
        Ok(members.iter().filter(|m| zset.remove(**m).is_some()).count() as u64)
    }

    fn zremrangebyscore(&self, key: &str, max: f64) -> Result<u64> {
        let mut inner = self.inner.lock()?;
        inner.purge_expired(key);
        let zset = match inner.zsets.get_mut(key) {
            Some(z) => z,
            None => return Ok(0),
        };
        let doomed: Vec<String> =
            zset.iter().filter(|(_, s)| **s <= max).map(|(m, _)| m.clone()).collect();
        for member in &doomed {
            zset.remove(member);
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_ttl_expires() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 3600).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(store.ttl("k").unwrap().unwrap() > 3590);

        // A zero-ms lock key expires immediately.
        assert!(store.set_nx_px("lock", "t", 0).unwrap());
        assert!(store.set_nx_px("lock", "t2", 1000).unwrap());
        assert!(!store.set_nx_px("lock", "t3", 1000).unwrap());
    }

    #[test]
    fn counters_and_mget() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n").unwrap(), 1);
        assert_eq!(store.incr("n").unwrap(), 2);
        store.set("a", "1").unwrap();
        let got = store.mget(&["a".into(), "missing".into(), "n".into()]).unwrap();
        assert_eq!(got, vec![Some("1".into()), None, Some("2".into())]);
    }

    #[test]
    fn lists_block_and_drain() {
        let store = MemoryStore::new();
        store.rpush("q", "one").unwrap();
        store.rpush("q", "two").unwrap();
        assert_eq!(store.llen("q").unwrap(), 2);
        assert_eq!(store.lpop_blocking("q", Duration::from_millis(10)).unwrap().as_deref(), Some("one"));
        assert_eq!(store.lrange("q", 0, -1).unwrap(), vec!["two".to_string()]);
        assert_eq!(store.lpop_blocking("q", Duration::from_millis(10)).unwrap().as_deref(), Some("two"));
        assert_eq!(store.lpop_blocking("q", Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn zset_nx_and_ranges() {
        let store = MemoryStore::new();
        assert!(store.zadd_nx("z", "tx1", 10.0).unwrap());
        assert!(!store.zadd_nx("z", "tx1", 99.0).unwrap());
        assert!(store.zadd_nx("z", "tx2", 20.0).unwrap());
        assert_eq!(store.zscore("z", "tx1").unwrap(), Some(10.0));
        assert_eq!(store.zrangebyscore("z", 15.0).unwrap(), vec!["tx1".to_string()]);
        assert_eq!(store.zrange_all("z").unwrap(), vec!["tx1".to_string(), "tx2".to_string()]);
        assert_eq!(store.zremrangebyscore("z", 10.0).unwrap(), 1);
        assert_eq!(store.zrem("z", &["tx2", "ghost"]).unwrap(), 1);
    }
}
