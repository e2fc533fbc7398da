// SPDX-License-Identifier: CC0-1.0

//! Durable log-cursor management.
//!
//! The authoritative cursor lives in the edge-local fast store so the
//! high-volume mempool path can advance it without hammering the hub. A
//! minute-cadence flush upserts it into the hub's store; on boot the edge
//! reads the cursor back from the hub, so losing the local fast store only
//! costs up to a minute of replayed (idempotently handled) lines.

use std::sync::Arc;
use std::time::Duration;

use bmon_events::{wire, LogProgress};
use bmon_kv::{FastStore, NamedLock};
use chrono::{DateTime, Utc};

use crate::queues::HubClient;

const SEPARATOR: &str = " | ";

/// Hub-side mirror key prefix; the hub writes it on every cursor upsert so
/// edges can recover their position without querying the row store.
pub const HUB_CURSOR_PREFIX: &str = "logprogress";

/// Manages persisting a cursor into the bitcoind logfile.
pub struct CursorManager {
    store: Arc<dyn FastStore>,
    host: String,
    key: String,
}

impl std::fmt::Debug for CursorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CursorManager({})", self.key)
    }
}

impl CursorManager {
    pub fn new(store: Arc<dyn FastStore>, host: &str) -> CursorManager {
        CursorManager { store, key: format!("logpos.{}", host), host: host.to_string() }
    }

    fn lock(&self) -> NamedLock<'_> {
        NamedLock::new(&*self.store, &self.key, Duration::from_secs(1))
    }

    /// The current cursor, if any.
    pub fn getpos(&self) -> bmon_kv::Result<Option<(String, DateTime<Utc>)>> {
        let _guard = self.lock().acquire(Duration::from_secs(1))?;
        let got = match self.store.get(&self.key)? {
            Some(got) => got,
            None => return Ok(None),
        };
        match got.split_once(SEPARATOR) {
            Some((linehash, ts)) => {
                let ts = DateTime::parse_from_rfc3339(ts)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some((linehash.to_string(), ts)))
            }
            None => Ok(None),
        }
    }

    /// Persist the logfile position locally.
    ///
    /// Cached in the fast store because high-volume events would overwhelm
    /// the hub with writes to maintain this state.
    pub fn mark(&self, linehash: &str) -> bmon_kv::Result<()> {
        let _guard = self.lock().acquire(Duration::from_secs(1))?;
        self.store.set(&self.key, &format!("{}{}{}", linehash, SEPARATOR, Utc::now().to_rfc3339()))
    }

    /// Flush the local position into the hub's store.
    pub fn flush(&self, hub: &HubClient) -> bmon_kv::Result<()> {
        let (linehash, timestamp) = match self.getpos()? {
            Some(got) => got,
            None => return Ok(()),
        };

        log::info!("flushing logfile pos for {} ({} @ {})", self.host, linehash, timestamp);
        hub.send(&wire::log_progress_record(&LogProgress {
            hostname: self.host.clone(),
            timestamp,
            loghash: linehash,
        }))
    }

    /// Read the boot-time cursor from the hub store's mirror key.
    ///
    /// The local fast store is deliberately not consulted: the hub copy is
    /// the one that survives edge reprovisioning.
    pub fn boot_cursor(hub_store: &dyn FastStore, host: &str) -> Option<String> {
        let key = format!("{}.{}", HUB_CURSOR_PREFIX, host);
        match hub_store.get(&key) {
            Ok(Some(value)) => value.split_once(SEPARATOR).map(|(hash, _)| hash.to_string()),
            Ok(None) => None,
            Err(e) => {
                log::warn!("could not read boot cursor for {}: {}", host, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use bmon_kv::MemoryStore;

    use super::*;

    #[test]
    fn mark_and_read_back() {
        let store = Arc::new(MemoryStore::new());
        let cursor = CursorManager::new(store.clone(), "node0");

        assert!(cursor.getpos().unwrap().is_none());
        cursor.mark("abc123").unwrap();

        let (hash, ts) = cursor.getpos().unwrap().unwrap();
        assert_eq!(hash, "abc123");
        assert!((Utc::now() - ts).num_seconds() < 5);

        cursor.mark("def456").unwrap();
        assert_eq!(cursor.getpos().unwrap().unwrap().0, "def456");
    }

    #[test]
    fn flush_sends_log_progress() {
        let local = Arc::new(MemoryStore::new());
        let hub_store = Arc::new(MemoryStore::new());
        let hub = HubClient::new(hub_store.clone());
        let cursor = CursorManager::new(local, "node0");

        cursor.mark("abc123").unwrap();
        cursor.flush(&hub).unwrap();

        let raw = hub_store
            .lpop_blocking(wire::INGEST_QUEUE, Duration::from_millis(10))
            .unwrap()
            .unwrap();
        match wire::parse_ingest(&raw).unwrap() {
            wire::Ingest::LogProgress(p) => {
                assert_eq!(p.hostname, "node0");
                assert_eq!(p.loghash, "abc123");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn boot_cursor_reads_hub_mirror() {
        let hub_store = MemoryStore::new();
        assert!(CursorManager::boot_cursor(&hub_store, "node0").is_none());

        hub_store.set("logprogress.node0", "deadbeef | 2022-10-17T17:57:43Z").unwrap();
        assert_eq!(CursorManager::boot_cursor(&hub_store, "node0").as_deref(), Some("deadbeef"));
    }
}
