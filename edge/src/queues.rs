// SPDX-License-Identifier: CC0-1.0

//! Edge-local durable work queues and their workers.
//!
//! Two bounded-concern queues live in the edge fast store: `events` carries
//! one task per low-volume event, `mempool` carries the firehose of mempool
//! admissions. Each has its own worker pool so mempool volume cannot starve
//! block events. Workers forward to the hub's ingest queue; the cursor is
//! only advanced after the hub enqueue succeeds, except for mempool accepts
//! which mark at local-enqueue time (an accepted lossy approximation for the
//! high-volume path).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bmon_events::{wire, Event};
use bmon_kv::FastStore;

use crate::cursor::CursorManager;
use crate::peers::PeerCache;
use crate::ship::MempoolArchiver;

/// Low-volume events awaiting forwarding to the hub.
pub const EVENTS_QUEUE: &str = "bmon:q:events";
/// Mempool admissions awaiting archival.
pub const MEMPOOL_QUEUE: &str = "bmon:q:mempool";

/// How long a worker blocks on an empty queue before re-checking shutdown.
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle for pushing wire records onto the hub's ingest queue.
pub struct HubClient {
    store: Arc<dyn FastStore>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HubClient")
    }
}

impl HubClient {
    pub fn new(store: Arc<dyn FastStore>) -> HubClient { HubClient { store } }

    /// Enqueue one record; returns once the hub store acknowledges it.
    pub fn send(&self, record: &serde_json::Value) -> bmon_kv::Result<()> {
        self.store.rpush(wire::INGEST_QUEUE, &record.to_string())?;
        Ok(())
    }
}

/// The two edge-local queues.
pub struct EdgeQueues {
    local: Arc<dyn FastStore>,
}

impl std::fmt::Debug for EdgeQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EdgeQueues")
    }
}

impl EdgeQueues {
    pub fn new(local: Arc<dyn FastStore>) -> EdgeQueues { EdgeQueues { local } }

    /// Route an extracted event onto the right queue.
    ///
    /// High-volume events mark the cursor here, at enqueue time.
    pub fn enqueue(
        &self,
        event: &Event,
        linehash: &str,
        cursor: &CursorManager,
    ) -> bmon_kv::Result<()> {
        let payload = wire::event_record(event, Some(linehash)).to_string();
        if event.is_high_volume() {
            self.local.rpush(MEMPOOL_QUEUE, &payload)?;
            cursor.mark(linehash)?;
        } else {
            self.local.rpush(EVENTS_QUEUE, &payload)?;
        }
        Ok(())
    }

    pub fn events_depth(&self) -> bmon_kv::Result<u64> { self.local.llen(EVENTS_QUEUE) }

    pub fn mempool_depth(&self) -> bmon_kv::Result<u64> { self.local.llen(MEMPOOL_QUEUE) }
}

/// Everything a queue worker needs.
#[derive(Clone)]
pub struct WorkerCtx {
    pub local: Arc<dyn FastStore>,
    pub hub: Arc<HubClient>,
    pub cursor: Arc<CursorManager>,
    pub peers: Arc<PeerCache>,
    pub archiver: Arc<Mutex<MempoolArchiver>>,
    pub shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for WorkerCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerCtx")
    }
}

/// Drain the low-volume events queue until shutdown.
pub fn run_events_worker(ctx: &WorkerCtx) {
    while !ctx.shutdown.load(Ordering::Relaxed) {
        let raw = match ctx.local.lpop_blocking(EVENTS_QUEUE, POP_TIMEOUT) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("events queue pop failed: {}", e);
                std::thread::sleep(POP_TIMEOUT);
                continue;
            }
        };
        if let Err(e) = forward_event(ctx, &raw) {
            log::error!("failed to forward event: {}: {}", e, raw);
        }
    }
}

/// Forward one event payload to the hub, resolving peer references first.
fn forward_event(ctx: &WorkerCtx, raw: &str) -> anyhow::Result<()> {
    let (mut event, linehash) = match wire::parse_ingest(raw) {
        Ok(wire::Ingest::Event { event, linehash }) => (event, linehash),
        Ok(other) => anyhow::bail!("unexpected payload on events queue: {:?}", other),
        Err(e) => {
            // A poison payload would dead-letter forever; drop it.
            anyhow::bail!("undecodable payload dropped: {}", e)
        }
    };

    if !resolve_peer(ctx, &mut event)? {
        // Unresolvable peer reference: drop the event so the hub never sees
        // a dangling reference, but still advance past the line.
        if let Some(hash) = &linehash {
            ctx.cursor.mark(hash)?;
        }
        return Ok(());
    }

    ctx.hub.send(&wire::event_record(&event, linehash.as_deref()))?;
    if let Some(hash) = &linehash {
        ctx.cursor.mark(hash)?;
    }
    Ok(())
}

/// Fill out the stable peer reference on events that carry a `peer_num`.
///
/// Returns false when the reference cannot be resolved even after a
/// synchronous re-sync.
fn resolve_peer(ctx: &WorkerCtx, event: &mut Event) -> anyhow::Result<bool> {
    let model = event.model();
    let (peer_num, slot) = match event {
        Event::MempoolReject(e) => (e.peer_num, &mut e.peer_id),
        Event::BlockDownloadTimeout(e) => (e.peer_num, &mut e.peer_id),
        _ => return Ok(true),
    };

    match ctx.peers.resolve(peer_num, &ctx.hub)? {
        Some(fingerprint) => {
            *slot = Some(fingerprint);
            Ok(true)
        }
        None => {
            log::error!("could not resolve peer {} for {}; discarding event", peer_num, model);
            Ok(false)
        }
    }
}

/// Drain the mempool queue until shutdown: archive locally, then feed the
/// hub's propagation aggregator.
pub fn run_mempool_worker(ctx: &WorkerCtx) {
    while !ctx.shutdown.load(Ordering::Relaxed) {
        let raw = match ctx.local.lpop_blocking(MEMPOOL_QUEUE, POP_TIMEOUT) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("mempool queue pop failed: {}", e);
                std::thread::sleep(POP_TIMEOUT);
                continue;
            }
        };

        let (event, linehash) = match wire::parse_ingest(&raw) {
            Ok(wire::Ingest::Event { event, linehash }) => (event, linehash),
            other => {
                log::error!("undecodable mempool payload dropped: {:?}", other);
                continue;
            }
        };
        let accept = match &event {
            Event::MempoolAccept(accept) => accept,
            other => {
                log::error!("non-mempool event on mempool queue: {}", other.model());
                continue;
            }
        };

        if let Err(e) = archive_one(ctx, accept) {
            log::error!("failed to archive mempool accept: {}", e);
        }
        if let Err(e) = ctx.hub.send(&wire::event_record(&event, linehash.as_deref())) {
            log::error!("failed to forward mempool accept: {}", e);
        }
    }
}

/// Append one record to the rolling file, serialized by the append lock.
fn archive_one(ctx: &WorkerCtx, accept: &bmon_events::MempoolAccept) -> anyhow::Result<()> {
    let lock = bmon_kv::NamedLock::new(&*ctx.local, "mempool-activity-cache", Duration::from_secs(1));
    let guard = lock.acquire(Duration::from_secs(2))?;
    if guard.is_none() {
        anyhow::bail!("could not take mempool append lock");
    }
    let mut archiver = ctx.archiver.lock().map_err(|_| anyhow::anyhow!("archiver poisoned"))?;
    archiver.append(accept)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use bmon_events::MempoolAccept;
    use bmon_kv::MemoryStore;
    use chrono::Utc;

    use super::*;

    fn accept_event() -> Event {
        Event::MempoolAccept(MempoolAccept {
            host: "node0".into(),
            timestamp: Utc::now(),
            txhash: "fa4f".into(),
            peer_num: 11,
            pool_size_txns: 1,
            pool_size_kb: 2,
        })
    }

    #[test]
    fn high_volume_routes_to_mempool_and_marks_cursor() {
        let local: Arc<dyn FastStore> = Arc::new(MemoryStore::new());
        let queues = EdgeQueues::new(local.clone());
        let cursor = CursorManager::new(local.clone(), "node0");

        queues.enqueue(&accept_event(), "hash-a", &cursor).unwrap();
        assert_eq!(queues.mempool_depth().unwrap(), 1);
        assert_eq!(queues.events_depth().unwrap(), 0);
        // Cursor marked at enqueue time for the high-volume path.
        assert_eq!(cursor.getpos().unwrap().unwrap().0, "hash-a");

        let reorg = Event::ReorgEvent(bmon_events::ReorgEvent {
            host: "node0".into(),
            finished_timestamp: Utc::now(),
            min_height: 1,
            max_height: 2,
            old_blockhashes: vec![],
            new_blockhashes: vec![],
        });
        queues.enqueue(&reorg, "hash-b", &cursor).unwrap();
        assert_eq!(queues.events_depth().unwrap(), 1);
        // Low-volume events do not advance the cursor until the hub accepts.
        assert_eq!(cursor.getpos().unwrap().unwrap().0, "hash-a");
    }
}
