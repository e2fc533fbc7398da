// SPDX-License-Identifier: CC0-1.0

//! The bmon edge daemon: one process per monitored `bitcoind`.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use bmon_edge::config::Config;
use bmon_edge::cursor::CursorManager;
use bmon_edge::listeners::{Extracted, LineRouter};
use bmon_edge::logfollow::LogFollower;
use bmon_edge::metrics::{serve_metrics, EdgeMetrics};
use bmon_edge::peers::PeerCache;
use bmon_edge::queues::{run_events_worker, run_mempool_worker, EdgeQueues, HubClient, WorkerCtx};
use bmon_edge::ship::{DirStorage, MempoolArchiver};
use bmon_edge::{hostinfo, poller};
use bmon_events::{is_pre_taproot, linehash, wire, Event};
use bmon_kv::{FastStore, RedisStore};
use bmon_rpc::{Auth, Client};
use crossbeam_channel::{bounded, tick};

/// Worker pool sizes. Mempool volume must not starve block events, so the
/// pools are independent.
const EVENT_WORKERS: usize = 4;
const MEMPOOL_WORKERS: usize = 2;

/// Peer re-syncs triggered by pongs are coalesced to this interval.
const PEER_SYNC_MIN_INTERVAL: Duration = Duration::from_secs(30);

/// Cadences for the periodic jobs.
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const PEER_STATS_INTERVAL: Duration = Duration::from_secs(60);
const PEER_RECONCILE_INTERVAL: Duration = Duration::from_secs(10 * 60);
const SHIP_INTERVAL: Duration = Duration::from_secs(120 * 60);

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;
    run(config)
}

fn run(config: Config) -> anyhow::Result<()> {
    let local: Arc<dyn FastStore> =
        Arc::new(RedisStore::open(&config.redis_local_url).context("edge fast store")?);
    let hub_store: Arc<dyn FastStore> =
        Arc::new(RedisStore::open(&config.redis_server_url).context("hub fast store")?);
    let hub = Arc::new(HubClient::new(hub_store.clone()));

    let auth = match (&config.rpc_user, &config.rpc_password) {
        (Some(user), Some(pass)) => Auth::UserPass(user.clone(), pass.clone()),
        _ => Auth::None,
    };
    let rpc = Arc::new(Client::new(&config.rpc_url, auth)?);

    // Announce (or re-announce) this host's identity; the hub upsert is
    // idempotent.
    let host = hostinfo::build_host(&config, &rpc).context("building host record")?;
    let pre_taproot = is_pre_taproot(&host.bitcoin_version).unwrap_or(false);
    hub.send(&wire::host_record(&host))?;
    log::info!("announced host {} ({})", host.name, host.bitcoin_version);

    let cursor = Arc::new(CursorManager::new(local.clone(), &config.hostname));
    let peers = Arc::new(PeerCache::new(local.clone(), &config.hostname, rpc.clone()));
    let queues = Arc::new(EdgeQueues::new(local.clone()));
    let archiver = Arc::new(Mutex::new(
        MempoolArchiver::new(&config.mempool_cache_path).context("initializing mempool archive")?,
    ));
    let storage = Arc::new(DirStorage::new(&config.object_store_path));
    let shutdown = Arc::new(AtomicBool::new(false));

    let ctx = WorkerCtx {
        local: local.clone(),
        hub: hub.clone(),
        cursor: cursor.clone(),
        peers: peers.clone(),
        archiver: archiver.clone(),
        shutdown: shutdown.clone(),
    };

    for i in 0..EVENT_WORKERS {
        let ctx = ctx.clone();
        thread::Builder::new()
            .name(format!("events-worker-{}", i))
            .spawn(move || run_events_worker(&ctx))?;
    }
    for i in 0..MEMPOOL_WORKERS {
        let ctx = ctx.clone();
        thread::Builder::new()
            .name(format!("mempool-worker-{}", i))
            .spawn(move || run_mempool_worker(&ctx))?;
    }

    // Pong observations request peer re-syncs through this channel; bursts
    // coalesce.
    let (peer_tx, peer_rx) = bounded::<u64>(32);
    {
        let peers = peers.clone();
        let hub = hub.clone();
        thread::Builder::new().name("peer-sync".into()).spawn(move || {
            let mut last_sync: Option<Instant> = None;
            loop {
                let num = match peer_rx.recv() {
                    Ok(num) => num,
                    Err(_) => return,
                };
                if last_sync.map(|at| at.elapsed() < PEER_SYNC_MIN_INTERVAL).unwrap_or(false) {
                    continue;
                }
                if let Err(e) = peers.sync(&hub) {
                    log::warn!("pong-triggered peer sync (peer={}) failed: {}", num, e);
                }
                last_sync = Some(Instant::now());
            }
        })?;
    }

    let metrics = EdgeMetrics::new()?;
    {
        let metrics = metrics.clone();
        let registry = metrics.registry.clone();
        let addr = config.exporter_addr.clone();
        let cursor = cursor.clone();
        let queues = queues.clone();
        let archiver = archiver.clone();
        let log_path = config.log_path.clone();
        thread::Builder::new().name("metrics".into()).spawn(move || {
            let refresh = move || -> anyhow::Result<()> {
                if let Some((_, at)) = cursor.getpos()? {
                    metrics.last_log_seen_at.set(at.timestamp() as f64);
                }
                metrics.event_queue_depth.set(queues.events_depth()? as i64);
                metrics.mempool_queue_depth.set(queues.mempool_depth()? as i64);
                if let Ok(archiver) = archiver.lock() {
                    metrics.mempool_cache_size.set(archiver.current_size() as f64 / (1 << 20) as f64);
                }
                if let Ok(meta) = std::fs::metadata(&log_path) {
                    metrics.debug_log_size.set(meta.len() as f64 / (1 << 20) as f64);
                }
                Ok(())
            };
            if let Err(e) = serve_metrics(registry, &addr, refresh) {
                log::error!("metrics exporter died: {}", e);
            }
        })?;
    }

    // Periodic jobs: cursor flush, peer stats and reconcile, sync probe,
    // mempool ship.
    {
        let cursor = cursor.clone();
        let hub = hub.clone();
        let rpc = rpc.clone();
        let local = local.clone();
        let archiver = archiver.clone();
        let metrics = metrics.clone();
        let peers = peers.clone();
        let hostname = config.hostname.clone();
        thread::Builder::new().name("ticker".into()).spawn(move || {
            let flush = tick(FLUSH_INTERVAL);
            let stats = tick(PEER_STATS_INTERVAL);
            let reconcile = tick(PEER_RECONCILE_INTERVAL);
            let ship = tick(SHIP_INTERVAL);

            loop {
                crossbeam_channel::select! {
                    recv(flush) -> _ => {
                        if let Err(e) = cursor.flush(&hub) {
                            log::warn!("cursor flush failed: {}", e);
                        }
                    }
                    recv(reconcile) -> _ => {
                        if let Err(e) = peers.sync(&hub) {
                            log::warn!("periodic peer reconcile failed: {}", e);
                        }
                    }
                    recv(stats) -> _ => {
                        match poller::collect_peer_stats(&rpc) {
                            Ok(mut peer_stats) => {
                                peer_stats.host = hostname.clone();
                                let event = Event::PeerStats(peer_stats);
                                if let Err(e) = hub.send(&wire::event_record(&event, None)) {
                                    log::warn!("failed to send peer stats: {}", e);
                                }
                            }
                            Err(e) => log::warn!("peer stats collection failed: {}", e),
                        }
                        match poller::header_tip_gap(&rpc) {
                            Ok(gap) => metrics.header_tip_gap.set(gap),
                            Err(e) => log::warn!("sync probe failed: {}", e),
                        }
                    }
                    recv(ship) -> _ => {
                        let shipped = archiver
                            .lock()
                            .map_err(|_| anyhow::anyhow!("archiver poisoned"))
                            .and_then(|mut a| a.ship(&*local, &*storage, &hostname));
                        match shipped {
                            Ok(n) if n > 0 => log::info!("shipped {} mempool archives", n),
                            Ok(_) => {}
                            Err(e) => log::error!("mempool ship failed: {}", e),
                        }
                    }
                }
            }
        })?;
    }

    // The main thread tails the log and drives the listener chain; a
    // missing log file at boot is fatal.
    let boot_cursor = CursorManager::boot_cursor(&*hub_store, &config.hostname);
    let mut follower = LogFollower::open(&config.log_path, boot_cursor.as_deref())
        .with_context(|| format!("opening {}", config.log_path.display()))?;
    let mut router =
        LineRouter::standard(&config.hostname, pre_taproot, config.ignore_older_than());

    log::info!("listening to logs at {}", config.log_path.display());
    loop {
        let line = follower.next_line();
        let hash = linehash(&line);

        for extracted in router.process_line(&line) {
            match extracted {
                Extracted::Event(event) => {
                    if let Event::ConnectBlockEvent(cb) = &event {
                        metrics.last_connect_block_at.set(cb.timestamp.timestamp() as f64);
                    }
                    if let Err(e) = queues.enqueue(&event, &hash, &cursor) {
                        log::error!("failed to enqueue {}: {}", event.model(), e);
                    }
                }
                Extracted::PeerNum(num) => {
                    // Drop the request when the sync thread is saturated.
                    let _ = peer_tx.try_send(num);
                }
            }
        }
    }
}
