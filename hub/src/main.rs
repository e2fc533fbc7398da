// SPDX-License-Identifier: CC0-1.0

//! The bmon hub daemon: central ingest and correlation.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use bmon_hub::compare::compare_fleet_mempools;
use bmon_hub::config::Config;
use bmon_hub::ingest::{run_ingest_worker, IngestCtx};
use bmon_hub::metrics::{serve_metrics, HubMetrics};
use bmon_hub::propagation::{AggregatorConfig, MempoolAcceptAggregator};
use bmon_hub::store::Store;
use bmon_kv::{FastStore, RedisStore};
use bmon_rpc::{Auth, Client};
use crossbeam_channel::tick;

/// Cadences for the periodic jobs.
const REAPER_INTERVAL: Duration = Duration::from_secs(60);
const HOST_REFRESH_INTERVAL: Duration = Duration::from_secs(90);
const COMPARE_INTERVAL: Duration = Duration::from_secs(10 * 60);

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;
    run(config)
}

fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.db_path)?);
    let fast: Arc<dyn FastStore> =
        Arc::new(RedisStore::open(&config.redis_server_url).context("hub fast store")?);

    let aggregator = Arc::new(MempoolAcceptAggregator::new(
        fast.clone(),
        AggregatorConfig::default(),
        store.hosts_to_cohorts()?,
    ));
    let shutdown = Arc::new(AtomicBool::new(false));

    let ctx = IngestCtx {
        store: store.clone(),
        fast: fast.clone(),
        aggregator: aggregator.clone(),
        shutdown: shutdown.clone(),
    };
    for i in 0..config.ingest_workers {
        let ctx = ctx.clone();
        thread::Builder::new()
            .name(format!("ingest-worker-{}", i))
            .spawn(move || run_ingest_worker(&ctx))?;
    }

    let metrics = HubMetrics::new()?;
    {
        let metrics = metrics.clone();
        let registry = metrics.registry.clone();
        let addr = config.exporter_addr.clone();
        let fast = fast.clone();
        let aggregator = aggregator.clone();
        thread::Builder::new().name("metrics".into()).spawn(move || {
            let refresh = move || -> anyhow::Result<()> {
                metrics
                    .event_queue_depth
                    .set(fast.llen(bmon_events::wire::INGEST_QUEUE)? as i64);
                metrics.mempool_total_txids.set(aggregator.get_total_txids_processed()? as i64);
                for (host, count) in aggregator.get_total_txids_processed_per_host()? {
                    metrics
                        .mempool_total_txids_per_host
                        .with_label_values(&[host.as_str()])
                        .set(count as i64);
                }
                metrics
                    .propagation_events_live
                    .set(aggregator.get_propagation_events()?.len() as i64);
                Ok(())
            };
            if let Err(e) = serve_metrics(registry, &addr, refresh) {
                log::error!("metrics exporter died: {}", e);
            }
        })?;
    }

    // Fleet mempool comparison, when RPC endpoints are configured.
    let compare_clients: Vec<(String, Client)> = config
        .rpc_urls
        .iter()
        .filter_map(|(name, url)| match Client::new(url, Auth::None) {
            Ok(client) => Some((name.clone(), client)),
            Err(e) => {
                log::error!("bad RPC url for {}: {}", name, e);
                None
            }
        })
        .collect();

    // The main thread runs the periodic jobs: the aged-txid reaper, host
    // label refresh and the mempool comparison.
    let reaper = tick(REAPER_INTERVAL);
    let refresh_hosts = tick(HOST_REFRESH_INTERVAL);
    let compare = tick(COMPARE_INTERVAL);

    log::info!("hub up; ingesting into {}", config.db_path.display());
    loop {
        crossbeam_channel::select! {
            recv(reaper) -> _ => {
                match aggregator.process_all_aged(None, None) {
                    Ok(finalized) if !finalized.is_empty() => {
                        log::info!("finalized {} aged propagation records", finalized.len());
                    }
                    Ok(_) => {}
                    Err(e) => log::error!("aged-propagation reaper failed: {}", e),
                }
            }
            recv(refresh_hosts) -> _ => {
                match store.hosts_to_cohorts() {
                    Ok(hosts) => aggregator.set_hosts(hosts),
                    Err(e) => log::error!("host label refresh failed: {}", e),
                }
            }
            recv(compare) -> _ => {
                if compare_clients.is_empty() {
                    continue;
                }
                let result = compare_fleet_mempools(&compare_clients);
                for (host, txids) in &result.unique {
                    metrics
                        .mempool_unique_txids
                        .with_label_values(&[host.as_str()])
                        .set(txids.len() as i64);
                }
                for (host, txids) in &result.missing {
                    metrics
                        .mempool_missing_txids
                        .with_label_values(&[host.as_str()])
                        .set(txids.len() as i64);
                }
            }
        }
    }
}
