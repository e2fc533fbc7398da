// SPDX-License-Identifier: CC0-1.0

//! The ingest endpoint: drains the edges' durable queue into the store and
//! the propagation aggregator.
//!
//! Payloads are `_model`-tagged JSON maps (see [`bmon_events::wire`]).
//! Delivery is at-least-once; identity rows are idempotent upserts and
//! append-only rows tolerate duplicates, so redelivery is harmless. After a
//! successful persist the sender's log cursor is advanced from the
//! payload's `_linehash`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bmon_events::{wire, Event, LogProgress};
use bmon_kv::FastStore;
use chrono::Utc;

use crate::propagation::{MempoolAcceptAggregator, PropagationStatus};
use crate::store::Store;

/// How long a worker blocks on an empty queue before re-checking shutdown.
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state for ingest workers.
#[derive(Clone)]
pub struct IngestCtx {
    pub store: Arc<Store>,
    pub fast: Arc<dyn FastStore>,
    pub aggregator: Arc<MempoolAcceptAggregator>,
    pub shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for IngestCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "IngestCtx") }
}

/// Drain the ingest queue until shutdown.
pub fn run_ingest_worker(ctx: &IngestCtx) {
    while !ctx.shutdown.load(Ordering::Relaxed) {
        let raw = match ctx.fast.lpop_blocking(wire::INGEST_QUEUE, POP_TIMEOUT) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("ingest queue pop failed: {}", e);
                std::thread::sleep(POP_TIMEOUT);
                continue;
            }
        };
        if let Err(e) = handle_payload(ctx, &raw) {
            log::error!("failed to ingest payload: {}: {}", e, raw);
        }
    }
}

/// Dispatch one queue payload by its `_model` discriminator.
pub fn handle_payload(ctx: &IngestCtx, raw: &str) -> anyhow::Result<()> {
    let ingest = match wire::parse_ingest(raw) {
        Ok(ingest) => ingest,
        Err(e) => anyhow::bail!("undecodable payload dropped: {}", e),
    };

    match ingest {
        wire::Ingest::Host { host, fingerprint } => {
            let id = ctx.store.upsert_host(&host, &fingerprint)?;
            log::info!("upserted host {} ({}) as row {}", host.name, host.bitcoin_version, id);
        }
        wire::Ingest::Peer { peer, fingerprint } => {
            ctx.store.upsert_peer(&peer, &fingerprint)?;
        }
        wire::Ingest::LogProgress(progress) => {
            upsert_cursor(ctx, &progress)?;
        }
        wire::Ingest::Event { event, linehash } => {
            handle_event(ctx, &event)?;
            if let Some(hash) = linehash {
                // The event is durable; advancing the cursor past its line
                // is now safe.
                upsert_cursor(
                    ctx,
                    &LogProgress {
                        hostname: event.host().to_string(),
                        timestamp: Utc::now(),
                        loghash: hash,
                    },
                )?;
            }
        }
    }
    Ok(())
}

fn handle_event(ctx: &IngestCtx, event: &Event) -> anyhow::Result<()> {
    // High-volume mempool admissions bypass the row store entirely and feed
    // the cross-host aggregation.
    if let Event::MempoolAccept(accept) = event {
        let status = ctx.aggregator.mark_seen(&accept.host, &accept.txhash, accept.timestamp)?;
        match status {
            Some(PropagationStatus::CompleteAll) => {
                ctx.aggregator.process_completed_propagation(&accept.txhash)?;
            }
            Some(PropagationStatus::CompleteCohort) => {
                log::debug!("txid {} complete within cohort", accept.txhash);
            }
            None => {}
        }
        return Ok(());
    }

    ctx.store.insert_event(event)?;
    Ok(())
}

/// Upsert a cursor row and mirror it into the fast store for edge boots.
fn upsert_cursor(ctx: &IngestCtx, progress: &LogProgress) -> anyhow::Result<()> {
    ctx.store.upsert_log_progress(progress)?;
    ctx.fast.set(
        &format!("logprogress.{}", progress.hostname),
        &format!("{} | {}", progress.loghash, progress.timestamp.to_rfc3339()),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use bmon_events::{MempoolAccept, PolicyCohort};
    use bmon_kv::MemoryStore;

    use super::*;
    use crate::propagation::AggregatorConfig;

    fn ctx() -> IngestCtx {
        let fast: Arc<dyn FastStore> = Arc::new(MemoryStore::new());
        IngestCtx {
            store: Arc::new(Store::open_in_memory().unwrap()),
            fast: fast.clone(),
            aggregator: Arc::new(MempoolAcceptAggregator::new(
                fast,
                AggregatorConfig::default(),
                HashMap::from([("node0".to_string(), PolicyCohort::PostTaproot)]),
            )),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn event_ingest_advances_cursor() {
        let ctx = ctx();
        let event = Event::BlockConnectedEvent(bmon_events::BlockConnectedEvent {
            host: "node0".into(),
            timestamp: Utc::now(),
            blockhash: "abcd".into(),
            height: 1,
        });

        let raw = wire::event_record(&event, Some("hash-1")).to_string();
        handle_payload(&ctx, &raw).unwrap();

        let progress = ctx.store.latest_log_progress("node0").unwrap().unwrap();
        assert_eq!(progress.loghash, "hash-1");
        // The fast-store mirror is what edges read at boot.
        let mirror = ctx.fast.get("logprogress.node0").unwrap().unwrap();
        assert!(mirror.starts_with("hash-1 | "));
    }

    #[test]
    fn single_host_accept_completes_and_finalizes() {
        let ctx = ctx();
        let accept = Event::MempoolAccept(MempoolAccept {
            host: "node0".into(),
            timestamp: Utc::now(),
            txhash: "tx1".into(),
            peer_num: 1,
            pool_size_txns: 10,
            pool_size_kb: 20,
        });

        let raw = wire::event_record(&accept, Some("hash-2")).to_string();
        handle_payload(&ctx, &raw).unwrap();

        // One host fleet: the accept completes and finalizes immediately.
        let live = ctx.aggregator.get_propagation_events().unwrap();
        assert_eq!(live.len(), 1);
        assert!(live[0].all_complete);
    }

    #[test]
    fn garbage_payload_errors_without_panic() {
        let ctx = ctx();
        assert!(handle_payload(&ctx, "not json at all").is_err());
    }
}
