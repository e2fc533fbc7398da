// SPDX-License-Identifier: CC0-1.0

//! Hub-side Prometheus gauges and the scrape endpoint.

use std::io::{Read, Write};
use std::net::TcpListener;

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// The hub daemon's gauge set.
#[derive(Clone, Debug)]
pub struct HubMetrics {
    pub registry: Registry,
    /// The depth of the queue processing all events.
    pub event_queue_depth: IntGauge,
    /// Total txids the propagation aggregator has seen.
    pub mempool_total_txids: IntGauge,
    /// Per-host observation totals.
    pub mempool_total_txids_per_host: IntGaugeVec,
    /// Finalized propagation records inside the result window.
    pub propagation_events_live: IntGauge,
    /// Txids only one host has, from the snapshot comparison.
    pub mempool_unique_txids: IntGaugeVec,
    /// Majority-held txids a host is missing, from the snapshot comparison.
    pub mempool_missing_txids: IntGaugeVec,
}

impl HubMetrics {
    pub fn new() -> anyhow::Result<HubMetrics> {
        let registry = Registry::new();

        let event_queue_depth = IntGauge::new(
            "bmon_server_event_queue_depth",
            "The depth of the queue processing all events.",
        )?;
        let mempool_total_txids = IntGauge::new(
            "bmon_mempool_total_txids",
            "Total transactions seen by the propagation aggregator",
        )?;
        let mempool_total_txids_per_host = IntGaugeVec::new(
            Opts::new(
                "bmon_mempool_total_txids_per_host",
                "Transactions seen by the propagation aggregator, per host",
            ),
            &["host"],
        )?;
        let propagation_events_live = IntGauge::new(
            "bmon_mempool_propagation_events_live",
            "Finalized propagation records inside the result window",
        )?;
        let mempool_unique_txids = IntGaugeVec::new(
            Opts::new("bmon_mempool_unique_txids", "Transactions only this host's mempool holds"),
            &["host"],
        )?;
        let mempool_missing_txids = IntGaugeVec::new(
            Opts::new(
                "bmon_mempool_missing_txids",
                "Majority-held transactions missing from this host's mempool",
            ),
            &["host"],
        )?;

        registry.register(Box::new(event_queue_depth.clone()))?;
        registry.register(Box::new(mempool_total_txids.clone()))?;
        registry.register(Box::new(mempool_total_txids_per_host.clone()))?;
        registry.register(Box::new(propagation_events_live.clone()))?;
        registry.register(Box::new(mempool_unique_txids.clone()))?;
        registry.register(Box::new(mempool_missing_txids.clone()))?;

        Ok(HubMetrics {
            registry,
            event_queue_depth,
            mempool_total_txids,
            mempool_total_txids_per_host,
            propagation_events_live,
            mempool_unique_txids,
            mempool_missing_txids,
        })
    }
}

/// Serve `registry` over a minimal blocking HTTP endpoint.
pub fn serve_metrics(
    registry: Registry,
    addr: &str,
    refresh: impl Fn() -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)?;
    log::info!("serving metrics on {}", addr);

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("metrics accept failed: {}", e);
                continue;
            }
        };

        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf);

        if let Err(e) = refresh() {
            log::error!("failed to refresh metrics: {}", e);
        }

        let mut body = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&registry.gather(), &mut body) {
            log::error!("failed to encode metrics: {}", e);
            continue;
        }

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            encoder.format_type(),
            body.len(),
        );
        let _ = stream.write_all(head.as_bytes()).and_then(|_| stream.write_all(&body));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn labeled_gauges_encode() {
        let metrics = HubMetrics::new().unwrap();
        metrics.mempool_total_txids.set(42);
        metrics.mempool_total_txids_per_host.with_label_values(&["node0"]).set(17);

        let mut body = Vec::new();
        TextEncoder::new().encode(&metrics.registry.gather(), &mut body).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("bmon_mempool_total_txids 42"));
        assert!(text.contains("bmon_mempool_total_txids_per_host{host=\"node0\"} 17"));
    }
}
