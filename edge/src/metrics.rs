// SPDX-License-Identifier: CC0-1.0

//! Edge-side Prometheus gauges and the scrape endpoint.
//!
//! Gauges hold their last successful values when a refresh fails; an
//! external alerting system watches `bmon_last_bitcoind_log_seen_at`
//! staleness and the queue depths.

use std::io::{Read, Write};
use std::net::TcpListener;

use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};

/// The edge daemon's gauge set.
#[derive(Clone, Debug)]
pub struct EdgeMetrics {
    pub registry: Registry,
    /// Time that the last bitcoind log line was processed.
    pub last_log_seen_at: Gauge,
    /// The depth of the queue processing bitcoind events.
    pub event_queue_depth: IntGauge,
    /// The depth of the queue processing bitcoind mempool activity.
    pub mempool_queue_depth: IntGauge,
    /// Time of the block in the last ConnectBlockEvent.
    pub last_connect_block_at: Gauge,
    /// Size of the mempool activity cache.
    pub mempool_cache_size: Gauge,
    /// Size of the current debug.log.
    pub debug_log_size: Gauge,
    /// How many headers ahead of the validated tip the daemon is.
    pub header_tip_gap: IntGauge,
}

impl EdgeMetrics {
    pub fn new() -> anyhow::Result<EdgeMetrics> {
        let registry = Registry::new();

        let last_log_seen_at = Gauge::new(
            "bmon_last_bitcoind_log_seen_at",
            "Time that the last bitcoind log line was processed",
        )?;
        let event_queue_depth = IntGauge::new(
            "bmon_bitcoind_event_queue_depth",
            "The depth of the queue processing bitcoind events.",
        )?;
        let mempool_queue_depth = IntGauge::new(
            "bmon_bitcoind_mempool_queue_depth",
            "The depth of the queue processing bitcoind mempool activity.",
        )?;
        let last_connect_block_at = Gauge::new(
            "bmon_last_connect_block_at",
            "Time of the block in the last ConnectBlockEvent",
        )?;
        let mempool_cache_size = Gauge::new(
            "bmon_mempool_activity_cache_size_mibibytes",
            "Size of the mempool activity cache",
        )?;
        let debug_log_size = Gauge::new(
            "bmon_bitcoind_debug_log_size_mibibytes",
            "Size of the current debug.log",
        )?;
        let header_tip_gap = IntGauge::new(
            "bmon_bitcoind_header_tip_gap",
            "Headers seen minus blocks validated on the local daemon",
        )?;

        registry.register(Box::new(last_log_seen_at.clone()))?;
        registry.register(Box::new(event_queue_depth.clone()))?;
        registry.register(Box::new(mempool_queue_depth.clone()))?;
        registry.register(Box::new(last_connect_block_at.clone()))?;
        registry.register(Box::new(mempool_cache_size.clone()))?;
        registry.register(Box::new(debug_log_size.clone()))?;
        registry.register(Box::new(header_tip_gap.clone()))?;

        Ok(EdgeMetrics {
            registry,
            last_log_seen_at,
            event_queue_depth,
            mempool_queue_depth,
            last_connect_block_at,
            mempool_cache_size,
            debug_log_size,
            header_tip_gap,
        })
    }
}

/// Serve `registry` over a minimal blocking HTTP endpoint.
///
/// `refresh` runs before each scrape; its failures are logged and the
/// previous gauge values are served.
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

        // Drain the request head; the path does not matter.
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
    fn gauges_register_and_encode() {
        let metrics = EdgeMetrics::new().unwrap();
        metrics.last_log_seen_at.set(1666000000.0);
        metrics.event_queue_depth.set(3);

        let mut body = Vec::new();
        TextEncoder::new().encode(&metrics.registry.gather(), &mut body).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("bmon_last_bitcoind_log_seen_at 1666000000"));
        assert!(text.contains("bmon_bitcoind_event_queue_depth 3"));
    }
}
