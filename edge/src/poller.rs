// SPDX-License-Identifier: CC0-1.0

//! Periodic JSON-RPC enrichment of the event stream.

use bmon_events::PeerStats;
use bmon_rpc::Client;
use chrono::Utc;

/// Pull the periodic peer aggregate from the local daemon.
///
/// Combines `getpeerinfo` (count, ping spread, per-message byte breakdowns)
/// with `getnettotals` (lifetime byte counters).
pub fn collect_peer_stats(rpc: &Client) -> anyhow::Result<PeerStats> {
    let peers = rpc.get_peer_info()?;
    let totals = rpc.get_net_totals()?;

    let pings: Vec<f64> =
        peers.iter().filter_map(|p| p.get("pingtime").and_then(|v| v.as_f64())).collect();
    let (ping_min, ping_max) = pings
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(min, max), p| (min.min(*p), max.max(*p)));
    let ping_mean =
        if pings.is_empty() { 0.0 } else { pings.iter().sum::<f64>() / pings.len() as f64 };

    Ok(PeerStats {
        host: String::new(),
        timestamp: Utc::now(),
        num_peers: peers.len() as u64,
        ping_mean,
        ping_min: if pings.is_empty() { 0.0 } else { ping_min },
        ping_max,
        bytesrecv: totals.get("totalbytesrecv").and_then(|v| v.as_f64()).unwrap_or(0.0),
        bytessent: totals.get("totalbytessent").and_then(|v| v.as_f64()).unwrap_or(0.0),
        bytesrecv_per_msg: sum_per_msg(&peers, "bytesrecv_per_msg"),
        bytessent_per_msg: sum_per_msg(&peers, "bytessent_per_msg"),
    })
}

/// Sum the per-message byte maps across all peers.
fn sum_per_msg(peers: &[serde_json::Value], field: &str) -> serde_json::Value {
    let mut totals: std::collections::BTreeMap<String, u64> = Default::default();
    for peer in peers {
        if let Some(map) = peer.get(field).and_then(|v| v.as_object()) {
            for (msg, bytes) in map {
                *totals.entry(msg.clone()).or_default() += bytes.as_u64().unwrap_or(0);
            }
        }
    }
    serde_json::to_value(totals).unwrap_or_default()
}

/// How far the daemon's validated chain trails its best header.
///
/// Zero on a synced node; grows during initial block download or when the
/// node is stuck fetching a block.
pub fn header_tip_gap(rpc: &Client) -> anyhow::Result<i64> {
    let info = rpc.get_blockchain_info()?;
    let headers = info.get("headers").and_then(|v| v.as_i64()).unwrap_or(0);
    let blocks = info.get("blocks").and_then(|v| v.as_i64()).unwrap_or(0);
    Ok(headers - blocks)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn per_msg_sums_across_peers() {
        let peers = vec![
            serde_json::json!({"bytesrecv_per_msg": {"ping": 32, "tx": 100}}),
            serde_json::json!({"bytesrecv_per_msg": {"ping": 32, "inv": 7}}),
            serde_json::json!({}),
        ];
        assert_eq!(
            sum_per_msg(&peers, "bytesrecv_per_msg"),
            serde_json::json!({"ping": 64, "tx": 100, "inv": 7})
        );
    }
}
