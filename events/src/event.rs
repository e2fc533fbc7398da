// SPDX-License-Identifier: CC0-1.0

//! The event stream produced by watching a node's debug log.
//!
//! Every variant carries the originating host name and the event-time
//! timestamp (UTC, microsecond resolution) parsed from the log line itself,
//! not the wall clock of the observer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observation extracted from one monitored node.
///
/// Serializes as a JSON map tagged with a `_model` discriminator so the hub
/// can dispatch on the event kind without trial deserialization.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "_model")]
pub enum Event {
    /// The node's best-chain tip advanced (an `UpdateTip:` log line).
    ConnectBlockEvent(ConnectBlockEvent),
    /// Fine-grained `ConnectBlock` timing breakdown for one block.
    ConnectBlockDetails(ConnectBlockDetails),
    /// A block was attached to the active chain.
    BlockConnectedEvent(BlockConnectedEvent),
    /// A block was detached from the active chain.
    BlockDisconnectedEvent(BlockDisconnectedEvent),
    /// A completed chain reorganization.
    ReorgEvent(ReorgEvent),
    /// A transaction was admitted to the node's mempool.
    MempoolAccept(MempoolAccept),
    /// A transaction was rejected from the node's mempool.
    MempoolReject(MempoolReject),
    /// The node gave up downloading a block from a peer.
    BlockDownloadTimeout(BlockDownloadTimeout),
    /// Header-seen to tip-updated latency measurements for one block.
    HeaderToTipEvent(HeaderToTipEvent),
    /// Periodic peer aggregate snapshot.
    PeerStats(crate::PeerStats),
    /// A listener raised while processing a line; recorded out of band.
    ProcessLineError(ProcessLineError),
}

impl Event {
    /// The host this event was observed on.
    pub fn host(&self) -> &str {
        use Event::*;

        match self {
            ConnectBlockEvent(e) => &e.host,
            ConnectBlockDetails(e) => &e.host,
            BlockConnectedEvent(e) => &e.host,
            BlockDisconnectedEvent(e) => &e.host,
            ReorgEvent(e) => &e.host,
            MempoolAccept(e) => &e.host,
            MempoolReject(e) => &e.host,
            BlockDownloadTimeout(e) => &e.host,
            HeaderToTipEvent(e) => &e.host,
            PeerStats(e) => &e.host,
            ProcessLineError(e) => &e.hostname,
        }
    }

    /// The event-time timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        use Event::*;

        match self {
            ConnectBlockEvent(e) => e.timestamp,
            ConnectBlockDetails(e) => e.timestamp,
            BlockConnectedEvent(e) => e.timestamp,
            BlockDisconnectedEvent(e) => e.timestamp,
            ReorgEvent(e) => e.finished_timestamp,
            MempoolAccept(e) => e.timestamp,
            MempoolReject(e) => e.timestamp,
            BlockDownloadTimeout(e) => e.timestamp,
            HeaderToTipEvent(e) => e.tip_at,
            PeerStats(e) => e.timestamp,
            ProcessLineError(e) => e.timestamp,
        }
    }

    /// Stamp the originating host onto this event.
    ///
    /// Listeners extract events from bare log lines and do not know which
    /// node they are watching; the router stamps the host before enqueueing.
    pub fn set_host(&mut self, host: &str) {
        use Event::*;

        match self {
            ConnectBlockEvent(e) => e.host = host.to_string(),
            ConnectBlockDetails(e) => e.host = host.to_string(),
            BlockConnectedEvent(e) => e.host = host.to_string(),
            BlockDisconnectedEvent(e) => e.host = host.to_string(),
            ReorgEvent(e) => e.host = host.to_string(),
            MempoolAccept(e) => e.host = host.to_string(),
            MempoolReject(e) => e.host = host.to_string(),
            BlockDownloadTimeout(e) => e.host = host.to_string(),
            HeaderToTipEvent(e) => e.host = host.to_string(),
            PeerStats(e) => e.host = host.to_string(),
            ProcessLineError(e) => e.hostname = host.to_string(),
        }
    }

    /// The wire discriminator for this event, as it appears in `_model`.
    pub fn model(&self) -> &'static str {
        use Event::*;

        match self {
            ConnectBlockEvent(_) => "ConnectBlockEvent",
            ConnectBlockDetails(_) => "ConnectBlockDetails",
            BlockConnectedEvent(_) => "BlockConnectedEvent",
            BlockDisconnectedEvent(_) => "BlockDisconnectedEvent",
            ReorgEvent(_) => "ReorgEvent",
            MempoolAccept(_) => "MempoolAccept",
            MempoolReject(_) => "MempoolReject",
            BlockDownloadTimeout(_) => "BlockDownloadTimeout",
            HeaderToTipEvent(_) => "HeaderToTipEvent",
            PeerStats(_) => "PeerStats",
            ProcessLineError(_) => "ProcessLineError",
        }
    }

    /// Whether this event is too high-volume for relational persistence.
    ///
    /// High-volume events bypass the hub's row store; mempool admissions are
    /// batched to object storage and fed to the propagation aggregator.
    pub fn is_high_volume(&self) -> bool { matches!(self, Event::MempoolAccept(_)) }
}

/// Models an `UpdateTip:` log line.
///
/// Sample:
///
/// `2019-08-09T16:28:42Z UpdateTip: new best=00000000000000000001d80d14ee4400b6d9c851debe27e6777f3876edd4ad1e height=589349 version=0x20800000 log2_work=90.944215 tx=443429260 date='2019-08-09T16:27:43Z' progress=1.000000 cache=8.7MiB(64093txo) warning='44 of last 100 blocks have unexpected version'`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ConnectBlockEvent {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    /// Hash of the new best block.
    pub blockhash: String,
    /// Height of the new best block.
    pub height: u64,
    /// Log2 of total chain work.
    pub log2_work: f64,
    /// Cumulative transaction count for the chain (`nChainTx`).
    pub total_tx_count: u64,
    /// Block version bits. Only present in 0.13+.
    pub version: Option<String>,
    /// The block's own timestamp.
    pub date: DateTime<Utc>,
    /// Coin cache size in MiB. Only present in 0.18+.
    pub cachesize_mib: Option<f64>,
    /// Coin cache size in txouts.
    pub cachesize_txo: u64,
    /// Any warning attached to the tip update.
    pub warning: Option<String>,
}

/// Per-phase `ConnectBlock` latency measurements, in milliseconds.
///
/// Accumulated from the `- <label>: <float>ms` bench lines that trail an
/// `UpdateTip:` line, and completed by the terminal `- Connect block:` line.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ConnectBlockDetails {
    pub host: String,
    /// Timestamp of the final measurement line.
    pub timestamp: DateTime<Utc>,
    pub blockhash: String,
    pub height: u64,
    pub load_block_from_disk_time_ms: Option<f64>,
    pub sanity_checks_time_ms: Option<f64>,
    pub fork_checks_time_ms: Option<f64>,
    pub connect_txs_time_ms: Option<f64>,
    pub verify_time_ms: Option<f64>,
    pub index_writing_time_ms: Option<f64>,
    pub connect_total_time_ms: Option<f64>,
    pub flush_coins_time_ms: Option<f64>,
    pub flush_chainstate_time_ms: Option<f64>,
    pub connect_postprocess_time_ms: Option<f64>,
    /// Total `ConnectBlock` time; its arrival flushes the accumulator.
    pub connectblock_total_time_ms: Option<f64>,
    /// Transactions connected in this block.
    pub tx_count: Option<u64>,
    /// Transaction inputs verified in this block.
    pub txin_count: Option<u64>,
}

/// A `BlockConnected:` validation interface line.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BlockConnectedEvent {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub blockhash: String,
    pub height: u64,
}

/// A `BlockDisconnected:` validation interface line.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BlockDisconnectedEvent {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub blockhash: String,
    pub height: u64,
}

/// A series of block disconnections capped off by same-height reconnections.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ReorgEvent {
    pub host: String,
    /// Timestamp of the final replacement block connection.
    pub finished_timestamp: DateTime<Utc>,
    pub min_height: u64,
    pub max_height: u64,
    /// Displaced blockhashes, ordered low to high by height.
    pub old_blockhashes: Vec<String>,
    /// Replacement blockhashes, ordered low to high by height.
    pub new_blockhashes: Vec<String>,
}

/// A transaction admitted to the mempool.
///
/// `2022-10-17T17:57:43.861480Z AcceptToMemoryPool: peer=11: accepted fa4f08dfe610593b505ca5cd8b2ba061ea15a4c480a63dd75b00e2eaddf9b42b (poolsz 11848 txn, 25560 kB)`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MempoolAccept {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub txhash: String,
    pub peer_num: u64,
    pub pool_size_txns: u64,
    pub pool_size_kb: u64,
}

/// A transaction rejected from the mempool.
///
/// `[msghand] 4b93cc953162c4d953918e60fe1b9f48aae82e049ace3c912479e0ff5c7218c3 from peer=6 was not accepted: txn-mempool-conflict`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MempoolReject {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub txhash: String,
    pub wtxid: Option<String>,
    pub peer_num: u64,
    /// Stable peer fingerprint, resolved through the edge peer cache.
    pub peer_id: Option<String>,
    /// First token of the reason, with replacement-fee special cases.
    pub reason_code: String,
    /// The full reason string after `was not accepted:`.
    pub reason: String,
    /// Structured values extracted from the reason, if any.
    pub reason_data: serde_json::Value,
}

impl MempoolReject {
    /// Classify a rejection reason string into a stable code.
    ///
    /// The code is the first whitespace-delimited token with any trailing
    /// comma stripped, except for the two replacement-fee shapes which get
    /// distinct codes.
    pub fn reason_code(reason: &str) -> String {
        if reason.starts_with("insufficient fee") {
            if reason.contains(" new feerate ") {
                return "insufficient-feerate".to_string();
            } else if reason.contains("not enough additional fees") {
                return "insufficient-fee".to_string();
            }
        }
        reason.split_whitespace().next().unwrap_or_default().trim_end_matches(',').to_string()
    }
}

/// The node gave up waiting for a block from one peer.
///
/// `Timeout downloading block 000000000000000000086779ecf494b0595a9b779f501c7e25fb2be0b69907a2 from peer=24, disconnecting`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BlockDownloadTimeout {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub blockhash: String,
    pub peer_num: u64,
    /// Stable peer fingerprint, resolved through the edge peer cache.
    pub peer_id: Option<String>,
}

/// Latency between first seeing a block header and updating the tip to it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HeaderToTipEvent {
    pub host: String,
    pub blockhash: String,
    pub height: u64,
    /// When the `Saw new header` line was logged.
    pub saw_header_at: DateTime<Utc>,
    /// When the (compact) block was reconstructed, if it was.
    pub reconstruct_block_at: Option<DateTime<Utc>>,
    /// When the block became the tip.
    pub tip_at: DateTime<Utc>,
    /// Seconds between header seen and tip updated.
    pub header_to_tip_secs: f64,
    /// Seconds between header seen and full block obtained.
    pub header_to_block_secs: Option<f64>,
    /// Seconds between full block obtained and tip updated.
    pub block_to_tip_secs: Option<f64>,
    /// Block time minus the header-seen time, in seconds.
    pub blocktime_minus_header_secs: f64,
    /// Compact-block reconstruction counts (prefilled / from mempool / requested).
    pub reconstruction_data: serde_json::Value,
}

/// Recorded when a listener raises while processing a line.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ProcessLineError {
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    /// Name of the listener that raised.
    pub listener: String,
    /// The offending line, verbatim.
    pub line: String,
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn ts() -> DateTime<Utc> { Utc.with_ymd_and_hms(2022, 10, 17, 17, 57, 43).unwrap() }

    #[test]
    fn event_wire_discriminator() {
        let event = Event::MempoolAccept(MempoolAccept {
            host: "bitcoind".to_string(),
            timestamp: ts(),
            txhash: "fa4f".to_string(),
            peer_num: 11,
            pool_size_txns: 11848,
            pool_size_kb: 25560,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["_model"], "MempoolAccept");
        assert_eq!(value["txhash"], "fa4f");

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
        assert!(back.is_high_volume());
    }

    #[test]
    fn every_kind_round_trips() {
        let events = vec![
            Event::BlockConnectedEvent(BlockConnectedEvent {
                host: "a".into(),
                timestamp: ts(),
                blockhash: "aa".into(),
                height: 1,
            }),
            Event::BlockDisconnectedEvent(BlockDisconnectedEvent {
                host: "a".into(),
                timestamp: ts(),
                blockhash: "bb".into(),
                height: 1,
            }),
            Event::ReorgEvent(ReorgEvent {
                host: "a".into(),
                finished_timestamp: ts(),
                min_height: 1,
                max_height: 2,
                old_blockhashes: vec!["x".into(), "y".into()],
                new_blockhashes: vec!["p".into(), "q".into()],
            }),
            Event::ProcessLineError(ProcessLineError {
                hostname: "a".into(),
                timestamp: ts(),
                listener: "reorg".into(),
                line: "garbled".into(),
            }),
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: Event = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
            assert_eq!(back.model(), serde_json::to_value(&event).unwrap()["_model"]);
        }
    }

    #[test]
    fn reject_reason_codes() {
        assert_eq!(MempoolReject::reason_code("txn-mempool-conflict"), "txn-mempool-conflict");
        assert_eq!(
            MempoolReject::reason_code(
                "too-long-mempool-chain, too many descendants for tx fa19 [limit: 25] (code 64)"
            ),
            "too-long-mempool-chain"
        );
        assert_eq!(
            MempoolReject::reason_code(
                "insufficient fee, rejecting replacement 9122; new feerate 0.00005965 BTC/kvB <= old feerate 0.00008334 BTC/kvB"
            ),
            "insufficient-feerate"
        );
        assert_eq!(
            MempoolReject::reason_code(
                "insufficient fee, rejecting replacement 5bff, not enough additional fees to relay; 0.00 < 0.00009128"
            ),
            "insufficient-fee"
        );
    }
}
