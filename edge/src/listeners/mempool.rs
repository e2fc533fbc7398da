// SPDX-License-Identifier: CC0-1.0

//! Mempool admission, rejection and pong extraction.

use bmon_events::{Event, MempoolAccept, MempoolReject};
use chrono::Utc;
use regex::Regex;

use super::{get_time, match_groups, peer_patt, Extracted, Listener, FLOAT, HASH};

/// Extracts `AcceptToMemoryPool: ... accepted` lines.
///
/// `2022-10-17T17:57:43.861480Z AcceptToMemoryPool: peer=11: accepted fa4f08dfe610593b505ca5cd8b2ba061ea15a4c480a63dd75b00e2eaddf9b42b (poolsz 11848 txn, 25560 kB)`
pub struct MempoolAcceptListener {
    patts: Vec<Regex>,
    ignore_older_than: Option<chrono::Duration>,
}

impl std::fmt::Debug for MempoolAcceptListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MempoolAcceptListener")
    }
}

impl MempoolAcceptListener {
    pub fn new(ignore_older_than: Option<chrono::Duration>) -> MempoolAcceptListener {
        MempoolAcceptListener {
            patts: vec![
                peer_patt(),
                Regex::new(&format!(r"\s+accepted (?P<txhash>{})", HASH)).unwrap(),
                Regex::new(r"poolsz (?P<pool_size_txns>\d+) txn, (?P<pool_size_kb>\d+) kB")
                    .unwrap(),
            ],
            ignore_older_than,
        }
    }
}

impl Listener for MempoolAcceptListener {
    fn name(&self) -> &'static str { "MempoolAcceptListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        if !(line.contains(" AcceptToMemoryPool:") && line.contains(" accepted ")) {
            return None;
        }

        let timestamp = get_time(line)?;
        if let Some(max_age) = self.ignore_older_than {
            if Utc::now() - timestamp > max_age {
                return None;
            }
        }

        let matches = match_groups(&self.patts, line);
        Some(Extracted::Event(Event::MempoolAccept(MempoolAccept {
            host: String::new(),
            timestamp,
            txhash: matches.get("txhash")?.clone(),
            peer_num: matches.get("peer_num")?.parse().ok()?,
            pool_size_txns: matches.get("pool_size_txns")?.parse().ok()?,
            pool_size_kb: matches.get("pool_size_kb")?.parse().ok()?,
        })))
    }
}

/// Extracts `... was not accepted: <reason>` lines.
///
/// `[msghand] 4b93cc953162c4d953918e60fe1b9f48aae82e049ace3c912479e0ff5c7218c3 from peer=6 was not accepted: txn-mempool-conflict`
///
/// `[msghand] 91224d... from peer=3 was not accepted: insufficient fee, rejecting replacement 91224d...; new feerate 0.00005965 BTC/kvB <= old feerate 0.00008334 BTC/kvB`
pub struct MempoolRejectListener {
    patts: Vec<Regex>,
    /// Pre-taproot nodes get too many standardness mismatches to store (on
    /// the order of 30,000 per day), so those reason codes are suppressed.
    pre_taproot: bool,
    ignore_older_than: Option<chrono::Duration>,
}

impl std::fmt::Debug for MempoolRejectListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MempoolRejectListener(pre_taproot={})", self.pre_taproot)
    }
}

const SUPPRESSED_PRE_TAPROOT: [&str; 2] = ["scriptpubkey", "non-mandatory-script-verify-flag"];

impl MempoolRejectListener {
    pub fn new(pre_taproot: bool, ignore_older_than: Option<chrono::Duration>) -> MempoolRejectListener {
        MempoolRejectListener {
            patts: vec![
                peer_patt(),
                Regex::new(&format!(
                    r"\s+(?P<txhash>{})(\s+\(wtxid=(?P<wtxid>{})\))?\s+from peer",
                    HASH, HASH
                ))
                .unwrap(),
                Regex::new(&format!(r"new feerate\s+(?P<insufficient_feerate>{})\s+BTC/kvB", FLOAT))
                    .unwrap(),
                Regex::new(&format!(r"old feerate\s+(?P<old_feerate>{})\s+BTC/kvB", FLOAT))
                    .unwrap(),
                Regex::new(&format!(
                    r"not enough additional fees\D+(?P<insufficient_fee>{})\D+(?P<old_fee>{})",
                    FLOAT, FLOAT
                ))
                .unwrap(),
            ],
            pre_taproot,
            ignore_older_than,
        }
    }
}

impl Listener for MempoolRejectListener {
    fn name(&self) -> &'static str { "MempoolRejectListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        if !(line.contains(" was not accepted:") && line.contains(" from peer=")) {
            return None;
        }

        let timestamp = get_time(line)?;
        if let Some(max_age) = self.ignore_older_than {
            if Utc::now() - timestamp > max_age {
                return None;
            }
        }

        let matches = match_groups(&self.patts, line);
        let reason = line.rsplit("was not accepted:").next()?.trim().to_string();
        if reason.is_empty() {
            log::warn!("reject line with empty reason: {}", line);
            return None;
        }
        let reason_code = MempoolReject::reason_code(&reason);

        if self.pre_taproot && SUPPRESSED_PRE_TAPROOT.contains(&reason_code.as_str()) {
            return None;
        }

        let mut reason_data = serde_json::Map::new();
        if let Some(feerate) = matches.get("insufficient_feerate") {
            reason_data.insert("insufficient_feerate_btc_kvB".to_string(), feerate.clone().into());
            reason_data.insert(
                "old_feerate_btc_kvB".to_string(),
                matches.get("old_feerate").cloned().unwrap_or_default().into(),
            );
        }
        if let Some(fee) = matches.get("insufficient_fee") {
            reason_data.insert("insufficient_fee_btc".to_string(), fee.clone().into());
            reason_data.insert(
                "old_fee_btc".to_string(),
                matches.get("old_fee").cloned().unwrap_or_default().into(),
            );
        }

        Some(Extracted::Event(Event::MempoolReject(MempoolReject {
            host: String::new(),
            timestamp,
            txhash: matches.get("txhash")?.clone(),
            wtxid: matches.get("wtxid").cloned(),
            peer_num: matches.get("peer_num")?.parse().ok()?,
            // The stable peer reference is filled out by the queue worker,
            // where the peer cache lives.
            peer_id: None,
            reason_code,
            reason,
            reason_data: serde_json::Value::Object(reason_data),
        })))
    }
}

/// Listens for pong messages; a convenient cue for refreshing cached peer
/// information.
///
/// `2022-10-23T13:21:28.681866Z received: pong (8 bytes) peer=3`
pub struct PongListener {
    peer: Regex,
    ignore_older_than: Option<chrono::Duration>,
}

impl std::fmt::Debug for PongListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PongListener")
    }
}

impl PongListener {
    pub fn new(ignore_older_than: Option<chrono::Duration>) -> PongListener {
        PongListener { peer: peer_patt(), ignore_older_than }
    }
}

impl Listener for PongListener {
    fn name(&self) -> &'static str { "PongListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        if !line.contains(" received: pong ") {
            return None;
        }

        let timestamp = get_time(line)?;
        if let Some(max_age) = self.ignore_older_than {
            if Utc::now() - timestamp > max_age {
                return None;
            }
        }

        match self.peer.captures(line) {
            Some(caps) => caps["peer_num"].parse().ok().map(Extracted::PeerNum),
            None => {
                log::warn!("malformed pong message: {}", line);
                None
            }
        }
    }
}
