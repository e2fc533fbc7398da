// SPDX-License-Identifier: CC0-1.0

//! Header-seen to tip-updated latency measurement.

use bmon_events::{Event, HeaderToTipEvent};
use chrono::{DateTime, Utc};
use regex::Regex;

use super::{get_time, match_groups, parse_log_datetime, Extracted, Listener, HASH};

/// A measurement in flight: the header has been seen, the tip update has not.
#[derive(Clone, Debug)]
struct Pending {
    blockhash: String,
    height: u64,
    saw_header_at: DateTime<Utc>,
    reconstruct_block_at: Option<DateTime<Utc>>,
    reconstruction_data: serde_json::Value,
}

/// Cues on `Saw new header`, then records the time to reach tip.
///
/// Three landmarks for one block:
///
/// 1. `Saw new header hash=... height=...`
/// 2. `Successfully reconstructed block <hash> with 1 txn prefilled, 3313 txn from mempool (incl at least 0 from extra pool) and 1 txn requested`
/// 3. The next `UpdateTip:` for the same hash.
pub struct HeaderToTipListener {
    header_patts: Vec<Regex>,
    reconstruct_patts: Vec<Regex>,
    tip_patts: Vec<Regex>,
    next_event: Option<Pending>,
}

impl std::fmt::Debug for HeaderToTipListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeaderToTipListener(pending={:?})", self.next_event.as_ref().map(|p| &p.blockhash))
    }
}

impl HeaderToTipListener {
    pub fn new() -> HeaderToTipListener {
        HeaderToTipListener {
            header_patts: vec![
                Regex::new(&format!(r"hash=(?P<blockhash>{})", HASH)).unwrap(),
                Regex::new(r"height=(?P<height>\d+)").unwrap(),
            ],
            reconstruct_patts: vec![
                Regex::new(&format!(r"block (?P<blockhash>{})", HASH)).unwrap(),
                Regex::new(r"(?P<num_prefilled>\d+) txn prefilled").unwrap(),
                Regex::new(r"(?P<num_from_mempool>\d+) txn from mempool").unwrap(),
                Regex::new(r"(?P<num_requested>\d+) txn requested").unwrap(),
            ],
            tip_patts: vec![
                Regex::new(&format!(r"best=(?P<blockhash>{}) ", HASH)).unwrap(),
                Regex::new(r"date='(?P<blocktime>\S+)'").unwrap(),
            ],
            next_event: None,
        }
    }
}

impl Listener for HeaderToTipListener {
    fn name(&self) -> &'static str { "HeaderToTipListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        if line.contains("Saw new header") {
            let matches = match_groups(&self.header_patts, line);
            let timestamp = get_time(line)?;

            if let Some(old) = &self.next_event {
                log::error!(
                    "interrupting header-to-tip measurement for {} at height {}",
                    old.blockhash,
                    old.height
                );
            }

            self.next_event = Some(Pending {
                blockhash: matches.get("blockhash")?.clone(),
                height: matches.get("height")?.parse().ok()?,
                saw_header_at: timestamp,
                reconstruct_block_at: None,
                reconstruction_data: serde_json::json!({}),
            });
            return None;
        }

        self.next_event.as_ref()?;

        if line.contains("Successfully reconstructed block") {
            let matches = match_groups(&self.reconstruct_patts, line);
            let timestamp = get_time(line)?;
            let pending = self.next_event.as_mut()?;

            if matches.get("blockhash") != Some(&pending.blockhash) {
                log::error!(
                    "reconstruction blockhash mismatch: pending {} vs {:?}",
                    pending.blockhash,
                    matches.get("blockhash")
                );
                return None;
            }

            pending.reconstruct_block_at = Some(timestamp);
            pending.reconstruction_data = serde_json::json!({
                "num_prefilled": matches.get("num_prefilled").cloned().unwrap_or_default(),
                "num_from_mempool": matches.get("num_from_mempool").cloned().unwrap_or_default(),
                "num_requested": matches.get("num_requested").cloned().unwrap_or_default(),
            });
        } else if line.contains("UpdateTip: ") {
            let matches = match_groups(&self.tip_patts, line);
            let timestamp = get_time(line)?;
            let pending = self.next_event.as_ref()?;

            if matches.get("blockhash") != Some(&pending.blockhash) {
                log::error!(
                    "tip blockhash mismatch: pending {} vs {:?}",
                    pending.blockhash,
                    matches.get("blockhash")
                );
                return None;
            }

            let block_timestamp = parse_log_datetime(matches.get("blocktime")?)?;
            let pending = self.next_event.take()?;

            let secs = |later: DateTime<Utc>, earlier: DateTime<Utc>| {
                (later - earlier).num_microseconds().map(|us| us as f64 / 1e6).unwrap_or(0.0)
            };

            let event = HeaderToTipEvent {
                host: String::new(),
                blockhash: pending.blockhash,
                height: pending.height,
                saw_header_at: pending.saw_header_at,
                reconstruct_block_at: pending.reconstruct_block_at,
                tip_at: timestamp,
                header_to_tip_secs: secs(timestamp, pending.saw_header_at),
                header_to_block_secs: pending
                    .reconstruct_block_at
                    .map(|at| secs(at, pending.saw_header_at)),
                block_to_tip_secs: pending.reconstruct_block_at.map(|at| secs(timestamp, at)),
                blocktime_minus_header_secs: secs(block_timestamp, pending.saw_header_at),
                reconstruction_data: pending.reconstruction_data,
            };
            return Some(Extracted::Event(Event::HeaderToTipEvent(event)));
        }

        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HASH_A: &str = "00000000000000000001d80d14ee4400b6d9c851debe27e6777f3876edd4ad1e";

    fn header_line() -> String {
        format!("2019-08-09T16:28:40Z Saw new header hash={} height=589349", HASH_A)
    }

    fn reconstruct_line() -> String {
        format!(
            "2019-08-09T16:28:41Z Successfully reconstructed block {} with 1 txn prefilled, 3313 txn from mempool (incl at least 0 from extra pool) and 1 txn requested",
            HASH_A
        )
    }

    fn tip_line() -> String {
        format!(
            "2019-08-09T16:28:42Z UpdateTip: new best={} height=589349 version=0x20800000 log2_work=90.944215 tx=443429260 date='2019-08-09T16:27:43Z' progress=1.000000 cache=8.7MiB(64093txo)",
            HASH_A
        )
    }

    #[test]
    fn three_landmarks_emit_one_event() {
        let mut listener = HeaderToTipListener::new();

        assert!(listener.process_line(&header_line()).is_none());
        assert!(listener.process_line(&reconstruct_line()).is_none());
        let got = listener.process_line(&tip_line()).unwrap();

        let event = match got {
            Extracted::Event(Event::HeaderToTipEvent(e)) => e,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(event.blockhash, HASH_A);
        assert_eq!(event.height, 589349);
        assert_eq!(event.header_to_tip_secs, 2.0);
        assert_eq!(event.header_to_block_secs, Some(1.0));
        assert_eq!(event.block_to_tip_secs, Some(1.0));
        // Block date 16:27:43 minus header seen 16:28:40.
        assert_eq!(event.blocktime_minus_header_secs, -57.0);
        assert_eq!(event.reconstruction_data["num_from_mempool"], "3313");

        // The state machine is re-entrant: nothing pending afterwards.
        assert!(listener.process_line(&tip_line()).is_none());
    }

    #[test]
    fn tip_without_reconstruction() {
        let mut listener = HeaderToTipListener::new();
        assert!(listener.process_line(&header_line()).is_none());
        let got = listener.process_line(&tip_line()).unwrap();

        let event = match got {
            Extracted::Event(Event::HeaderToTipEvent(e)) => e,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(event.reconstruct_block_at.is_none());
        assert!(event.header_to_block_secs.is_none());
        assert!(event.block_to_tip_secs.is_none());
    }

    #[test]
    fn mismatched_blockhash_is_ignored() {
        let mut listener = HeaderToTipListener::new();
        assert!(listener.process_line(&header_line()).is_none());

        let other = "2019-08-09T16:28:41Z Successfully reconstructed block ffffffffffffffffffff1d80d14ee4400b6d9c851debe27e6777f3876edd4ad1e with 1 txn prefilled, 2 txn from mempool (incl at least 0 from extra pool) and 1 txn requested";
        assert!(listener.process_line(other).is_none());

        // The pending measurement survives and still completes.
        assert!(listener.process_line(&tip_line()).is_some());
    }

    #[test]
    fn new_header_replaces_pending() {
        let mut listener = HeaderToTipListener::new();
        assert!(listener.process_line(&header_line()).is_none());

        let second = "2019-08-09T16:30:00Z Saw new header hash=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa height=589350";
        assert!(listener.process_line(second).is_none());

        // The old tip line no longer matches the pending hash.
        assert!(listener.process_line(&tip_line()).is_none());
    }
}
