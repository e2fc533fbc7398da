// SPDX-License-Identifier: CC0-1.0

//! Extraction of `UpdateTip:` events and `ConnectBlock` timing breakdowns.

use bmon_events::{ConnectBlockDetails, ConnectBlockEvent, Event};
use regex::Regex;

use super::{get_time, match_groups, parse_log_datetime, Extracted, Listener, FLOAT, HASH, HEX, NOT_QUOTE};

const UPDATE_TIP_START: &str = "UpdateTip: ";

/// Aggregates two kinds of connect-block events that share block identity.
///
/// `UpdateTip:` lines each yield a [`ConnectBlockEvent`] in one shot. The
/// `- <label>: <float>ms` bench lines that follow are accumulated into a
/// [`ConnectBlockDetails`] keyed by the most recent tip's blockhash and
/// flushed when the terminal `- Connect block:` measurement arrives. A new
/// `UpdateTip:` discards any unflushed partial accumulator.
pub struct ConnectBlockListener {
    update_tip_patts: Vec<Regex>,
    detail_patts: Vec<Regex>,
    next_details: ConnectBlockDetails,
    current_height: Option<u64>,
    current_blockhash: Option<String>,
}

impl std::fmt::Debug for ConnectBlockListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectBlockListener(current={:?})", self.current_blockhash)
    }
}

impl ConnectBlockListener {
    pub fn new() -> ConnectBlockListener {
        // 'UpdateTip: ...' subpatterns. Grab whatever of this we can - lots
        // of variation between versions.
        let update_tip_patts = vec![
            Regex::new(&format!(r"new\s+best=(?P<blockhash>{})\s+", HASH)).unwrap(),
            Regex::new(r"\s+height=(?P<height>\d+)\s+").unwrap(),
            // version only present in 0.13+
            Regex::new(&format!(r"\s+version=(?P<version>{})\s+", HEX)).unwrap(),
            Regex::new(r"\s+tx=(?P<total_tx_count>\d+)\s+").unwrap(),
            // Early date format
            Regex::new(r"\s+date='?(?P<date>[0-9-]+ [0-9:]+)'?\s+").unwrap(),
            // Later date format
            Regex::new(&format!(r"\s+date='(?P<date>{})'\s+", NOT_QUOTE)).unwrap(),
            Regex::new(&format!(
                r"\s+cache=(?P<cachesize_mib>{})MiB\((?P<cachesize_txo>\d+)txo?\)",
                FLOAT
            ))
            .unwrap(),
            Regex::new(&format!(r"\s+warning='(?P<warning>{})'", NOT_QUOTE)).unwrap(),
            Regex::new(r"\s+cache=(?P<cachesize_txo>\d+)\s*$").unwrap(),
            Regex::new(&format!(r"\s+log2_work=(?P<log2_work>{}) ", FLOAT)).unwrap(),
        ];

        let detail_patts = vec![
            Regex::new(&format!(
                r"- Load block from disk: (?P<load_block_from_disk_time_ms>{})ms ",
                FLOAT
            ))
            .unwrap(),
            Regex::new(&format!(r"- Sanity checks: (?P<sanity_checks_time_ms>{})ms ", FLOAT))
                .unwrap(),
            Regex::new(&format!(r"- Fork checks: (?P<fork_checks_time_ms>{})ms ", FLOAT)).unwrap(),
            Regex::new(&format!(
                r"- Connect (?P<tx_count>\d+) transactions: (?P<connect_txs_time_ms>{})ms ",
                FLOAT
            ))
            .unwrap(),
            Regex::new(&format!(
                r"- Verify (?P<txin_count>\d+) txins: (?P<verify_time_ms>{})ms ",
                FLOAT
            ))
            .unwrap(),
            Regex::new(&format!(r"- Index writing: (?P<index_writing_time_ms>{})ms ", FLOAT))
                .unwrap(),
            Regex::new(&format!(r"- Connect total: (?P<connect_total_time_ms>{})ms ", FLOAT))
                .unwrap(),
            Regex::new(&format!(r"- Flush: (?P<flush_coins_time_ms>{})ms ", FLOAT)).unwrap(),
            Regex::new(&format!(
                r"- Writing chainstate: (?P<flush_chainstate_time_ms>{})ms ",
                FLOAT
            ))
            .unwrap(),
            // UpdateTip messages are handled above.
            Regex::new(&format!(
                r"- Connect postprocess: (?P<connect_postprocess_time_ms>{})ms ",
                FLOAT
            ))
            .unwrap(),
            Regex::new(&format!(r"- Connect block: (?P<connectblock_total_time_ms>{})ms ", FLOAT))
                .unwrap(),
        ];

        ConnectBlockListener {
            update_tip_patts,
            detail_patts,
            next_details: ConnectBlockDetails::default(),
            current_height: None,
            current_blockhash: None,
        }
    }

    fn process_update_tip(&mut self, line: &str) -> Option<Event> {
        let matches = match_groups(&self.update_tip_patts, line);
        let timestamp = get_time(line)?;

        // 0.12 has UpdateTip: lines that just display the warning, so skip
        // those.
        let height: u64 = matches.get("height")?.parse().ok()?;
        let blockhash = matches.get("blockhash")?.clone();

        self.current_height = Some(height);
        self.current_blockhash = Some(blockhash.clone());
        self.next_details = ConnectBlockDetails::default();

        let required = |field: &str| -> Option<&String> {
            let got = matches.get(field);
            if got.is_none() {
                log::warn!("UpdateTip line missing {}: {}", field, line);
            }
            got
        };

        Some(Event::ConnectBlockEvent(ConnectBlockEvent {
            host: String::new(),
            timestamp,
            blockhash,
            height,
            log2_work: required("log2_work")?.parse().ok()?,
            total_tx_count: required("total_tx_count")?.parse().ok()?,
            version: matches.get("version").cloned(),
            date: parse_log_datetime(required("date")?)?,
            cachesize_mib: matches.get("cachesize_mib").and_then(|v| v.parse().ok()),
            cachesize_txo: required("cachesize_txo")?.parse().ok()?,
            warning: matches.get("warning").cloned(),
        }))
    }

    fn apply_detail(&mut self, name: &str, value: &str) {
        let details = &mut self.next_details;
        let as_f64 = value.parse::<f64>().ok();
        let as_u64 = value.parse::<u64>().ok();
        match name {
            "load_block_from_disk_time_ms" => details.load_block_from_disk_time_ms = as_f64,
            "sanity_checks_time_ms" => details.sanity_checks_time_ms = as_f64,
            "fork_checks_time_ms" => details.fork_checks_time_ms = as_f64,
            "connect_txs_time_ms" => details.connect_txs_time_ms = as_f64,
            "verify_time_ms" => details.verify_time_ms = as_f64,
            "index_writing_time_ms" => details.index_writing_time_ms = as_f64,
            "connect_total_time_ms" => details.connect_total_time_ms = as_f64,
            "flush_coins_time_ms" => details.flush_coins_time_ms = as_f64,
            "flush_chainstate_time_ms" => details.flush_chainstate_time_ms = as_f64,
            "connect_postprocess_time_ms" => details.connect_postprocess_time_ms = as_f64,
            "connectblock_total_time_ms" => details.connectblock_total_time_ms = as_f64,
            "tx_count" => details.tx_count = as_u64,
            "txin_count" => details.txin_count = as_u64,
            other => log::warn!("matched attribute not recognized: {}", other),
        }
    }
}

impl Listener for ConnectBlockListener {
    fn name(&self) -> &'static str { "ConnectBlockListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        // Special-case UpdateTip since we can return the event in one shot.
        if line.contains(UPDATE_TIP_START) {
            return self.process_update_tip(line).map(Extracted::Event);
        }

        // The rest handles accumulation of ConnectBlockDetails.
        let mut found: Vec<(String, String)> = Vec::new();
        for patt in &self.detail_patts {
            if let Some(caps) = patt.captures(line) {
                for name in patt.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        found.push((name.to_string(), m.as_str().to_string()));
                    }
                }
                break;
            }
        }
        if found.is_empty() {
            return None;
        }
        for (name, value) in &found {
            self.apply_detail(name, value);
        }

        // The terminal measurement means the accumulator is complete.
        if self.next_details.connectblock_total_time_ms.is_some() {
            let (blockhash, height) = match (self.current_blockhash.take(), self.current_height.take())
            {
                (Some(b), Some(h)) => (b, h),
                _ => {
                    log::warn!("connect block details with no preceding UpdateTip: {}", line);
                    self.next_details = ConnectBlockDetails::default();
                    return None;
                }
            };

            let mut completed = std::mem::take(&mut self.next_details);
            completed.blockhash = blockhash;
            completed.height = height;
            completed.timestamp = get_time(line)?;
            return Some(Extracted::Event(Event::ConnectBlockDetails(completed)));
        }

        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const UPDATE_TIP: &str = "2019-08-09T16:28:42Z UpdateTip: new best=00000000000000000001d80d14ee4400b6d9c851debe27e6777f3876edd4ad1e height=589349 version=0x20800000 log2_work=90.944215 tx=443429260 date='2019-08-09T16:27:43Z' progress=1.000000 cache=8.7MiB(64093txo) warning='44 of last 100 blocks have unexpected version'";

    const DETAIL_LINES: &[&str] = &[
        "2019-07-29T18:34:17Z   - Load block from disk: 0.00ms [23.45s]",
        "2019-07-29T18:34:17Z     - Sanity checks: 0.01ms [17.24s (18.07ms/blk)]",
        "2019-07-29T18:34:17Z     - Fork checks: 0.04ms [0.09s (0.10ms/blk)]",
        "2019-07-29T18:34:17Z       - Connect 1982 transactions: 41.16ms (0.021ms/tx, 0.008ms/txin) [154.90s (162.37ms/blk)]",
        "2019-07-29T18:34:17Z     - Verify 4917 txins: 41.23ms (0.008ms/txin) [177.91s (186.49ms/blk)]",
        "2019-07-29T18:34:17Z     - Index writing: 13.62ms [13.08s (13.71ms/blk)]",
        "2019-07-29T18:34:17Z   - Connect total: 55.33ms [208.93s (219.00ms/blk)]",
        "2019-07-29T18:34:17Z   - Flush: 10.58ms [104.30s (109.33ms/blk)]",
        "2019-07-29T18:34:17Z   - Writing chainstate: 0.09ms [0.10s (0.10ms/blk)]",
        "2019-07-29T18:34:17Z   - Connect postprocess: 70.64ms [8.14s (8.53ms/blk)]",
        "2019-07-29T18:34:40Z - Connect block: 136.63ms [344.92s (361.55ms/blk)]",
    ];

    #[test]
    fn update_tip_one_shot() {
        let mut listener = ConnectBlockListener::new();
        let got = listener.process_line(UPDATE_TIP).unwrap();

        let event = match got {
            Extracted::Event(Event::ConnectBlockEvent(e)) => e,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(event.height, 589349);
        assert!(event.blockhash.ends_with("4ad1e"));
        assert_eq!(event.log2_work, 90.944215);
        assert_eq!(event.total_tx_count, 443429260);
        assert_eq!(event.version.as_deref(), Some("0x20800000"));
        assert_eq!(event.cachesize_mib, Some(8.7));
        assert_eq!(event.cachesize_txo, 64093);
        assert_eq!(event.warning.as_deref(), Some("44 of last 100 blocks have unexpected version"));
        assert_eq!(event.date.to_rfc3339(), "2019-08-09T16:27:43+00:00");
    }

    #[test]
    fn warning_only_update_tip_is_skipped() {
        // 0.12-era UpdateTip lines lack a height.
        let mut listener = ConnectBlockListener::new();
        let got = listener
            .process_line("2016-01-01T00:00:00Z UpdateTip: warning='unknown versionbits'");
        assert!(got.is_none());
    }

    #[test]
    fn details_accumulate_and_flush() {
        let mut listener = ConnectBlockListener::new();
        assert!(listener.process_line(UPDATE_TIP).is_some());

        let mut emitted = vec![];
        for line in DETAIL_LINES {
            if let Some(got) = listener.process_line(line) {
                emitted.push(got);
            }
        }
        assert_eq!(emitted.len(), 1);

        let details = match emitted.remove(0) {
            Extracted::Event(Event::ConnectBlockDetails(d)) => d,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(details.height, 589349);
        assert!(details.blockhash.ends_with("4ad1e"));
        assert_eq!(details.load_block_from_disk_time_ms, Some(0.00));
        assert_eq!(details.sanity_checks_time_ms, Some(0.01));
        assert_eq!(details.fork_checks_time_ms, Some(0.04));
        assert_eq!(details.connect_txs_time_ms, Some(41.16));
        assert_eq!(details.verify_time_ms, Some(41.23));
        assert_eq!(details.index_writing_time_ms, Some(13.62));
        assert_eq!(details.connect_total_time_ms, Some(55.33));
        assert_eq!(details.flush_coins_time_ms, Some(10.58));
        assert_eq!(details.flush_chainstate_time_ms, Some(0.09));
        assert_eq!(details.connect_postprocess_time_ms, Some(70.64));
        assert_eq!(details.connectblock_total_time_ms, Some(136.63));
        assert_eq!(details.tx_count, Some(1982));
        assert_eq!(details.txin_count, Some(4917));

        // The accumulator resets after a flush; a second round works.
        assert!(listener.process_line(UPDATE_TIP).is_some());
        let mut emitted = vec![];
        for line in DETAIL_LINES {
            if let Some(got) = listener.process_line(line) {
                emitted.push(got);
            }
        }
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn new_update_tip_discards_partial_accumulator() {
        let mut listener = ConnectBlockListener::new();
        assert!(listener.process_line(UPDATE_TIP).is_some());
        // Partial accumulation, no terminal line.
        assert!(listener.process_line(DETAIL_LINES[0]).is_none());

        assert!(listener.process_line(UPDATE_TIP).is_some());
        // Only the terminal line after the second tip: the partial load time
        // from before must be gone.
        let got = listener.process_line(DETAIL_LINES[10]).unwrap();
        let details = match got {
            Extracted::Event(Event::ConnectBlockDetails(d)) => d,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(details.load_block_from_disk_time_ms.is_none());
        assert_eq!(details.connectblock_total_time_ms, Some(136.63));
    }

    #[test]
    fn bare_txo_cache_variant() {
        // Pre-0.18 daemons report cache=NNN without the MiB part.
        let line = "2019-08-10T00:00:00Z UpdateTip: new best=00000000000000000010e1543aa317eb5e34148afda9b9da10edbdd9cb8a1c8d height=589733 version=0x20000000 log2_work=90.95 tx=443429261 date='2019-08-10 04:00:00' progress=1.000000 cache=64093";
        let mut listener = ConnectBlockListener::new();
        let got = listener.process_line(line).unwrap();
        let event = match got {
            Extracted::Event(Event::ConnectBlockEvent(e)) => e,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(event.cachesize_txo, 64093);
        assert!(event.cachesize_mib.is_none());
        assert_eq!(event.date.to_rfc3339(), "2019-08-10T04:00:00+00:00");
    }
}
