// SPDX-License-Identifier: CC0-1.0

//! Line-to-event extraction.
//!
//! A [`Listener`] inspects one log line and may produce an event (or, for
//! the pong listener, a bare peer number). Stateless extractors fire on a
//! single line; stateful reducers (reorg, header-to-tip, the connect-block
//! detail accumulator) run small state machines across lines. The
//! [`LineRouter`] owns an ordered chain of listeners and shows every line to
//! every listener: a match does not consume the line, because e.g.
//! `UpdateTip:` lines feed both the connect-block extractor and the
//! header-to-tip reducer.

mod blocks;
mod connect_block;
mod header_to_tip;
mod mempool;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use bmon_events::Event;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

pub use self::{
    blocks::{
        BlockConnectedListener, BlockDisconnectedListener, BlockDownloadTimeoutListener,
        ReorgListener,
    },
    connect_block::ConnectBlockListener,
    header_to_tip::HeaderToTipListener,
    mempool::{MempoolAcceptListener, MempoolRejectListener, PongListener},
};

/// Regex fragment for a bare float.
pub(crate) const FLOAT: &str = r"\d*\.\d+";
/// Regex fragment for a hex hash.
pub(crate) const HASH: &str = "[a-f0-9]+";
/// Regex fragment for a 0x-prefixed hex value.
pub(crate) const HEX: &str = "0x[a-f0-9]+";
/// Regex fragment for quoted-string contents.
pub(crate) const NOT_QUOTE: &str = "[^'\"]+";

/// The `peer=N` fragment common to many lines.
pub(crate) fn peer_patt() -> Regex { Regex::new(r"\s+peer=(?P<peer_num>\d+)").unwrap() }

/// What a listener extracted from one line.
#[derive(Clone, Debug, PartialEq)]
pub enum Extracted {
    /// A complete event.
    Event(Event),
    /// A peer number; the secondary channel used only by the pong listener
    /// so the whole chain stays uniformly typed.
    PeerNum(u64),
}

/// One link in the extraction chain.
pub trait Listener: Send {
    /// Name used in `ProcessLineError` records.
    fn name(&self) -> &'static str;

    /// Inspect `line`; `None` means "not mine".
    fn process_line(&mut self, line: &str) -> Option<Extracted>;
}

/// Run every pattern against `line` and merge all named groups.
pub(crate) fn match_groups(patterns: &[Regex], line: &str) -> HashMap<String, String> {
    let mut matches = HashMap::new();
    for patt in patterns {
        if let Some(caps) = patt.captures(line) {
            for name in patt.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    matches.insert(name.to_string(), m.as_str().to_string());
                }
            }
        }
    }
    matches
}

/// Return the time a log message was emitted, in UTC.
///
/// The timestamp is the line's first whitespace-delimited token. Early
/// daemons write `2019-08-09 16:27:43`; later ones RFC 3339 with
/// microseconds.
pub(crate) fn get_time(line: &str) -> Option<DateTime<Utc>> {
    parse_log_datetime(line.split_whitespace().next()?)
}

/// Parse either of the timestamp formats the daemon has used over the years.
pub(crate) fn parse_log_datetime(timestr: &str) -> Option<DateTime<Utc>> {
    let timestr = timestr.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(timestr) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(timestr, "%Y-%m-%d %H:%M:%S").ok().map(|n| n.and_utc())
}

/// The ordered chain of listeners for one monitored node.
///
/// Reducer state is per-instance, so one router per edge gives per-host
/// state machines.
pub struct LineRouter {
    host: String,
    listeners: Vec<Box<dyn Listener>>,
}

impl std::fmt::Debug for LineRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LineRouter({}, {} listeners)", self.host, self.listeners.len())
    }
}

impl LineRouter {
    /// The standard chain, in canonical order.
    ///
    /// `pre_taproot` controls reject-reason suppression for old daemons;
    /// `ignore_older_than` drops stale high-volume events at extraction time
    /// (6 h in production, unbounded in debug runs).
    pub fn standard(
        host: &str,
        pre_taproot: bool,
        ignore_older_than: Option<chrono::Duration>,
    ) -> LineRouter {
        LineRouter {
            host: host.to_string(),
            listeners: vec![
                Box::new(ConnectBlockListener::new()),
                Box::new(MempoolAcceptListener::new(ignore_older_than)),
                Box::new(MempoolRejectListener::new(pre_taproot, ignore_older_than)),
                Box::new(PongListener::new(ignore_older_than)),
                Box::new(BlockConnectedListener::new()),
                Box::new(BlockDisconnectedListener::new()),
                Box::new(ReorgListener::new()),
                Box::new(BlockDownloadTimeoutListener::new()),
                Box::new(HeaderToTipListener::new()),
            ],
        }
    }

    /// A router with an explicit chain; used by tests.
    pub fn with_listeners(host: &str, listeners: Vec<Box<dyn Listener>>) -> LineRouter {
        LineRouter { host: host.to_string(), listeners }
    }

    /// Present `line` to every listener in order.
    ///
    /// Outputs come back in chain order with the host stamped on. A
    /// panicking listener is recorded as a `ProcessLineError` and does not
    /// abort the rest of the chain.
    pub fn process_line(&mut self, line: &str) -> Vec<Extracted> {
        let mut out = Vec::new();
        for listener in &mut self.listeners {
            let name = listener.name();
            match panic::catch_unwind(AssertUnwindSafe(|| listener.process_line(line))) {
                Ok(Some(Extracted::Event(mut event))) => {
                    event.set_host(&self.host);
                    out.push(Extracted::Event(event));
                }
                Ok(Some(extracted)) => out.push(extracted),
                Ok(None) => {}
                Err(_) => {
                    log::error!("listener {} failed on line: {}", name, line);
                    out.push(Extracted::Event(Event::ProcessLineError(
                        bmon_events::ProcessLineError {
                            hostname: self.host.clone(),
                            timestamp: Utc::now(),
                            listener: name.to_string(),
                            line: line.to_string(),
                        },
                    )));
                }
            }
        }
        out
    }
}
