// SPDX-License-Identifier: CC0-1.0

//! Block attach/detach extraction and the reorg reducer.

use bmon_events::{BlockConnectedEvent, BlockDisconnectedEvent, BlockDownloadTimeout, Event, ReorgEvent};
use regex::Regex;

use super::{get_time, match_groups, peer_patt, Extracted, Listener, HASH};

fn block_event_patts() -> Vec<Regex> {
    vec![
        Regex::new(r"\s+height=(?P<height>\d+)").unwrap(),
        Regex::new(&format!(r"\s+hash=(?P<blockhash>{})", HASH)).unwrap(),
    ]
}

/// Parse a `BlockConnected:`/`BlockDisconnected:` line into its parts.
///
/// The daemon logs each of these twice; the `Enqueuing` duplicate is
/// ignored.
fn parse_block_event(
    patts: &[Regex],
    marker: &str,
    line: &str,
) -> Option<(chrono::DateTime<chrono::Utc>, String, u64)> {
    if !line.contains(marker) || line.contains(" Enqueuing ") {
        return None;
    }
    let matches = match_groups(patts, line);
    Some((
        get_time(line)?,
        matches.get("blockhash")?.clone(),
        matches.get("height")?.parse().ok()?,
    ))
}

/// `[validation] BlockConnected: block hash=1397a1... block height=1`
pub struct BlockConnectedListener {
    patts: Vec<Regex>,
}

impl std::fmt::Debug for BlockConnectedListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockConnectedListener")
    }
}

impl BlockConnectedListener {
    pub fn new() -> BlockConnectedListener { BlockConnectedListener { patts: block_event_patts() } }

    fn parse(&self, line: &str) -> Option<BlockConnectedEvent> {
        let (timestamp, blockhash, height) =
            parse_block_event(&self.patts, " BlockConnected: ", line)?;
        Some(BlockConnectedEvent { host: String::new(), timestamp, blockhash, height })
    }
}

impl Listener for BlockConnectedListener {
    fn name(&self) -> &'static str { "BlockConnectedListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        self.parse(line).map(|e| Extracted::Event(Event::BlockConnectedEvent(e)))
    }
}

/// `[validation] BlockDisconnected: block hash=3cfd12... block height=1`
pub struct BlockDisconnectedListener {
    patts: Vec<Regex>,
}

impl std::fmt::Debug for BlockDisconnectedListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockDisconnectedListener")
    }
}

impl BlockDisconnectedListener {
    pub fn new() -> BlockDisconnectedListener {
        BlockDisconnectedListener { patts: block_event_patts() }
    }

    fn parse(&self, line: &str) -> Option<BlockDisconnectedEvent> {
        let (timestamp, blockhash, height) =
            parse_block_event(&self.patts, " BlockDisconnected: ", line)?;
        Some(BlockDisconnectedEvent { host: String::new(), timestamp, blockhash, height })
    }
}

impl Listener for BlockDisconnectedListener {
    fn name(&self) -> &'static str { "BlockDisconnectedListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        self.parse(line).map(|e| Extracted::Event(Event::BlockDisconnectedEvent(e)))
    }
}

/// Reduces disconnect/connect sequences into a single [`ReorgEvent`].
///
/// Disconnections arrive high-to-low and are inserted at the head so the
/// list stays sorted low-to-high; replacement connections are appended. The
/// reorg completes when a connection arrives at the maximum disconnected
/// height. A connection with no outstanding disconnects is normal forward
/// progress and is ignored.
pub struct ReorgListener {
    disconnects: Vec<BlockDisconnectedEvent>,
    replacements: Vec<BlockConnectedEvent>,
    disconnect_listener: BlockDisconnectedListener,
    connect_listener: BlockConnectedListener,
}

impl std::fmt::Debug for ReorgListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ReorgListener({} disconnects, {} replacements)",
            self.disconnects.len(),
            self.replacements.len()
        )
    }
}

impl ReorgListener {
    pub fn new() -> ReorgListener {
        ReorgListener {
            disconnects: Vec::new(),
            replacements: Vec::new(),
            disconnect_listener: BlockDisconnectedListener::new(),
            connect_listener: BlockConnectedListener::new(),
        }
    }

    fn max_height(&self) -> Option<u64> { self.disconnects.last().map(|d| d.height) }
}

impl Listener for ReorgListener {
    fn name(&self) -> &'static str { "ReorgListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        if let Some(disconnect) = self.disconnect_listener.parse(line) {
            if self.disconnects.is_empty() {
                log::info!(
                    "started to detect a reorg at height {} ({})",
                    disconnect.height,
                    disconnect.blockhash
                );
            }
            self.disconnects.insert(0, disconnect);
            return None;
        }

        let connect = self.connect_listener.parse(line)?;

        // No outstanding disconnects: just a regular connection event.
        let max_height = self.max_height()?;

        if connect.height <= max_height {
            self.replacements.push(connect);
            if self.replacements.last().map(|r| r.height) < Some(max_height) {
                // Still connecting substitute blocks.
                return None;
            }
        }

        // The reorg is complete.
        let d_heights: Vec<u64> = self.disconnects.iter().map(|d| d.height).collect();
        let r_heights: Vec<u64> = self.replacements.iter().map(|r| r.height).collect();
        if d_heights != r_heights {
            log::error!(
                "reorg detection looks broken; disconnects: {:?} vs. replacements: {:?}",
                d_heights,
                r_heights
            );
        }

        let reorg = ReorgEvent {
            host: String::new(),
            finished_timestamp: self.replacements.last().map(|r| r.timestamp)?,
            min_height: self.disconnects.first().map(|d| d.height)?,
            max_height,
            old_blockhashes: self.disconnects.iter().map(|d| d.blockhash.clone()).collect(),
            new_blockhashes: self.replacements.iter().map(|r| r.blockhash.clone()).collect(),
        };
        self.disconnects.clear();
        self.replacements.clear();

        log::info!("reorg finished: {}..{}", reorg.min_height, reorg.max_height);
        Some(Extracted::Event(Event::ReorgEvent(reorg)))
    }
}

/// `Timeout downloading block 00000000000000000008... from peer=24, disconnecting`
pub struct BlockDownloadTimeoutListener {
    patts: Vec<Regex>,
}

impl std::fmt::Debug for BlockDownloadTimeoutListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockDownloadTimeoutListener")
    }
}

impl BlockDownloadTimeoutListener {
    pub fn new() -> BlockDownloadTimeoutListener {
        BlockDownloadTimeoutListener {
            patts: vec![
                Regex::new(&format!(r"block (?P<blockhash>{})", HASH)).unwrap(),
                peer_patt(),
            ],
        }
    }
}

impl Listener for BlockDownloadTimeoutListener {
    fn name(&self) -> &'static str { "BlockDownloadTimeoutListener" }

    fn process_line(&mut self, line: &str) -> Option<Extracted> {
        if !line.contains("Timeout downloading block ") {
            return None;
        }

        let matches = match_groups(&self.patts, line);
        Some(Extracted::Event(Event::BlockDownloadTimeout(BlockDownloadTimeout {
            host: String::new(),
            timestamp: get_time(line)?,
            blockhash: matches.get("blockhash")?.clone(),
            peer_num: matches.get("peer_num")?.parse().ok()?,
            peer_id: None,
        })))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enqueuing_duplicates_ignored() {
        let mut listener = BlockDisconnectedListener::new();
        let got = listener.process_line(
            "2022-10-22T14:22:49.357774Z [msghand] [validationinterface.cpp:239] [BlockDisconnected] [validation] Enqueuing BlockDisconnected: block hash=3cfd126d960a9b87823fd94d48121f774aac448c9a6f1b48efc547c61f9b8c1f block height=1",
        );
        assert!(got.is_none());

        let got = listener.process_line(
            "2022-10-22T14:22:49.357774Z [validation] BlockDisconnected: block hash=3cfd126d960a9b87823fd94d48121f774aac448c9a6f1b48efc547c61f9b8c1f block height=1",
        );
        match got {
            Some(Extracted::Event(Event::BlockDisconnectedEvent(e))) => {
                assert_eq!(e.height, 1);
                assert!(e.blockhash.starts_with("3cfd"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn download_timeout() {
        let mut listener = BlockDownloadTimeoutListener::new();
        let got = listener.process_line(
            "2022-10-22T14:22:49.357774Z Timeout downloading block 000000000000000000086779ecf494b0595a9b779f501c7e25fb2be0b69907a2 from peer=24, disconnecting",
        );
        match got {
            Some(Extracted::Event(Event::BlockDownloadTimeout(e))) => {
                assert_eq!(e.peer_num, 24);
                assert!(e.blockhash.starts_with("0000000000000000000867"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
