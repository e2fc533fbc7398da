// SPDX-License-Identifier: CC0-1.0

//! End-to-end tests over the follower + listener chain.

use bmon_edge::listeners::{Extracted, LineRouter};
use bmon_edge::logfollow::LogFollower;
use bmon_events::{linehash, Event};

const REORG_LOG: &[&str] = &[
    "2022-10-22T14:22:48.100000Z [validation] BlockConnected: block hash=0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206 block height=0",
    "2022-10-22T14:22:48.200000Z [validation] BlockConnected: block hash=04fb55cec0a7e506d64b16ed26eefc2ccf66a927d6f1a3bb113df1630d59859f block height=1",
    "2022-10-22T14:22:48.300000Z [validation] BlockConnected: block hash=3cfd126d960a9b87823fd94d48121f774aac448c9a6f1b48efc547c61f9b8c1f block height=2",
    // The daemon logs each dis/connection twice; these duplicates must not
    // double-count.
    "2022-10-22T14:22:49.357774Z [msghand] [validationinterface.cpp:239] [BlockDisconnected] [validation] Enqueuing BlockDisconnected: block hash=3cfd126d960a9b87823fd94d48121f774aac448c9a6f1b48efc547c61f9b8c1f block height=2",
    "2022-10-22T14:22:49.357800Z [validation] BlockDisconnected: block hash=3cfd126d960a9b87823fd94d48121f774aac448c9a6f1b48efc547c61f9b8c1f block height=2",
    "2022-10-22T14:22:49.357900Z [validation] BlockDisconnected: block hash=04fb55cec0a7e506d64b16ed26eefc2ccf66a927d6f1a3bb113df1630d59859f block height=1",
    "2022-10-22T14:22:49.358000Z [validation] BlockConnected: block hash=1397a170ca910a5689af809abf4cb25070c36e7bc023e2a23064652543b7f5eb block height=1",
    "2022-10-22T14:22:49.358839Z [validation] BlockConnected: block hash=54d205ef4c87ce25fddb28b0c792f44b308613e75d88b61d71906aed70c64b48 block height=2",
    "2022-10-22T14:22:50.000000Z [validation] BlockConnected: block hash=7c06da428d44f32c0a77f585a44181d3f71fcbc55b44133d60d6941fa9165b0d block height=3",
];

fn run_chain(lines: &[&str]) -> Vec<Event> {
    let mut router = LineRouter::standard("node0", false, None);
    let mut events = vec![];
    for line in lines {
        for extracted in router.process_line(line) {
            if let Extracted::Event(event) = extracted {
                events.push(event);
            }
        }
    }
    events
}

#[test]
fn depth_two_reorg_emits_one_event() {
    let events = run_chain(REORG_LOG);

    let reorgs: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::ReorgEvent(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(reorgs.len(), 1);

    let reorg = reorgs[0];
    assert_eq!(reorg.host, "node0");
    assert_eq!(reorg.min_height, 1);
    assert_eq!(reorg.max_height, 2);
    assert_eq!(
        reorg.old_blockhashes,
        vec![
            "04fb55cec0a7e506d64b16ed26eefc2ccf66a927d6f1a3bb113df1630d59859f".to_string(),
            "3cfd126d960a9b87823fd94d48121f774aac448c9a6f1b48efc547c61f9b8c1f".to_string(),
        ]
    );
    assert_eq!(
        reorg.new_blockhashes,
        vec![
            "1397a170ca910a5689af809abf4cb25070c36e7bc023e2a23064652543b7f5eb".to_string(),
            "54d205ef4c87ce25fddb28b0c792f44b308613e75d88b61d71906aed70c64b48".to_string(),
        ]
    );
    assert_eq!(
        reorg.finished_timestamp.to_rfc3339(),
        "2022-10-22T14:22:49.358839+00:00"
    );

    // Raw block events still come through alongside the reduction: five
    // non-duplicate connections, two disconnections.
    let connected =
        events.iter().filter(|e| matches!(e, Event::BlockConnectedEvent(_))).count();
    let disconnected =
        events.iter().filter(|e| matches!(e, Event::BlockDisconnectedEvent(_))).count();
    assert_eq!(connected, 6);
    assert_eq!(disconnected, 2);
}

#[test]
fn balanced_reorg_any_depth() {
    // D disconnects (high to low) then D connects (low to high) at the same
    // heights yields exactly one reorg covering the range.
    for depth in 1..=4u64 {
        let base = 100u64;
        let mut lines = vec![];
        for h in 0..depth {
            let height = base + depth - 1 - h;
            lines.push(format!(
                "2022-10-22T14:22:49.{:06}Z [validation] BlockDisconnected: block hash=aa{:02x} block height={}",
                h, height, height
            ));
        }
        for h in 0..depth {
            let height = base + h;
            lines.push(format!(
                "2022-10-22T14:22:50.{:06}Z [validation] BlockConnected: block hash=bb{:02x} block height={}",
                h, height, height
            ));
        }

        let refs: Vec<&str> = lines.iter().map(|l| l.as_str()).collect();
        let events = run_chain(&refs);
        let reorgs: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::ReorgEvent(r) => Some(r),
                _ => None,
            })
            .collect();

        assert_eq!(reorgs.len(), 1, "depth {}", depth);
        assert_eq!(reorgs[0].min_height, base);
        assert_eq!(reorgs[0].max_height, base + depth - 1);
        assert_eq!(reorgs[0].old_blockhashes.len(), depth as usize);
        // Old hashes ordered low to high by height.
        let expected_old: Vec<String> =
            (0..depth).map(|h| format!("aa{:02x}", base + h)).collect();
        assert_eq!(reorgs[0].old_blockhashes, expected_old);
    }
}

#[test]
fn cursor_round_trip_replays_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("debug.log");
    std::fs::write(&path, REORG_LOG.join("\n") + "\n").unwrap();

    // First pass: consume everything, remembering the last accepted line.
    let mut follower = LogFollower::open(&path, None).unwrap();
    let mut router = LineRouter::standard("node0", false, None);
    let mut last_hash = String::new();
    let mut first_pass = 0;
    while let Some(line) = follower.poll_line() {
        let hash = linehash(&line);
        for extracted in router.process_line(&line) {
            if matches!(extracted, Extracted::Event(_)) {
                first_pass += 1;
                last_hash = hash.clone();
            }
        }
    }
    assert!(first_pass > 0);
    assert_eq!(last_hash, linehash(REORG_LOG[REORG_LOG.len() - 1]));

    // Restart against the unchanged file from the stored cursor: no line at
    // or before the cursor is re-emitted.
    let mut follower = LogFollower::open(&path, Some(&last_hash)).unwrap();
    let mut router = LineRouter::standard("node0", false, None);
    let mut replayed = 0;
    while let Some(line) = follower.poll_line() {
        replayed += router.process_line(&line).len();
    }
    assert_eq!(replayed, 0);
}

#[test]
fn update_tip_feeds_both_connect_block_and_header_to_tip() {
    // One UpdateTip line is seen by every listener: with a pending header
    // measurement it must produce both a ConnectBlockEvent and a
    // HeaderToTipEvent.
    let lines = [
        "2019-08-09T16:28:40Z Saw new header hash=00000000000000000001d80d14ee4400b6d9c851debe27e6777f3876edd4ad1e height=589349",
        "2019-08-09T16:28:42Z UpdateTip: new best=00000000000000000001d80d14ee4400b6d9c851debe27e6777f3876edd4ad1e height=589349 version=0x20800000 log2_work=90.944215 tx=443429260 date='2019-08-09T16:27:43Z' progress=1.000000 cache=8.7MiB(64093txo)",
    ];

    let events = run_chain(&lines);
    assert!(events.iter().any(|e| matches!(e, Event::ConnectBlockEvent(_))));
    assert!(events.iter().any(|e| matches!(e, Event::HeaderToTipEvent(_))));
}
