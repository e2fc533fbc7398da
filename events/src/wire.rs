// SPDX-License-Identifier: CC0-1.0

//! The edge-to-hub wire format.
//!
//! Everything an edge sends the hub is a JSON map with a `_model`
//! discriminator: the event kinds from [`Event`](crate::Event) plus the
//! identity records (`Host`, `Peer`, `LogProgress`). Event payloads may also
//! carry a `_linehash` key, the fingerprint of the log line that produced
//! them; the hub upserts the sender's log cursor from it after a successful
//! persist. Delivery is at-least-once; the hub is idempotent for
//! identity-keyed rows and duplicate-tolerant for append-only rows.

use serde_json::Value;

use crate::{Event, Host, LogProgress, Peer};

/// The hub-side durable queue edges push into.
pub const INGEST_QUEUE: &str = "incoming_events";

/// Serialize an event for the hub queue, attaching the source line's
/// fingerprint.
pub fn event_record(event: &Event, linehash: Option<&str>) -> Value {
    let mut value = serde_json::to_value(event).expect("events serialize infallibly");
    if let Some(hash) = linehash {
        value["_linehash"] = hash.into();
    }
    value
}

/// Serialize a host identity upsert.
pub fn host_record(host: &Host) -> Value {
    let mut value = serde_json::to_value(host).expect("hosts serialize infallibly");
    value["_model"] = "Host".into();
    value["fingerprint"] = host.fingerprint().into();
    value
}

/// Serialize a peer identity upsert.
pub fn peer_record(peer: &Peer) -> Value {
    let mut value = serde_json::to_value(peer).expect("peers serialize infallibly");
    value["_model"] = "Peer".into();
    value["fingerprint"] = peer.fingerprint().into();
    value
}

/// Serialize a log-cursor upsert.
pub fn log_progress_record(progress: &LogProgress) -> Value {
    let mut value = serde_json::to_value(progress).expect("progress serializes infallibly");
    value["_model"] = "LogProgress".into();
    value
}

/// A message popped off the ingest queue, dispatched by `_model`.
#[derive(Clone, Debug, PartialEq)]
pub enum Ingest {
    Event { event: Event, linehash: Option<String> },
    Host { host: Host, fingerprint: String },
    Peer { peer: Peer, fingerprint: String },
    LogProgress(LogProgress),
}

/// Parse one queue payload.
///
/// Unknown or malformed payloads return a human-readable error string; the
/// hub logs and drops them (at-least-once tolerance, not a ledger).
pub fn parse_ingest(raw: &str) -> Result<Ingest, String> {
    let mut value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let model = value
        .get("_model")
        .and_then(|m| m.as_str())
        .ok_or_else(|| "payload lacks _model".to_string())?
        .to_string();

    let take_fingerprint = |value: &mut Value| -> Result<String, String> {
        match value.as_object_mut().and_then(|o| o.remove("fingerprint")) {
            Some(Value::String(fp)) => Ok(fp),
            _ => Err(format!("{} record lacks fingerprint", model)),
        }
    };

    match model.as_str() {
        "Host" => {
            let fingerprint = take_fingerprint(&mut value)?;
            let host = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(Ingest::Host { host, fingerprint })
        }
        "Peer" => {
            let fingerprint = take_fingerprint(&mut value)?;
            let peer = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(Ingest::Peer { peer, fingerprint })
        }
        "LogProgress" => {
            let progress = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(Ingest::LogProgress(progress))
        }
        _ => {
            let linehash = value
                .as_object_mut()
                .and_then(|o| o.remove("_linehash"))
                .and_then(|v| v.as_str().map(|s| s.to_string()));
            let event = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(Ingest::Event { event, linehash })
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone as _;
    use chrono::Utc;

    use super::*;
    use crate::MempoolAccept;

    #[test]
    fn event_round_trip_with_linehash() {
        let event = Event::MempoolAccept(MempoolAccept {
            host: "node0".into(),
            timestamp: Utc.with_ymd_and_hms(2022, 10, 17, 17, 57, 43).unwrap(),
            txhash: "fa4f".into(),
            peer_num: 11,
            pool_size_txns: 11848,
            pool_size_kb: 25560,
        });

        let raw = event_record(&event, Some("abcd1234")).to_string();
        match parse_ingest(&raw).unwrap() {
            Ingest::Event { event: got, linehash } => {
                assert_eq!(got, event);
                assert_eq!(linehash.as_deref(), Some("abcd1234"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn host_round_trip() {
        let host = Host {
            name: "bitcoind".into(),
            cpu_info: "test".into(),
            memory_bytes: 1024,
            nproc: 4,
            region: None,
            bitcoin_version: "v23.0".into(),
            bitcoin_gitref: None,
            bitcoin_gitsha: None,
            bitcoin_dbcache: 450,
            bitcoin_prune: 0,
            bitcoin_listen: false,
            bitcoin_extra: serde_json::json!({"flags": "-regtest"}),
        };

        let raw = host_record(&host).to_string();
        match parse_ingest(&raw).unwrap() {
            Ingest::Host { host: got, fingerprint } => {
                assert_eq!(got, host);
                assert_eq!(fingerprint, host.fingerprint());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_ingest("not json").is_err());
        assert!(parse_ingest("{\"no_model\": true}").is_err());
    }
}
