// SPDX-License-Identifier: CC0-1.0

//! Peer identity and peer aggregate records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fields that together identify one peer-as-seen-by-one-host.
///
/// The daemon reuses peer numbers after disconnection, so identity is the
/// whole property tuple; any change creates a new row.
pub const PEER_IDENTITY_FIELDS: [&'static str; 12] = [
    "host",
    "num",
    "addr",
    "connection_type",
    "inbound",
    "network",
    "services",
    "subver",
    "version",
    "relaytxes",
    "bip152_hb_to",
    "bip152_hb_from",
];

/// One host's view of one remote peer, from `getpeerinfo`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Peer {
    /// Name of the observing host.
    pub host: String,
    /// Called `id` in `getpeerinfo`.
    pub num: u64,
    pub addr: String,
    pub connection_type: String,
    pub inbound: bool,
    pub network: String,
    /// Service bits, hex encoded.
    pub services: String,
    pub subver: String,
    pub version: i64,
    pub relaytxes: bool,
    /// BIP152 high-bandwidth mode, us to them. Versions <= 0.19 lack this.
    pub bip152_hb_to: Option<bool>,
    /// BIP152 high-bandwidth mode, them to us. Versions <= 0.19 lack this.
    pub bip152_hb_from: Option<bool>,
    /// Decoded service names. Versions pre 0.19 lack this.
    pub servicesnames: Option<serde_json::Value>,
}

impl Peer {
    /// Canonical rendering of the identity fields, in [`PEER_IDENTITY_FIELDS`]
    /// order. Fingerprinting this string yields the peer's uniqueness key.
    pub fn identity_string(&self) -> String {
        let opt = |b: Option<bool>| b.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.host,
            self.num,
            self.addr,
            self.connection_type,
            self.inbound,
            self.network,
            self.services,
            self.subver,
            self.version,
            self.relaytxes,
            opt(self.bip152_hb_to),
            opt(self.bip152_hb_from),
        )
    }

    /// The peer's uniqueness key: a fingerprint of the identity fields.
    ///
    /// The daemon can reuse a peer number after reconnection with different
    /// properties; the fingerprint changes with them, so events always
    /// reference the peer-as-configured that produced them.
    pub fn fingerprint(&self) -> String { crate::fingerprint(self.identity_string().as_bytes()) }

    /// Build a `Peer` from one entry of a `getpeerinfo` response.
    ///
    /// Returns `None` when a required field is absent or mistyped; tolerant
    /// of extra fields from newer daemons.
    pub fn from_peerinfo(host: &str, info: &serde_json::Value) -> Option<Peer> {
        Some(Peer {
            host: host.to_string(),
            num: info.get("id")?.as_u64()?,
            addr: info.get("addr")?.as_str()?.to_string(),
            connection_type: info
                .get("connection_type")
                .and_then(|v| v.as_str())
                .unwrap_or(if info.get("inbound")?.as_bool()? { "inbound" } else { "outbound" })
                .to_string(),
            inbound: info.get("inbound")?.as_bool()?,
            network: info.get("network").and_then(|v| v.as_str()).unwrap_or("ipv4").to_string(),
            services: info.get("services")?.as_str()?.to_string(),
            subver: info.get("subver").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            version: info.get("version")?.as_i64()?,
            relaytxes: info.get("relaytxes").and_then(|v| v.as_bool()).unwrap_or(true),
            bip152_hb_to: info.get("bip152_hb_to").and_then(|v| v.as_bool()),
            bip152_hb_from: info.get("bip152_hb_from").and_then(|v| v.as_bool()),
            servicesnames: info.get("servicesnames").cloned(),
        })
    }
}

/// Interesting aggregates periodically pulled from one host.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PeerStats {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub num_peers: u64,
    pub ping_mean: f64,
    pub ping_min: f64,
    pub ping_max: f64,
    pub bytesrecv: f64,
    pub bytessent: f64,
    /// Per-message-type received byte counts.
    pub bytesrecv_per_msg: serde_json::Value,
    /// Per-message-type sent byte counts.
    pub bytessent_per_msg: serde_json::Value,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peer_from_peerinfo() {
        let info = serde_json::json!({
            "id": 3,
            "addr": "203.0.113.5:8333",
            "connection_type": "outbound-full-relay",
            "inbound": false,
            "network": "ipv4",
            "services": "0000000000000409",
            "subver": "/Satoshi:24.0.1/",
            "version": 70016,
            "relaytxes": true,
            "bip152_hb_to": true,
            "bip152_hb_from": false,
            "servicesnames": ["NETWORK", "WITNESS"],
            "some_future_field": 42,
        });

        let peer = Peer::from_peerinfo("bitcoind", &info).unwrap();
        assert_eq!(peer.num, 3);
        assert_eq!(peer.connection_type, "outbound-full-relay");
        assert_eq!(peer.bip152_hb_to, Some(true));
    }

    #[test]
    fn peer_from_old_daemon() {
        // Pre-0.19 daemons lack connection_type, network, servicesnames.
        let info = serde_json::json!({
            "id": 1,
            "addr": "203.0.113.9:8333",
            "inbound": true,
            "services": "000000000000040d",
            "subver": "/Satoshi:0.18.0/",
            "version": 70015,
            "relaytxes": true,
        });

        let peer = Peer::from_peerinfo("bitcoind", &info).unwrap();
        assert_eq!(peer.connection_type, "inbound");
        assert_eq!(peer.network, "ipv4");
        assert!(peer.bip152_hb_to.is_none());
        assert!(peer.servicesnames.is_none());
    }
}
