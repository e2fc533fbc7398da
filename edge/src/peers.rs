// SPDX-License-Identifier: CC0-1.0

//! The local peer cache and synchronous peer re-sync.
//!
//! The daemon refers to peers by a small reusable number; the rest of the
//! system wants a stable identity that changes when the peer's properties
//! do. Two fast-store tables bridge the gap: `peerinfo_cache` maps a peer
//! number to its last-seen properties and `peer_id_map` maps it to the
//! stable fingerprint the hub keys peer rows by. A cache miss triggers a
//! synchronous `getpeerinfo` reconcile; peers that still cannot be resolved
//! cause the referencing event to be dropped upstream.

use std::sync::Arc;

use bmon_events::{wire, Peer};
use bmon_kv::FastStore;
use bmon_rpc::Client;

use crate::queues::HubClient;

/// Maps peer numbers to the stable identity the hub stores.
pub struct PeerCache {
    local: Arc<dyn FastStore>,
    host: String,
    rpc: Arc<Client>,
}

impl std::fmt::Debug for PeerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerCache({})", self.host)
    }
}

impl PeerCache {
    pub fn new(local: Arc<dyn FastStore>, host: &str, rpc: Arc<Client>) -> PeerCache {
        PeerCache { local, host: host.to_string(), rpc }
    }

    fn info_key(&self, num: u64) -> String { format!("peerinfo_cache.{}.{}", self.host, num) }

    fn id_key(&self, num: u64) -> String { format!("peer_id_map.{}.{}", self.host, num) }

    /// The cached properties for `num`, if any.
    pub fn cached_peer(&self, num: u64) -> bmon_kv::Result<Option<Peer>> {
        Ok(self
            .local
            .get(&self.info_key(num))?
            .and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    /// Resolve a peer number to its stable fingerprint.
    ///
    /// On a miss, runs one synchronous re-sync against the daemon and
    /// retries; `None` means the daemon no longer knows the peer either.
    pub fn resolve(&self, num: u64, hub: &HubClient) -> anyhow::Result<Option<String>> {
        if let Some(id) = self.local.get(&self.id_key(num))? {
            return Ok(Some(id));
        }

        log::info!("peer {} not cached for {}; running peer re-sync", num, self.host);
        self.sync(hub)?;

        Ok(self.local.get(&self.id_key(num))?)
    }

    /// Reconcile the cache (and the hub) with the daemon's current peer set.
    ///
    /// Every current peer is upserted to the hub; identities are pure
    /// functions of the peer's properties so repeats are idempotent there.
    pub fn sync(&self, hub: &HubClient) -> anyhow::Result<usize> {
        let infos = self.rpc.get_peer_info()?;
        let mut synced = 0;

        for info in &infos {
            let peer = match Peer::from_peerinfo(&self.host, info) {
                Some(peer) => peer,
                None => {
                    log::warn!("skipping malformed getpeerinfo entry: {}", info);
                    continue;
                }
            };

            let fingerprint = peer.fingerprint();
            self.local.set(&self.info_key(peer.num), &serde_json::to_string(&peer)?)?;
            self.local.set(&self.id_key(peer.num), &fingerprint)?;
            hub.send(&wire::peer_record(&peer))?;
            synced += 1;
        }

        log::info!("synced {} peers for {}", synced, self.host);
        Ok(synced)
    }
}

#[cfg(test)]
mod test {
    use bmon_kv::MemoryStore;

    use super::*;

    #[test]
    fn cached_fingerprint_resolves_without_rpc() {
        let local: Arc<dyn FastStore> = Arc::new(MemoryStore::new());
        // Unroutable endpoint: resolution must not need it for a cache hit.
        let rpc = Arc::new(Client::new("http://127.0.0.1:1", bmon_rpc::Auth::None).unwrap());
        let cache = PeerCache::new(local.clone(), "node0", rpc);

        local.set("peer_id_map.node0.3", "feedface").unwrap();
        let hub = HubClient::new(Arc::new(MemoryStore::new()));
        assert_eq!(cache.resolve(3, &hub).unwrap().as_deref(), Some("feedface"));
    }
}
