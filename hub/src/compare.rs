// SPDX-License-Identifier: CC0-1.0

//! Point-in-time mempool divergence between hosts.
//!
//! Complements the propagation aggregator's stream view with a periodic
//! snapshot comparison over `getrawmempool`: which transactions only one
//! host has, and which a majority has but some host is missing.

use std::collections::{BTreeMap, HashMap, HashSet};

use bmon_rpc::{gather_rpc, Client, GatherResult};

type HostName = String;
type Txid = String;

/// The outcome of comparing the fleet's mempools.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompareResult {
    /// Txids which are only seen by one host.
    pub unique: BTreeMap<HostName, Vec<Txid>>,
    /// Txids which are seen by a majority of hosts but not this one.
    pub missing: BTreeMap<HostName, Vec<Txid>>,
    /// Txids held only by a minority of hosts.
    pub have_uncommon: BTreeMap<HostName, Vec<Txid>>,
}

/// Fetch every host's mempool and compare.
///
/// Hosts whose RPC call fails are skipped with a warning; one failing node
/// does not fail the batch.
pub fn compare_fleet_mempools(clients: &[(String, Client)]) -> CompareResult {
    let gathered = gather_rpc(clients, "getrawmempool", &[]);

    let mut host_to_pool = HashMap::new();
    for (host, result) in gathered {
        match result {
            GatherResult::Value(value) => {
                let pool: Vec<Txid> = serde_json::from_value(value).unwrap_or_default();
                host_to_pool.insert(host, pool);
            }
            GatherResult::Error => {
                log::warn!("unable to retrieve mempool for {}; skipping", host);
            }
        }
    }
    compare_mempools(&host_to_pool)
}

/// Compare already-fetched mempool snapshots.
pub fn compare_mempools(host_to_pool: &HashMap<HostName, Vec<Txid>>) -> CompareResult {
    let host_to_set: HashMap<&str, HashSet<&str>> = host_to_pool
        .iter()
        .map(|(host, pool)| (host.as_str(), pool.iter().map(|t| t.as_str()).collect()))
        .collect();

    let num_hosts = host_to_set.len();
    let over_half = (num_hosts / 2) + 1;

    let mut all_tx: HashSet<&str> = HashSet::new();
    for pool in host_to_set.values() {
        all_tx.extend(pool);
    }

    let mut result = CompareResult::default();
    for tx in all_tx {
        let holders: Vec<&str> =
            host_to_set.iter().filter(|(_, pool)| pool.contains(tx)).map(|(h, _)| *h).collect();

        if holders.len() == 1 {
            result.unique.entry(holders[0].to_string()).or_default().push(tx.to_string());
        } else if holders.len() >= over_half {
            for (host, pool) in &host_to_set {
                if !pool.contains(tx) {
                    result.missing.entry(host.to_string()).or_default().push(tx.to_string());
                }
            }
        } else {
            for host in holders {
                result.have_uncommon.entry(host.to_string()).or_default().push(tx.to_string());
            }
        }
    }

    // Deterministic output for stable metrics and logs.
    for txids in result
        .unique
        .values_mut()
        .chain(result.missing.values_mut())
        .chain(result.have_uncommon.values_mut())
    {
        txids.sort();
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_unique_missing_and_uncommon() {
        let pools = HashMap::from([
            ("a".to_string(), vec!["t1".to_string(), "t2".to_string(), "t3".to_string()]),
            ("b".to_string(), vec!["t1".to_string(), "t2".to_string()]),
            ("c".to_string(), vec!["t1".to_string(), "t2".to_string(), "t4".to_string()]),
        ]);

        let got = compare_mempools(&pools);

        // t3 and t4 are singletons.
        assert_eq!(got.unique["a"], vec!["t3"]);
        assert_eq!(got.unique["c"], vec!["t4"]);
        // t1, t2 are majority-held by everyone: nothing missing.
        assert!(got.missing.is_empty());
        assert!(got.have_uncommon.is_empty());
    }

    #[test]
    fn majority_held_txid_marks_the_outlier() {
        let pools = HashMap::from([
            ("a".to_string(), vec!["t1".to_string()]),
            ("b".to_string(), vec!["t1".to_string()]),
            ("c".to_string(), vec!["t1".to_string()]),
            ("d".to_string(), vec![]),
        ]);

        let got = compare_mempools(&pools);
        assert_eq!(got.missing["d"], vec!["t1"]);
        assert!(got.unique.is_empty());
    }

    #[test]
    fn minority_txids_are_uncommon() {
        let pools = HashMap::from([
            ("a".to_string(), vec!["t9".to_string()]),
            ("b".to_string(), vec!["t9".to_string()]),
            ("c".to_string(), vec![]),
            ("d".to_string(), vec![]),
            ("e".to_string(), vec![]),
        ]);

        let got = compare_mempools(&pools);
        assert_eq!(got.have_uncommon["a"], vec!["t9"]);
        assert_eq!(got.have_uncommon["b"], vec!["t9"]);
        assert!(got.unique.is_empty());
    }
}
