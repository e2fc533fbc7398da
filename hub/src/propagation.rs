// SPDX-License-Identifier: CC0-1.0

//! Cross-host mempool propagation aggregation.
//!
//! Persisting every mempool admission is impractical at ~250,000 tx/day per
//! node, so per-txid observations are held briefly in the fast store and
//! collapsed into one [`TxPropagation`] record per transaction: when each
//! host first saw it, which policy cohorts completed, and the propagation
//! spread. Arrival order across hosts is irrelevant; each host's
//! contribution is stamped at its own observation time, so the aggregation
//! commutes over `mark_seen` order. Memory stays bounded through TTLs and
//! the aged-entry reaper.
//!
//! In keys, "mpa" is short for "mempool accept".

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bmon_events::PolicyCohort;
use bmon_kv::{FastStore, NamedLock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SORTED_KEY: &str = "mpa:txids";
const TOTAL_SEEN_KEY: &str = "mpa:total_txids";
const EVENT_INDEX_KEY: &str = "mpa:prop_event_set";

/// Debug trace lifetime.
const LOG_TTL_SECS: u64 = 4 * 60 * 60;

/// Finalized records outlive their index entry by this grace period so
/// paged reads never race the TTL.
const RESULT_TTL_GRACE_SECS: u64 = 5 * 60;

/// Per-txid lock TTL.
const TXID_LOCK_TTL: Duration = Duration::from_secs(10);

/// Batched multi-get page size for finalized-record reads.
const EVENT_PAGE_SIZE: usize = 500;

/// Tunables for the aggregation windows.
#[derive(Clone, Copy, Debug)]
pub struct AggregatorConfig {
    /// How long to wait for stragglers before finalizing a txid.
    pub observation_window_secs: u64,
    /// Lifetime of raw per-host observations.
    pub raw_ttl_secs: u64,
    /// Lifetime of finalized records.
    pub result_ttl_secs: u64,
    /// Minimum age before the reaper finalizes a txid.
    pub finalization_min_age_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            observation_window_secs: 3600,
            raw_ttl_secs: 3 * 3600,
            result_ttl_secs: 3600,
            finalization_min_age_secs: 3600,
        }
    }
}

/// How far a transaction has propagated when observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropagationStatus {
    /// All hosts have seen this txid.
    CompleteAll,
    /// All hosts in the observer's policy cohort have seen this txid.
    CompleteCohort,
}

/// Statistics around how a single transaction propagated.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TxPropagation {
    pub txid: String,
    /// Raw data of all observed tx receptions, host to epoch seconds.
    pub host_to_timestamp: BTreeMap<String, f64>,
    /// Which complete policy cohorts saw this transaction.
    pub cohorts_complete: Vec<PolicyCohort>,
    /// Did all available hosts see this transaction?
    pub all_complete: bool,
    /// The length of the examination period, in seconds.
    pub time_window: f64,
}

impl TxPropagation {
    pub fn earliest_saw(&self) -> f64 {
        self.host_to_timestamp.values().cloned().fold(f64::INFINITY, f64::min)
    }

    pub fn latest_saw(&self) -> f64 {
        self.host_to_timestamp.values().cloned().fold(0.0, f64::max)
    }

    /// Latest minus earliest first-seen; never negative.
    pub fn spread(&self) -> f64 { self.latest_saw() - self.earliest_saw() }
}

fn now_ts() -> f64 { Utc::now().timestamp_micros() as f64 / 1e6 }

/// Manages the deluge of mempool-accept events that cannot be persisted
/// individually.
pub struct MempoolAcceptAggregator {
    store: Arc<dyn FastStore>,
    config: AggregatorConfig,
    host_to_cohort: RwLock<HashMap<String, PolicyCohort>>,
}

impl std::fmt::Debug for MempoolAcceptAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MempoolAcceptAggregator({:?})", self.config)
    }
}

fn ts_key(txid: &str, host: &str) -> String { format!("mpa:{}:{}", txid, host) }

fn event_key(txid: &str) -> String { format!("mpa:prop_event:{}", txid) }

fn log_key(txid: &str) -> String { format!("mpa:log:{}", txid) }

impl MempoolAcceptAggregator {
    pub fn new(
        store: Arc<dyn FastStore>,
        config: AggregatorConfig,
        host_to_cohort: HashMap<String, PolicyCohort>,
    ) -> MempoolAcceptAggregator {
        // Raw observations must outlive the observation window, or aged
        // finalization would find no timestamps to collapse.
        if config.raw_ttl_secs < config.observation_window_secs + config.finalization_min_age_secs {
            log::warn!(
                "raw observation TTL ({}s) may expire inside the observation window ({}s)",
                config.raw_ttl_secs,
                config.observation_window_secs,
            );
        }
        MempoolAcceptAggregator { store, config, host_to_cohort: RwLock::new(host_to_cohort) }
    }

    /// Replace the host label map; refreshed periodically from the store.
    pub fn set_hosts(&self, host_to_cohort: HashMap<String, PolicyCohort>) {
        if let Ok(mut hosts) = self.host_to_cohort.write() {
            *hosts = host_to_cohort;
        }
    }

    fn hosts(&self) -> HashMap<String, PolicyCohort> {
        self.host_to_cohort.read().map(|h| h.clone()).unwrap_or_default()
    }

    fn hosts_for_cohort(
        hosts: &HashMap<String, PolicyCohort>,
        cohort: PolicyCohort,
    ) -> HashSet<String> {
        hosts.iter().filter(|(_, c)| **c == cohort).map(|(h, _)| h.clone()).collect()
    }

    fn txid_lock<'a>(&'a self, txid: &str) -> NamedLock<'a> {
        NamedLock::new(&*self.store, &format!("mpa.{}", txid), TXID_LOCK_TTL)
    }

    pub fn get_total_txids_processed(&self) -> bmon_kv::Result<u64> {
        Ok(self.store.get(TOTAL_SEEN_KEY)?.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub fn get_total_txids_processed_per_host(&self) -> bmon_kv::Result<HashMap<String, u64>> {
        let hosts: Vec<String> = self.hosts().into_keys().collect();
        let keys: Vec<String> =
            hosts.iter().map(|h| format!("{}:{}", TOTAL_SEEN_KEY, h)).collect();
        let values = self.store.mget(&keys)?;

        let mut out = HashMap::new();
        for (host, value) in hosts.into_iter().zip(values) {
            match value.and_then(|v| v.parse().ok()) {
                Some(count) => {
                    out.insert(host, count);
                }
                None => continue,
            }
        }
        Ok(out)
    }

    /// The debug trace for one txid.
    pub fn get_txid_debug_log(&self, txid: &str) -> bmon_kv::Result<Vec<String>> {
        self.store.lrange(&log_key(txid), 0, -1)
    }

    /// Mark `txid` as first seen by `host` at `seen_at`.
    ///
    /// Returns a completion status once the full fleet (or the host's
    /// cohort) has been heard from. A duplicate observation for the same
    /// `(host, txid)` is logged and ignored without touching any counters;
    /// upstream is expected to de-duplicate via the log cursor, so repeats
    /// indicate a bug there rather than normal redelivery.
    pub fn mark_seen(
        &self,
        host: &str,
        txid: &str,
        seen_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<PropagationStatus>> {
        let hosts = self.hosts();
        anyhow::ensure!(!hosts.is_empty(), "no hosts known to mempool aggregator");
        let cohort = *hosts
            .get(host)
            .ok_or_else(|| anyhow::anyhow!("host {} not known to mempool aggregator", host))?;

        let guard = self.txid_lock(txid).acquire(TXID_LOCK_TTL)?;
        if guard.is_none() {
            // Best-effort statistical view, not a ledger: drop on contention.
            log::warn!("could not lock txid {}; dropping observation from {}", txid, host);
            return Ok(None);
        }

        let key = ts_key(txid, host);
        if self.store.get(&key)?.is_some() {
            log::error!("duplicate MempoolAccept event detected: {}", txid);
            return Ok(None);
        }

        // Keep a debug trace.
        let lkey = log_key(txid);
        self.store.rpush(&lkey, &format!("{}  |  {}  |  {}", host, seen_at, Utc::now()))?;
        self.store.expire_nx(&lkey, LOG_TTL_SECS)?;

        let seen_ts = seen_at.timestamp_micros() as f64 / 1e6;
        if !self.store.set_ex(&key, &seen_ts.to_string(), self.config.raw_ttl_secs)? {
            log::error!("failed to write observation key {}", key);
        }

        // Index txids by time-first-seen so the reaper can find stragglers
        // cheaply.
        if self.store.zadd_nx(SORTED_KEY, txid, now_ts())? {
            if self.store.zscore(EVENT_INDEX_KEY, &event_key(txid))?.is_some() {
                anyhow::bail!("already processed {} as fully propagated", txid);
            }
            self.store.incr(TOTAL_SEEN_KEY)?;
        }
        self.store.incr(&format!("{}:{}", TOTAL_SEEN_KEY, host))?;

        let check_for: Vec<String> = hosts.keys().map(|h| ts_key(txid, h)).collect();
        let mut hosts_seen: HashSet<String> = HashSet::new();
        for (key, value) in check_for.iter().zip(self.store.mget(&check_for)?) {
            if value.is_some() {
                if let Some(host) = key.rsplit(':').next() {
                    hosts_seen.insert(host.to_string());
                }
            }
        }

        let all_hosts: HashSet<String> = hosts.keys().cloned().collect();
        if hosts_seen == all_hosts {
            return Ok(Some(PropagationStatus::CompleteAll));
        }
        if Self::hosts_for_cohort(&hosts, cohort).is_subset(&hosts_seen) {
            return Ok(Some(PropagationStatus::CompleteCohort));
        }
        Ok(None)
    }

    /// Invoked by `mark_seen` observers on `CompleteAll`.
    pub fn process_completed_propagation(
        &self,
        txid: &str,
    ) -> anyhow::Result<Option<TxPropagation>> {
        self.finalize_propagation(txid, true)
    }

    /// After the observation window closes, take account of who saw what.
    ///
    /// Enumerates txids first seen before `latest_time_allowed` (default:
    /// now minus `min_age`, default the observation window) and finalizes
    /// each without completeness assertions.
    pub fn process_all_aged(
        &self,
        min_age: Option<f64>,
        latest_time_allowed: Option<f64>,
    ) -> anyhow::Result<Vec<TxPropagation>> {
        let latest = latest_time_allowed.unwrap_or_else(|| {
            now_ts() - min_age.unwrap_or(self.config.finalization_min_age_secs as f64)
        });
        let old_enough = self.store.zrangebyscore(SORTED_KEY, latest)?;
        log::info!("sending 'old enough' {} txids to be processed for prop. completion", old_enough.len());

        let mut events = Vec::new();
        for txid in old_enough {
            match self.finalize_propagation(&txid, false) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => log::error!("failed to finalize tx prop. event for {}: {}", txid, e),
            }
        }
        Ok(events)
    }

    /// Collapse the per-host observations for `txid` into one record.
    ///
    /// With `assert_complete`, refuses (returning `None`) unless every host
    /// contributed a timestamp. Double finalization is a bug and errors.
    pub fn finalize_propagation(
        &self,
        txid: &str,
        assert_complete: bool,
    ) -> anyhow::Result<Option<TxPropagation>> {
        let hosts = self.hosts();
        anyhow::ensure!(!hosts.is_empty(), "no hosts known to mempool aggregator");
        let kind = if assert_complete { "complete" } else { "aged" };
        let ekey = event_key(txid);
        let host_keys: Vec<String> = hosts.keys().map(|h| ts_key(txid, h)).collect();

        let guard = self.txid_lock(txid).acquire(TXID_LOCK_TTL)?;
        if guard.is_none() {
            log::warn!("could not lock txid {} for finalization", txid);
            return Ok(None);
        }
        let now = now_ts();

        if self.store.zscore(EVENT_INDEX_KEY, &ekey)?.is_some() {
            anyhow::bail!("duplicate tx propagation event attempt: {}", txid);
        }

        log::info!("processing {} propagation for txid {}", kind, txid);

        let first_saw = match self.store.zscore(SORTED_KEY, txid)? {
            Some(score) => score,
            None => {
                log::error!("[{}] missing score for {} in {}", kind, txid, SORTED_KEY);
                return Ok(None);
            }
        };

        let mut host_to_timestamp: BTreeMap<String, f64> = BTreeMap::new();
        for (key, value) in host_keys.iter().zip(self.store.mget(&host_keys)?) {
            // Expected that we may be missing some hosts.
            let value = match value {
                Some(value) => value,
                None => continue,
            };
            let host = match key.rsplit(':').next() {
                Some(host) if hosts.contains_key(host) => host.to_string(),
                _ => {
                    log::error!("unknown host key {} for txid {}", key, txid);
                    continue;
                }
            };
            match value.parse::<f64>() {
                Ok(ts) => {
                    host_to_timestamp.insert(host, ts);
                }
                Err(_) => log::error!("unparseable observation under {}: {}", key, value),
            }
        }

        if host_to_timestamp.is_empty() {
            log::error!(
                "[{}] no timestamp entries found for {} (entry age {:.1}s, trace {:?})",
                kind,
                txid,
                now - first_saw,
                self.get_txid_debug_log(txid).unwrap_or_default(),
            );
            self.store.zrem(SORTED_KEY, &[txid])?;
            return Ok(None);
        }

        let hosts_that_saw: HashSet<String> = host_to_timestamp.keys().cloned().collect();
        let mut cohorts_complete: Vec<PolicyCohort> =
            [PolicyCohort::PreTaproot, PolicyCohort::PostTaproot]
                .into_iter()
                .filter(|cohort| {
                    let members = Self::hosts_for_cohort(&hosts, *cohort);
                    !members.is_empty() && members.is_subset(&hosts_that_saw)
                })
                .collect();
        cohorts_complete.sort();

        let all_hosts: HashSet<String> = hosts.keys().cloned().collect();
        let all_complete = hosts_that_saw == all_hosts;
        if assert_complete && !all_complete {
            log::error!("expected to have all host timestamps for txid {}", txid);
            return Ok(None);
        }

        let event = TxPropagation {
            txid: txid.to_string(),
            host_to_timestamp,
            cohorts_complete,
            all_complete,
            time_window: now - first_saw,
        };

        let serialized = serde_json::to_string(&event)?;
        // The index in mpa:prop_event_set is authoritative; the extra TTL
        // grace keeps paged reads from racing expiry.
        if !self.store.set_ex(
            &ekey,
            &serialized,
            self.config.result_ttl_secs + RESULT_TTL_GRACE_SECS,
        )? {
            log::error!("failed to write propagation record for {}", txid);
        }

        if !self.store.zadd_nx(EVENT_INDEX_KEY, &ekey, now)? {
            log::error!("[{}] already in event index - duplicate tx prop. event? {}", kind, txid);
            return Ok(None);
        }

        if self.store.zrem(SORTED_KEY, &[txid])? != 1 {
            log::error!("txid {} was missing from {} at finalization", txid, SORTED_KEY);
        }
        let mut doomed: Vec<&str> = host_keys.iter().map(|k| k.as_str()).collect();
        let lkey = log_key(txid);
        doomed.push(&lkey);
        self.store.del(&doomed)?;

        Ok(Some(event))
    }

    /// All finalized records still inside the result window.
    ///
    /// Prunes aged index entries, then pages through the index with batched
    /// multi-gets; records lost to a TTL race are purged from the index
    /// with a warning.
    pub fn get_propagation_events(&self) -> anyhow::Result<Vec<TxPropagation>> {
        let horizon = now_ts() - self.config.result_ttl_secs as f64;
        let removed = self.store.zremrangebyscore(EVENT_INDEX_KEY, horizon)?;
        if removed > 0 {
            log::info!("removed {} old tx propagation events", removed);
        }

        let keys = self.store.zrange_all(EVENT_INDEX_KEY)?;
        let mut events = Vec::new();
        let mut keys_to_rm: Vec<String> = Vec::new();

        for chunk in keys.chunks(EVENT_PAGE_SIZE) {
            let chunk: Vec<String> = chunk.to_vec();
            for (key, value) in chunk.iter().zip(self.store.mget(&chunk)?) {
                let value = match value {
                    Some(value) => value,
                    None => {
                        log::error!("missing tx prop. event in index: {}", key);
                        keys_to_rm.push(key.clone());
                        continue;
                    }
                };
                let event: TxPropagation = match serde_json::from_str(&value) {
                    Ok(event) => event,
                    Err(e) => {
                        log::error!("failed to deserialize TxPropagation under {}: {}", key, e);
                        continue;
                    }
                };
                if event.host_to_timestamp.is_empty() {
                    log::error!("txprop without timestamp data: {}", event.txid);
                    continue;
                }
                events.push(event);
            }
        }

        if !keys_to_rm.is_empty() {
            let refs: Vec<&str> = keys_to_rm.iter().map(|k| k.as_str()).collect();
            let removed = self.store.zrem(EVENT_INDEX_KEY, &refs)?;
            log::info!("removed {} bad keys from tx prop. event index", removed);
        }
        Ok(events)
    }
}
