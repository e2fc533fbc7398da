// SPDX-License-Identifier: CC0-1.0

//! Relational persistence for events and identity rows.
//!
//! Identity-keyed rows (hosts, peers, log cursors) are upserts; event rows
//! are append-only inserts. Delivery from the edges is at-least-once, so
//! duplicate-key violations on idempotent inserts are swallowed. Mempool
//! admissions never reach this store; the adapter hands them straight to the
//! propagation aggregator.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use bmon_events::{Event, Host, LogProgress, Peer, PolicyCohort};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hosts (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    fingerprint TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    cpu_info TEXT NOT NULL,
    memory_bytes INTEGER NOT NULL,
    nproc INTEGER NOT NULL,
    region TEXT,
    bitcoin_version TEXT NOT NULL,
    bitcoin_gitref TEXT,
    bitcoin_gitsha TEXT,
    bitcoin_dbcache INTEGER NOT NULL,
    bitcoin_prune INTEGER NOT NULL,
    bitcoin_listen INTEGER NOT NULL,
    bitcoin_extra TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS hosts_name ON hosts(name);

CREATE TABLE IF NOT EXISTS peers (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    fingerprint TEXT NOT NULL UNIQUE,
    host TEXT NOT NULL,
    num INTEGER NOT NULL,
    addr TEXT NOT NULL,
    connection_type TEXT NOT NULL,
    inbound INTEGER NOT NULL,
    network TEXT NOT NULL,
    services TEXT NOT NULL,
    subver TEXT NOT NULL,
    version INTEGER NOT NULL,
    relaytxes INTEGER NOT NULL,
    bip152_hb_to INTEGER,
    bip152_hb_from INTEGER,
    servicesnames TEXT
);

CREATE TABLE IF NOT EXISTS log_progress (
    hostname TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    loghash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS connect_block_events (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    blockhash TEXT NOT NULL,
    height INTEGER NOT NULL,
    log2_work REAL NOT NULL,
    total_tx_count INTEGER NOT NULL,
    version TEXT,
    date TEXT NOT NULL,
    cachesize_mib REAL,
    cachesize_txo INTEGER NOT NULL,
    warning TEXT
);

CREATE TABLE IF NOT EXISTS connect_block_details (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    blockhash TEXT NOT NULL,
    height INTEGER NOT NULL,
    load_block_from_disk_time_ms REAL,
    sanity_checks_time_ms REAL,
    fork_checks_time_ms REAL,
    connect_txs_time_ms REAL,
    verify_time_ms REAL,
    index_writing_time_ms REAL,
    connect_total_time_ms REAL,
    flush_coins_time_ms REAL,
    flush_chainstate_time_ms REAL,
    connect_postprocess_time_ms REAL,
    connectblock_total_time_ms REAL,
    tx_count INTEGER,
    txin_count INTEGER
);

CREATE TABLE IF NOT EXISTS block_connected_events (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    blockhash TEXT NOT NULL,
    height INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS block_disconnected_events (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    blockhash TEXT NOT NULL,
    height INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reorg_events (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    finished_timestamp TEXT NOT NULL,
    min_height INTEGER NOT NULL,
    max_height INTEGER NOT NULL,
    old_blockhashes TEXT NOT NULL,
    new_blockhashes TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mempool_rejects (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    txhash TEXT NOT NULL,
    wtxid TEXT,
    peer_num INTEGER NOT NULL,
    peer_id TEXT,
    reason_code TEXT NOT NULL,
    reason TEXT NOT NULL,
    reason_data TEXT NOT NULL,
    UNIQUE(host, timestamp, txhash, peer_num)
);
CREATE INDEX IF NOT EXISTS mempool_rejects_timestamp ON mempool_rejects(timestamp);

CREATE TABLE IF NOT EXISTS block_download_timeouts (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    blockhash TEXT NOT NULL,
    peer_num INTEGER NOT NULL,
    peer_id TEXT
);

CREATE TABLE IF NOT EXISTS header_to_tip_events (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    blockhash TEXT NOT NULL,
    height INTEGER NOT NULL,
    saw_header_at TEXT NOT NULL,
    reconstruct_block_at TEXT,
    tip_at TEXT NOT NULL,
    header_to_tip_secs REAL NOT NULL,
    header_to_block_secs REAL,
    block_to_tip_secs REAL,
    blocktime_minus_header_secs REAL NOT NULL,
    reconstruction_data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS peer_stats (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    host TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    num_peers INTEGER NOT NULL,
    ping_mean REAL NOT NULL,
    ping_min REAL NOT NULL,
    ping_max REAL NOT NULL,
    bytesrecv REAL NOT NULL,
    bytessent REAL NOT NULL,
    bytesrecv_per_msg TEXT NOT NULL,
    bytessent_per_msg TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS peer_stats_created_at ON peer_stats(created_at);

CREATE TABLE IF NOT EXISTS process_line_errors (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    hostname TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    listener TEXT NOT NULL,
    line TEXT NOT NULL
);
";

fn ts(dt: &DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> { dt.as_ref().map(ts) }

/// The hub's relational store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Store") }
}

impl Store {
    /// Open (and migrate) the store at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Store> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening store at {}", path.display()))?;
        Store::init(conn)
    }

    /// An ephemeral store for tests.
    pub fn open_in_memory() -> anyhow::Result<Store> { Store::init(Connection::open_in_memory()?) }

    fn init(conn: Connection) -> anyhow::Result<Store> {
        conn.execute_batch(SCHEMA).context("applying schema")?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow::anyhow!("store mutex poisoned"))
    }

    /// Upsert a host identity; returns its row id.
    pub fn upsert_host(&self, host: &Host, fingerprint: &str) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hosts (created_at, fingerprint, name, cpu_info, memory_bytes, nproc,
                                region, bitcoin_version, bitcoin_gitref, bitcoin_gitsha,
                                bitcoin_dbcache, bitcoin_prune, bitcoin_listen, bitcoin_extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(fingerprint) DO NOTHING",
            params![
                ts(&Utc::now()),
                fingerprint,
                host.name,
                host.cpu_info,
                host.memory_bytes as i64,
                host.nproc as i64,
                host.region,
                host.bitcoin_version,
                host.bitcoin_gitref,
                host.bitcoin_gitsha,
                host.bitcoin_dbcache,
                host.bitcoin_prune,
                host.bitcoin_listen,
                host.bitcoin_extra.to_string(),
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM hosts WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Upsert a peer identity; returns its row id.
    pub fn upsert_peer(&self, peer: &Peer, fingerprint: &str) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO peers (created_at, fingerprint, host, num, addr, connection_type,
                                inbound, network, services, subver, version, relaytxes,
                                bip152_hb_to, bip152_hb_from, servicesnames)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(fingerprint) DO NOTHING",
            params![
                ts(&Utc::now()),
                fingerprint,
                peer.host,
                peer.num as i64,
                peer.addr,
                peer.connection_type,
                peer.inbound,
                peer.network,
                peer.services,
                peer.subver,
                peer.version,
                peer.relaytxes,
                peer.bip152_hb_to,
                peer.bip152_hb_from,
                peer.servicesnames.as_ref().map(|v| v.to_string()),
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM peers WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Upsert the log cursor for one host (one row per host).
    pub fn upsert_log_progress(&self, progress: &LogProgress) -> anyhow::Result<()> {
        self.conn()?.execute(
            "INSERT INTO log_progress (hostname, timestamp, loghash) VALUES (?1, ?2, ?3)
             ON CONFLICT(hostname) DO UPDATE SET timestamp = ?2, loghash = ?3",
            params![progress.hostname, ts(&progress.timestamp), progress.loghash],
        )?;
        Ok(())
    }

    pub fn latest_log_progress(&self, hostname: &str) -> anyhow::Result<Option<LogProgress>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT hostname, timestamp, loghash FROM log_progress WHERE hostname = ?1",
                params![hostname],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.and_then(|(hostname, timestamp, loghash)| {
            Some(LogProgress {
                hostname,
                timestamp: DateTime::parse_from_rfc3339(&timestamp).ok()?.with_timezone(&Utc),
                loghash,
            })
        }))
    }

    /// The newest host row per name, mapped to its policy cohort.
    pub fn hosts_to_cohorts(&self) -> anyhow::Result<HashMap<String, PolicyCohort>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, bitcoin_version FROM hosts
             WHERE id IN (SELECT MAX(id) FROM hosts GROUP BY name)",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (name, version) = row?;
            match PolicyCohort::for_version(&version) {
                Ok(cohort) => {
                    out.insert(name, cohort);
                }
                Err(e) => log::error!("host {} has unparseable version {}: {}", name, version, e),
            }
        }
        Ok(out)
    }

    /// Append one event row.
    ///
    /// Returns false when the insert was skipped (idempotent duplicate or a
    /// kind this store does not persist).
    pub fn insert_event(&self, event: &Event) -> anyhow::Result<bool> {
        use Event::*;

        let conn = self.conn()?;
        let created = ts(&Utc::now());
        let n = match event {
            ConnectBlockEvent(e) => conn.execute(
                "INSERT INTO connect_block_events
                 (created_at, host, timestamp, blockhash, height, log2_work, total_tx_count,
                  version, date, cachesize_mib, cachesize_txo, warning)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    created,
                    e.host,
                    ts(&e.timestamp),
                    e.blockhash,
                    e.height as i64,
                    e.log2_work,
                    e.total_tx_count as i64,
                    e.version,
                    ts(&e.date),
                    e.cachesize_mib,
                    e.cachesize_txo as i64,
                    e.warning,
                ],
            )?,
            ConnectBlockDetails(e) => conn.execute(
                "INSERT INTO connect_block_details
                 (created_at, host, timestamp, blockhash, height,
                  load_block_from_disk_time_ms, sanity_checks_time_ms, fork_checks_time_ms,
                  connect_txs_time_ms, verify_time_ms, index_writing_time_ms,
                  connect_total_time_ms, flush_coins_time_ms, flush_chainstate_time_ms,
                  connect_postprocess_time_ms, connectblock_total_time_ms, tx_count, txin_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    created,
                    e.host,
                    ts(&e.timestamp),
                    e.blockhash,
                    e.height as i64,
                    e.load_block_from_disk_time_ms,
                    e.sanity_checks_time_ms,
                    e.fork_checks_time_ms,
                    e.connect_txs_time_ms,
                    e.verify_time_ms,
                    e.index_writing_time_ms,
                    e.connect_total_time_ms,
                    e.flush_coins_time_ms,
                    e.flush_chainstate_time_ms,
                    e.connect_postprocess_time_ms,
                    e.connectblock_total_time_ms,
                    e.tx_count.map(|v| v as i64),
                    e.txin_count.map(|v| v as i64),
                ],
            )?,
            BlockConnectedEvent(e) => conn.execute(
                "INSERT INTO block_connected_events (created_at, host, timestamp, blockhash, height)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![created, e.host, ts(&e.timestamp), e.blockhash, e.height as i64],
            )?,
            BlockDisconnectedEvent(e) => conn.execute(
                "INSERT INTO block_disconnected_events (created_at, host, timestamp, blockhash, height)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![created, e.host, ts(&e.timestamp), e.blockhash, e.height as i64],
            )?,
            ReorgEvent(e) => conn.execute(
                "INSERT INTO reorg_events
                 (created_at, host, finished_timestamp, min_height, max_height,
                  old_blockhashes, new_blockhashes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    created,
                    e.host,
                    ts(&e.finished_timestamp),
                    e.min_height as i64,
                    e.max_height as i64,
                    serde_json::to_string(&e.old_blockhashes)?,
                    serde_json::to_string(&e.new_blockhashes)?,
                ],
            )?,
            MempoolReject(e) => conn.execute(
                "INSERT OR IGNORE INTO mempool_rejects
                 (created_at, host, timestamp, txhash, wtxid, peer_num, peer_id,
                  reason_code, reason, reason_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    created,
                    e.host,
                    ts(&e.timestamp),
                    e.txhash,
                    e.wtxid,
                    e.peer_num as i64,
                    e.peer_id,
                    e.reason_code,
                    e.reason,
                    e.reason_data.to_string(),
                ],
            )?,
            BlockDownloadTimeout(e) => conn.execute(
                "INSERT INTO block_download_timeouts
                 (created_at, host, timestamp, blockhash, peer_num, peer_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![created, e.host, ts(&e.timestamp), e.blockhash, e.peer_num as i64, e.peer_id],
            )?,
            HeaderToTipEvent(e) => conn.execute(
                "INSERT INTO header_to_tip_events
                 (created_at, host, blockhash, height, saw_header_at, reconstruct_block_at,
                  tip_at, header_to_tip_secs, header_to_block_secs, block_to_tip_secs,
                  blocktime_minus_header_secs, reconstruction_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    created,
                    e.host,
                    e.blockhash,
                    e.height as i64,
                    ts(&e.saw_header_at),
                    opt_ts(&e.reconstruct_block_at),
                    ts(&e.tip_at),
                    e.header_to_tip_secs,
                    e.header_to_block_secs,
                    e.block_to_tip_secs,
                    e.blocktime_minus_header_secs,
                    e.reconstruction_data.to_string(),
                ],
            )?,
            PeerStats(e) => conn.execute(
                "INSERT INTO peer_stats
                 (created_at, host, timestamp, num_peers, ping_mean, ping_min, ping_max,
                  bytesrecv, bytessent, bytesrecv_per_msg, bytessent_per_msg)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    created,
                    e.host,
                    ts(&e.timestamp),
                    e.num_peers as i64,
                    e.ping_mean,
                    e.ping_min,
                    e.ping_max,
                    e.bytesrecv,
                    e.bytessent,
                    e.bytesrecv_per_msg.to_string(),
                    e.bytessent_per_msg.to_string(),
                ],
            )?,
            ProcessLineError(e) => conn.execute(
                "INSERT INTO process_line_errors (created_at, hostname, timestamp, listener, line)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![created, e.hostname, ts(&e.timestamp), e.listener, e.line],
            )?,
            MempoolAccept(_) => {
                // High-volume: relational persistence is bypassed entirely.
                log::debug!("refusing to persist high-volume MempoolAccept row");
                0
            }
        };
        Ok(n > 0)
    }

    /// Timestamp of the newest connect-block event for `host`.
    pub fn last_connect_block_at(&self, host: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let got: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM connect_block_events WHERE host = ?1
                 ORDER BY id DESC LIMIT 1",
                params![host],
                |row| row.get(0),
            )
            .optional()?;
        Ok(got.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|t| t.with_timezone(&Utc))))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_host(name: &str, version: &str) -> Host {
        Host {
            name: name.to_string(),
            cpu_info: "test".to_string(),
            memory_bytes: 1024,
            nproc: 4,
            region: None,
            bitcoin_version: version.to_string(),
            bitcoin_gitref: None,
            bitcoin_gitsha: None,
            bitcoin_dbcache: 450,
            bitcoin_prune: 0,
            bitcoin_listen: false,
            bitcoin_extra: serde_json::json!({"flags": "-regtest"}),
        }
    }

    #[test]
    fn host_upsert_is_identity_keyed() {
        let store = Store::open_in_memory().unwrap();
        let host = test_host("bitcoind", "v23.0");

        let id1 = store.upsert_host(&host, &host.fingerprint()).unwrap();
        let id2 = store.upsert_host(&host, &host.fingerprint()).unwrap();
        assert_eq!(id1, id2);

        // A version change is a new identity.
        let upgraded = test_host("bitcoind", "v24.0");
        let id3 = store.upsert_host(&upgraded, &upgraded.fingerprint()).unwrap();
        assert_ne!(id1, id3);
    }

    #[test]
    fn cohort_map_uses_latest_host_row() {
        let store = Store::open_in_memory().unwrap();

        let old = test_host("bitcoind", "v0.18.0");
        store.upsert_host(&old, &old.fingerprint()).unwrap();
        let new = test_host("bitcoind", "v23.0");
        store.upsert_host(&new, &new.fingerprint()).unwrap();
        let other = test_host("bitcoind-02", "v0.18.0");
        store.upsert_host(&other, &other.fingerprint()).unwrap();

        let cohorts = store.hosts_to_cohorts().unwrap();
        assert_eq!(cohorts["bitcoind"], PolicyCohort::PostTaproot);
        assert_eq!(cohorts["bitcoind-02"], PolicyCohort::PreTaproot);
    }

    #[test]
    fn log_progress_is_one_row_per_host() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        store
            .upsert_log_progress(&LogProgress {
                hostname: "node0".into(),
                timestamp: now,
                loghash: "aaa".into(),
            })
            .unwrap();
        store
            .upsert_log_progress(&LogProgress {
                hostname: "node0".into(),
                timestamp: now,
                loghash: "bbb".into(),
            })
            .unwrap();

        let got = store.latest_log_progress("node0").unwrap().unwrap();
        assert_eq!(got.loghash, "bbb");
        assert!(store.latest_log_progress("other").unwrap().is_none());
    }

    #[test]
    fn duplicate_rejects_are_swallowed() {
        let store = Store::open_in_memory().unwrap();
        let reject = Event::MempoolReject(bmon_events::MempoolReject {
            host: "node0".into(),
            timestamp: Utc::now(),
            txhash: "4b93".into(),
            wtxid: None,
            peer_num: 6,
            peer_id: None,
            reason_code: "txn-mempool-conflict".into(),
            reason: "txn-mempool-conflict".into(),
            reason_data: serde_json::json!({}),
        });

        assert!(store.insert_event(&reject).unwrap());
        // At-least-once delivery: the duplicate is ignored, not an error.
        assert!(!store.insert_event(&reject).unwrap());
    }

    #[test]
    fn mempool_accepts_are_not_persisted() {
        let store = Store::open_in_memory().unwrap();
        let accept = Event::MempoolAccept(bmon_events::MempoolAccept {
            host: "node0".into(),
            timestamp: Utc::now(),
            txhash: "fa4f".into(),
            peer_num: 1,
            pool_size_txns: 1,
            pool_size_kb: 1,
        });
        assert!(!store.insert_event(&accept).unwrap());
    }

    #[test]
    fn connect_block_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let event = Event::ConnectBlockEvent(bmon_events::ConnectBlockEvent {
            host: "node0".into(),
            timestamp: now,
            blockhash: "00ab".into(),
            height: 589349,
            log2_work: 90.9,
            total_tx_count: 443429260,
            version: Some("0x20800000".into()),
            date: now,
            cachesize_mib: Some(8.7),
            cachesize_txo: 64093,
            warning: None,
        });

        assert!(store.insert_event(&event).unwrap());
        let got = store.last_connect_block_at("node0").unwrap().unwrap();
        assert_eq!(got.timestamp_micros(), now.timestamp_micros());
        assert!(store.last_connect_block_at("other").unwrap().is_none());
    }
}
