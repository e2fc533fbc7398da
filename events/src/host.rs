// SPDX-License-Identifier: CC0-1.0

//! Host identity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The stable identity of one monitored node.
///
/// A `Host` is the version-of-software identity, not the machine: any change
/// to the hardware or software facts below creates a new row. Events and
/// peers reference the newest row for a given name.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Host {
    pub name: String,
    /// CPU model string as reported by the OS.
    pub cpu_info: String,
    pub memory_bytes: u64,
    /// The number of processors.
    pub nproc: u64,
    pub region: Option<String>,
    /// As reported by `bitcoind -version`.
    pub bitcoin_version: String,
    pub bitcoin_gitref: Option<String>,
    pub bitcoin_gitsha: Option<String>,
    pub bitcoin_dbcache: i64,
    pub bitcoin_prune: i64,
    pub bitcoin_listen: bool,
    /// Extra data about this bitcoind instance (e.g. command-line flags).
    pub bitcoin_extra: serde_json::Value,
}

impl Host {
    /// The fields that together make up a host's identity, in storage order.
    ///
    /// Used by the store to build the compound uniqueness key; `region` is
    /// deliberately excluded (a node can move without becoming a new host).
    pub const IDENTITY_FIELDS: [&'static str; 10] = [
        "name",
        "cpu_info",
        "memory_bytes",
        "nproc",
        "bitcoin_version",
        "bitcoin_gitref",
        "bitcoin_gitsha",
        "bitcoin_dbcache",
        "bitcoin_prune",
        "bitcoin_listen",
    ];

    /// Canonical rendering of the identity fields, in [`Self::IDENTITY_FIELDS`]
    /// order. Fingerprinting this string yields the host's uniqueness key.
    pub fn identity_string(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.name,
            self.cpu_info,
            self.memory_bytes,
            self.nproc,
            self.bitcoin_version,
            self.bitcoin_gitref.as_deref().unwrap_or(""),
            self.bitcoin_gitsha.as_deref().unwrap_or(""),
            self.bitcoin_dbcache,
            self.bitcoin_prune,
            self.bitcoin_listen,
        )
    }

    /// The host's uniqueness key: a fingerprint of the identity fields.
    pub fn fingerprint(&self) -> String { crate::fingerprint(self.identity_string().as_bytes()) }
}

/// Durable cursor into a host's debug log: the fingerprint of the last line
/// whose events the hub has accepted, and when it was recorded.
///
/// One row per host; writes are upserts.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LogProgress {
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub loghash: String,
}
