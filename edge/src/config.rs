// SPDX-License-Identifier: CC0-1.0

//! Environment configuration for the edge daemon.

use std::env;
use std::path::PathBuf;

use anyhow::Context;

/// Everything the edge reads from its environment at boot.
#[derive(Clone, Debug)]
pub struct Config {
    /// Canonical identity for this edge.
    pub hostname: String,
    /// Absolute path to the daemon debug log.
    pub log_path: PathBuf,
    /// Directory for rolling mempool files.
    pub mempool_cache_path: PathBuf,
    /// Root for the object-storage mirror the shipper writes into.
    pub object_store_path: PathBuf,
    /// Local daemon RPC endpoint.
    pub rpc_url: String,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    /// Edge-local fast store.
    pub redis_local_url: String,
    /// Hub fast store.
    pub redis_server_url: String,
    /// File containing the daemon's reported version string, if present.
    pub version_path: Option<PathBuf>,
    pub region: Option<String>,
    pub dbcache: i64,
    pub prune: i64,
    pub listen: bool,
    /// Extra daemon command-line flags, recorded on the host row.
    pub extra_flags: String,
    /// Address for the Prometheus exporter.
    pub exporter_addr: String,
    /// Debug runs process arbitrarily old log lines; production drops
    /// mempool events older than six hours at extraction time.
    pub debug: bool,
}

fn var(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("required environment variable {} is not set", name))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let rpc_host = var_or("BITCOIN_RPC_HOST", "127.0.0.1");
        let rpc_port = var_or("BITCOIN_RPC_PORT", "8332");

        let mempool_cache_path = PathBuf::from(var("MEMPOOL_ACTIVITY_CACHE_PATH")?);
        let object_store_path = env::var("BMON_OBJECT_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| mempool_cache_path.join("objects"));

        Ok(Config {
            hostname: var("HOSTNAME")?,
            log_path: PathBuf::from(var("BITCOIND_LOG_PATH")?),
            mempool_cache_path,
            object_store_path,
            rpc_url: format!("http://{}:{}", rpc_host, rpc_port),
            rpc_user: env::var("BITCOIN_RPC_USER").ok(),
            rpc_password: env::var("BITCOIN_RPC_PASSWORD").ok(),
            redis_local_url: var_or("REDIS_LOCAL_URL", "redis://127.0.0.1:6379/0"),
            redis_server_url: var("REDIS_SERVER_URL")?,
            version_path: env::var("BITCOIND_VERSION_PATH").ok().map(PathBuf::from),
            region: env::var("BMON_REGION").ok(),
            dbcache: var_or("BITCOIN_DBCACHE", "450").parse().context("BITCOIN_DBCACHE")?,
            prune: var_or("BITCOIN_PRUNE", "0").parse().context("BITCOIN_PRUNE")?,
            listen: var_or("BITCOIN_LISTEN", "0") == "1",
            extra_flags: var_or("BITCOIN_FLAGS", ""),
            exporter_addr: var_or("BMON_EXPORTER_ADDR", "0.0.0.0:9101"),
            debug: env::var("BMON_DEBUG").is_ok(),
        })
    }

    /// Mempool events older than this are dropped at extraction time.
    pub fn ignore_older_than(&self) -> Option<chrono::Duration> {
        if self.debug {
            None
        } else {
            Some(chrono::Duration::hours(6))
        }
    }
}
