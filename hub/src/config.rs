// SPDX-License-Identifier: CC0-1.0

//! Environment configuration for the hub daemon.

use std::env;
use std::path::PathBuf;

use anyhow::Context;

/// Everything the hub reads from its environment at boot.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path to the relational store.
    pub db_path: PathBuf,
    /// Hub fast store; also the edges' ingest queue.
    pub redis_server_url: String,
    /// Address for the Prometheus exporter.
    pub exporter_addr: String,
    /// Ingest worker pool size.
    pub ingest_workers: usize,
    /// Optional `name=url` RPC endpoints for the fleet-wide mempool
    /// comparison; empty disables the job.
    pub rpc_urls: Vec<(String, String)>,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let rpc_urls = env::var("BMON_BITCOIN_RPC_URLS")
            .unwrap_or_default()
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(name, url)| (name.trim().to_string(), url.trim().to_string()))
                    .ok_or_else(|| {
                        anyhow::anyhow!("BMON_BITCOIN_RPC_URLS entries must be name=url: {}", entry)
                    })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Config {
            db_path: PathBuf::from(var_or("BMON_DB_PATH", "bmon.sqlite3")),
            redis_server_url: env::var("REDIS_SERVER_URL")
                .context("required environment variable REDIS_SERVER_URL is not set")?,
            exporter_addr: var_or("BMON_EXPORTER_ADDR", "0.0.0.0:9102"),
            ingest_workers: var_or("BMON_INGEST_WORKERS", "4")
                .parse()
                .context("BMON_INGEST_WORKERS")?,
            rpc_urls,
        })
    }
}
