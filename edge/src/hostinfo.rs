// SPDX-License-Identifier: CC0-1.0

//! Assembly of this edge's host identity record.

use std::fs;

use bmon_events::{parse_daemon_version, Host};
use bmon_rpc::Client;

use crate::config::Config;

/// Build the host record announced to the hub at boot.
///
/// Any change in these facts (new daemon version, new hardware) produces a
/// new host identity on the hub side.
pub fn build_host(config: &Config, rpc: &Client) -> anyhow::Result<Host> {
    let bitcoin_version = read_version(config, rpc)?;
    let gitsha = parse_daemon_version(&bitcoin_version).ok().and_then(|(_, sha)| sha);

    Ok(Host {
        name: config.hostname.clone(),
        cpu_info: cpu_model().unwrap_or_else(|| "unknown".to_string()),
        memory_bytes: memory_bytes().unwrap_or(0),
        nproc: std::thread::available_parallelism().map(|n| n.get() as u64).unwrap_or(1),
        region: config.region.clone(),
        bitcoin_version,
        bitcoin_gitref: None,
        bitcoin_gitsha: gitsha,
        bitcoin_dbcache: config.dbcache,
        bitcoin_prune: config.prune,
        bitcoin_listen: config.listen,
        bitcoin_extra: serde_json::json!({ "flags": config.extra_flags }),
    })
}

/// The daemon's version string, from the version file when provisioned,
/// otherwise from `getnetworkinfo`.
fn read_version(config: &Config, rpc: &Client) -> anyhow::Result<String> {
    if let Some(path) = &config.version_path {
        let raw = fs::read_to_string(path)?;
        let version = raw.trim();
        if !version.is_empty() {
            return Ok(version.to_string());
        }
    }

    let info = rpc.get_network_info()?;
    info.get("subversion")
        .and_then(|v| v.as_str())
        .map(|s| format!("v{}", s.trim_matches('/').trim_start_matches("Satoshi:")))
        .ok_or_else(|| anyhow::anyhow!("daemon reported no subversion"))
}

fn cpu_model() -> Option<String> {
    let cpuinfo = fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, model)| model.trim().to_string())
}

fn memory_bytes() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|line| line.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
