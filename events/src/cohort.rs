// SPDX-License-Identifier: CC0-1.0

//! Policy cohorts: equivalence classes of daemons by relay/mempool policy.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Taproot activated with relay policy changes in 0.21.1.
const TAPROOT_VERSION: (u64, u64, u64) = (0, 21, 1);

/// An equivalence class of hosts by mempool/relay policy relevance.
///
/// Cohort membership is a pure function of the daemon version string.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyCohort {
    /// Daemon versions below 0.21.1.
    PreTaproot,
    /// Daemon versions 0.21.1 and above.
    PostTaproot,
}

impl PolicyCohort {
    /// Cohort for a daemon reporting `version` (e.g. `v23.0`, `v0.18.0`).
    pub fn for_version(version: &str) -> Result<PolicyCohort, ParseVersionError> {
        Ok(if is_pre_taproot(version)? {
            PolicyCohort::PreTaproot
        } else {
            PolicyCohort::PostTaproot
        })
    }
}

impl fmt::Display for PolicyCohort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PolicyCohort::PreTaproot => write!(f, "pre-taproot"),
            PolicyCohort::PostTaproot => write!(f, "post-taproot"),
        }
    }
}

/// Whether `version` predates taproot relay policy (< 0.21.1).
pub fn is_pre_taproot(version: &str) -> Result<bool, ParseVersionError> {
    let (triple, _) = parse_daemon_version(version)?;
    Ok(triple < TAPROOT_VERSION)
}

/// Parse a daemon version string into a numeric triple and optional git sha.
///
/// Accepts the forms bitcoind reports: `v23.0`, `v0.18.0`,
/// `v23.99.0-447f50e4aed9`, and the `-version` banner prefix
/// `Bitcoin Core version v22.0.0`. Missing components default to zero.
pub fn parse_daemon_version(
    version: &str,
) -> Result<((u64, u64, u64), Option<String>), ParseVersionError> {
    let raw = version.trim();
    // Take the last whitespace-delimited token so banners parse too.
    let token = raw
        .split_whitespace()
        .last()
        .ok_or_else(|| ParseVersionError::Empty)?
        .trim_start_matches('v');

    let (numbers, sha) = match token.split_once('-') {
        Some((n, s)) if !s.is_empty() => (n, Some(s.to_string())),
        _ => (token, None),
    };

    let mut parts = [0u64; 3];
    for (i, part) in numbers.split('.').take(3).enumerate() {
        parts[i] = part
            .parse()
            .map_err(|_| ParseVersionError::BadComponent { version: raw.to_string() })?;
    }

    Ok(((parts[0], parts[1], parts[2]), sha))
}

/// Error parsing a daemon version string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseVersionError {
    /// The version string was empty.
    Empty,
    /// A version component was not numeric.
    BadComponent { version: String },
}

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ParseVersionError::*;

        match self {
            Empty => write!(f, "empty version string"),
            BadComponent { version } => write!(f, "non-numeric version component in {:?}", version),
        }
    }
}

impl std::error::Error for ParseVersionError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(parse_daemon_version("v23.0").unwrap(), ((23, 0, 0), None));
        assert_eq!(parse_daemon_version("v0.18.0").unwrap(), ((0, 18, 0), None));
        assert_eq!(
            parse_daemon_version("v23.99.0-447f50e4aed9").unwrap(),
            ((23, 99, 0), Some("447f50e4aed9".to_string()))
        );
        assert_eq!(
            parse_daemon_version("Bitcoin Core version v22.0.0").unwrap(),
            ((22, 0, 0), None)
        );
        assert!(parse_daemon_version("vfoo.bar").is_err());
    }

    #[test]
    fn cohort_assignment() {
        assert_eq!(PolicyCohort::for_version("v0.18.0").unwrap(), PolicyCohort::PreTaproot);
        assert_eq!(PolicyCohort::for_version("v0.21.0").unwrap(), PolicyCohort::PreTaproot);
        assert_eq!(PolicyCohort::for_version("v0.21.1").unwrap(), PolicyCohort::PostTaproot);
        assert_eq!(PolicyCohort::for_version("v23.0").unwrap(), PolicyCohort::PostTaproot);
        assert_eq!(PolicyCohort::PreTaproot.to_string(), "pre-taproot");
    }
}
