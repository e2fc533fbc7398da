// SPDX-License-Identifier: CC0-1.0

//! Stable 128-bit content fingerprints.
//!
//! Used for the log-line cursor (resume point into a debug log) and for
//! host/peer identity keys. XXH3 is non-cryptographic, platform-independent
//! and stable across process restarts, which is all the cursor contract
//! requires.

use twox_hash::xxh3;

/// Hex-encoded 128-bit XXH3 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String { format!("{:032x}", xxh3::hash128(bytes)) }

/// Fingerprint of a log line, excluding its terminator.
pub fn linehash(line: &str) -> String { fingerprint(line.trim_end_matches('\n').as_bytes()) }

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stable_and_terminator_insensitive() {
        let a = linehash("2019-08-09T16:28:42Z UpdateTip: new best=00");
        let b = linehash("2019-08-09T16:28:42Z UpdateTip: new best=00\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, linehash("something else"));

        // Restart-stability: the same input always hashes the same.
        assert_eq!(linehash("abc"), linehash("abc"));
    }
}
