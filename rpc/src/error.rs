// SPDX-License-Identifier: CC0-1.0

use core::fmt;
use std::io;

/// All the possible errors from the RPC client.
#[derive(Debug)]
pub enum Error {
    /// The server answered with a JSON-RPC error object.
    ///
    /// Codes −342..−345 are synthesized locally: −342 for a non-JSON body,
    /// −343 for a missing result, −344 for a non-object error, −345 for a
    /// missing error code.
    Rpc { code: i64, message: String },
    /// Wrapper of io Error (connect, read, write, timeout).
    Io(io::Error),
    /// Wrapper of serde_json Error.
    Json(serde_json::Error),
    /// The URL could not be parsed or uses an unsupported scheme.
    InvalidUrl { url: String, reason: &'static str },
    /// The cookie file was empty or had no `user:password` line.
    InvalidCookieFile,
    /// The HTTP response had no parseable status line or headers.
    MalformedResponse(String),
}

impl Error {
    /// Whether a retry could plausibly succeed.
    ///
    /// Connection-level failures (refused, reset, DNS, timeouts) are
    /// transient; protocol and parse errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotFound
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::AddrNotAvailable
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            Io(e) => write!(f, "io error: {}", e),
            Json(e) => write!(f, "json error: {}", e),
            InvalidUrl { url, reason } => write!(f, "invalid url {}: {}", url, reason),
            InvalidCookieFile => write!(f, "invalid cookie file"),
            MalformedResponse(s) => write!(f, "malformed http response: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;

        match self {
            Io(ref e) => Some(e),
            Json(ref e) => Some(e),
            Rpc { .. } | InvalidUrl { .. } | InvalidCookieFile | MalformedResponse(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::Io(e) }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Error::Json(e) }
}
