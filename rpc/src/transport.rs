// SPDX-License-Identifier: CC0-1.0

//! A bare-minimum HTTP/1.1 POST transport over `TcpStream`.
//!
//! Enough HTTP for a well-behaved bitcoind on the other end: one request per
//! connection, `Connection: close`, body sized by `Content-Length` or read to
//! EOF. Assumes the server is well-behaved; truly ancient servers may cause
//! spurious failures.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use base64::prelude::{Engine as _, BASE64_STANDARD};

use crate::{Error, Result};

const DEFAULT_RPC_PORT: u16 = 8332;

pub(crate) struct Transport {
    host: String,
    port: u16,
    path: String,
    /// Pre-built `Basic` authorization header value, if any.
    auth_header: Option<String>,
    timeout: Duration,
}

impl Transport {
    /// Parse `url` (plain `http://` only) into a reusable transport.
    ///
    /// Credentials may come from the URL userinfo section or from the
    /// explicit `user`/`pass` arguments; the explicit pair wins.
    pub(crate) fn new(
        url: &str,
        user: Option<String>,
        pass: Option<String>,
        timeout: Duration,
    ) -> Result<Transport> {
        let rest = url.strip_prefix("http://").ok_or(Error::InvalidUrl {
            url: url.to_string(),
            reason: "only plain http:// is supported",
        })?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (userinfo, hostport) = match authority.rfind('@') {
            Some(i) => (Some(&authority[..i]), &authority[i + 1..]),
            None => (None, authority),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => (
                h.to_string(),
                p.parse().map_err(|_| Error::InvalidUrl {
                    url: url.to_string(),
                    reason: "bad port",
                })?,
            ),
            None => (hostport.to_string(), DEFAULT_RPC_PORT),
        };

        if host.is_empty() {
            return Err(Error::InvalidUrl { url: url.to_string(), reason: "missing host" });
        }

        let authpair = match (user, pass) {
            (Some(u), p) => Some(format!("{}:{}", u, p.unwrap_or_default())),
            (None, _) => userinfo.map(|s| s.to_string()),
        };
        let auth_header = authpair.map(|pair| format!("Basic {}", BASE64_STANDARD.encode(pair)));

        Ok(Transport { host, port, path: path.to_string(), auth_header, timeout })
    }

    /// POST `body` as JSON and return the raw response body.
    ///
    /// Any 2xx/4xx/5xx body is returned as-is; bitcoind reports RPC errors
    /// with both an HTTP error status and a JSON error object, and the
    /// caller wants the latter.
    pub(crate) fn post(&self, body: &str) -> Result<Vec<u8>> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address"))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut request = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: bmon-rpc/0.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.path,
            self.host,
            body.len(),
        );
        if let Some(auth) = &self.auth_header {
            request.push_str("Authorization: ");
            request.push_str(auth);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes())?;
        stream.write_all(body.as_bytes())?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        reader.read_line(&mut status_line)?;
        if !status_line.starts_with("HTTP/") {
            return Err(Error::MalformedResponse(status_line.trim().to_string()));
        }

        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line)?;
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok();
                }
            }
        }

        let mut body = Vec::new();
        match content_length {
            Some(n) => {
                body.resize(n, 0);
                reader.read_exact(&mut body)?;
            }
            // Connection: close, so EOF delimits the body.
            None => {
                reader.read_to_end(&mut body)?;
            }
        }
        Ok(body)
    }
}
