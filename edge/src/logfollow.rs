// SPDX-License-Identifier: CC0-1.0

//! Rotation-robust tailing of the bitcoind debug log.
//!
//! The follower reads the log as bytes in fixed-size chunks, splitting
//! complete lines on newlines and carrying incomplete trailing text across
//! reads. On EOF it polls the file's inode; a change means the log was
//! rotated and the new file is read from the start. Decoding is lossy so a
//! corrupt line cannot stall the stream.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use bmon_events::linehash;

/// Chunk size for log reads.
const READ_CHUNK: usize = 1024;

/// How long to sleep at EOF before re-probing the file.
const EOF_POLL: Duration = Duration::from_millis(10);

/// Cursor-seek progress is logged every this many lines.
const SEEK_LOG_EVERY: u64 = 10_000;

/// Follows a debug log across rotations, yielding complete lines.
///
/// Single consumer, not restartable; construct a new follower to re-read.
#[derive(Debug)]
pub struct LogFollower {
    path: PathBuf,
    file: File,
    ino: u64,
    /// Bytes read past the last newline, carried to the next chunk.
    partial: Vec<u8>,
    /// Complete lines waiting to be handed out.
    ready: VecDeque<String>,
    /// Bytes consumed from the current file, for truncation detection.
    pos: u64,
}

impl LogFollower {
    /// Open `path` and position the stream just past the line whose
    /// fingerprint equals `cursor`.
    ///
    /// A missing file is fatal. A cursor that is not found in the current
    /// file contents logs a warning and the stream starts from the top.
    pub fn open(path: &Path, cursor: Option<&str>) -> io::Result<LogFollower> {
        let mut file = File::open(path)?;
        let ino = file.metadata()?.ino();

        let mut start_pos = 0u64;
        if let Some(cursor) = cursor {
            log::info!("attempting to seek to logline cursor {}", cursor);
            match seek_to_cursor(&mut file, cursor)? {
                Some(pos) => {
                    log::info!("found start of logs (per cursor {}) at {}", cursor, pos);
                    start_pos = pos;
                }
                None => log::warn!(
                    "desired logline cursor ({}) not found in file {} - parsing all lines",
                    cursor,
                    path.display()
                ),
            }
        }

        file.seek(SeekFrom::Start(start_pos))?;
        Ok(LogFollower {
            path: path.to_path_buf(),
            file,
            ino,
            partial: Vec::new(),
            ready: VecDeque::new(),
            pos: start_pos,
        })
    }

    /// Hand out the next complete line without blocking.
    ///
    /// Returns `None` when the file is exhausted and has not rotated; the
    /// caller decides how to wait. Rotation and truncation are handled
    /// internally (the file is reopened from the start).
    pub fn poll_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }
            match self.fill() {
                Ok(0) => {
                    self.check_rotated();
                    if self.ready.is_empty() {
                        return None;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // Transient read errors are retried on the next poll.
                    log::warn!("error reading {}: {}", self.path.display(), e);
                    return None;
                }
            }
        }
    }

    /// Block until the next line arrives.
    pub fn next_line(&mut self) -> String {
        loop {
            if let Some(line) = self.poll_line() {
                return line;
            }
            thread::sleep(EOF_POLL);
        }
    }

    /// Block up to `timeout` for the next line.
    pub fn next_line_timeout(&mut self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.poll_line() {
                return Some(line);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(EOF_POLL);
        }
    }

    /// Read one chunk, splitting completed lines into the ready queue.
    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let got = self.file.read(&mut chunk)?;
        if got == 0 {
            return Ok(0);
        }
        self.pos += got as u64;
        self.partial.extend_from_slice(&chunk[..got]);

        while let Some(newline) = self.partial.iter().position(|b| *b == b'\n') {
            let rest = self.partial.split_off(newline + 1);
            self.partial.pop(); // strip the newline
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial = rest;
            self.ready.push_back(line);
        }
        Ok(got)
    }

    /// At EOF: reopen if the file was rotated (new inode) or truncated.
    ///
    /// Errors probing the file are swallowed; the next poll retries.
    fn check_rotated(&mut self) {
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(_) => return,
        };

        if meta.ino() != self.ino {
            log::info!("detected inode change in {}; reopening file", self.path.display());
        } else if meta.len() < self.pos {
            log::info!("detected truncation of {}; reopening file", self.path.display());
        } else {
            return;
        }

        match File::open(&self.path) {
            Ok(file) => {
                let ino = match file.metadata() {
                    Ok(m) => m.ino(),
                    Err(_) => return,
                };
                self.file = file;
                self.ino = ino;
                self.partial.clear();
                self.pos = 0;
            }
            Err(e) => log::warn!("failed to reopen {}: {}", self.path.display(), e),
        }
    }
}

/// Scan from the start of `file` for a line hashing to `cursor`.
///
/// Returns the byte offset just past the matching line, or `None` when the
/// cursor is not present in the current contents.
fn seek_to_cursor(file: &mut File, cursor: &str) -> io::Result<Option<u64>> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(file);
    let mut pos = 0u64;
    let mut lineno = 0u64;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let got = reader.read_until(b'\n', &mut buf)?;
        if got == 0 {
            return Ok(None);
        }
        pos += got as u64;

        let line = String::from_utf8_lossy(&buf);
        if linehash(line.trim_end_matches('\n')) == cursor {
            return Ok(Some(pos));
        }

        lineno += 1;
        if lineno % SEEK_LOG_EVERY == 0 {
            log::info!("still seeking... {} lines seen", lineno);
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    #[test]
    fn yields_lines_and_survives_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        write_lines(&path, &["one", "two", "three", "four", "five"]);

        let mut follower = LogFollower::open(&path, None).unwrap();
        let mut got = vec![];
        while let Some(line) = follower.poll_line() {
            got.push(line);
        }
        assert_eq!(got, vec!["one", "two", "three", "four", "five"]);
        assert!(follower.poll_line().is_none());

        // Rotate: replace the file wholesale (new inode).
        std::fs::remove_file(&path).unwrap();
        write_lines(&path, &["six", "seven", "eight"]);

        let mut got = vec![];
        while let Some(line) = follower.next_line_timeout(Duration::from_secs(2)) {
            got.push(line);
            if got.len() == 3 {
                break;
            }
        }
        assert_eq!(got, vec!["six", "seven", "eight"]);
    }

    #[test]
    fn recovers_from_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        write_lines(&path, &["aaaa", "bbbb"]);

        let mut follower = LogFollower::open(&path, None).unwrap();
        assert_eq!(follower.poll_line().as_deref(), Some("aaaa"));
        assert_eq!(follower.poll_line().as_deref(), Some("bbbb"));

        // Truncate in place (same inode) and write fresh contents.
        std::fs::write(&path, "cccc\n").unwrap();
        let got = follower.next_line_timeout(Duration::from_secs(2));
        assert_eq!(got.as_deref(), Some("cccc"));
    }

    #[test]
    fn resumes_from_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        write_lines(&path, &["one", "two", "three"]);

        let cursor = linehash("two");
        let mut follower = LogFollower::open(&path, Some(&cursor)).unwrap();
        assert_eq!(follower.poll_line().as_deref(), Some("three"));
        assert!(follower.poll_line().is_none());
    }

    #[test]
    fn unknown_cursor_reads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        write_lines(&path, &["one", "two"]);

        let mut follower = LogFollower::open(&path, Some("not-a-real-cursor")).unwrap();
        assert_eq!(follower.poll_line().as_deref(), Some("one"));
        assert_eq!(follower.poll_line().as_deref(), Some("two"));
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LogFollower::open(&dir.path().join("nope.log"), None).is_err());
    }

    #[test]
    fn splits_lines_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        // A line longer than one read chunk.
        let long = "x".repeat(READ_CHUNK * 2 + 37);
        write_lines(&path, &[&long, "short"]);

        let mut follower = LogFollower::open(&path, None).unwrap();
        assert_eq!(follower.poll_line().unwrap(), long);
        assert_eq!(follower.poll_line().as_deref(), Some("short"));
    }
}
