// SPDX-License-Identifier: CC0-1.0

//! Mempool activity archival: rolling Avro file plus object-store shipping.
//!
//! Mempool admissions are far too numerous for row storage, so they are
//! appended to a rolling Avro container file (`current`). Periodically the
//! file is atomically renamed to `to-ship.<timestamp>.avro`, uploaded
//! through the [`ObjectStorage`] seam, and renamed to
//! `shipped.<timestamp>.avro` on success. Appends and ships are serialized
//! by separate named locks; a concurrent ship attempt no-ops.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use apache_avro::types::Value as AvroValue;
use apache_avro::{Schema, Writer};
use bmon_events::MempoolAccept;
use bmon_kv::{FastStore, NamedLock};
use chrono::Utc;

/// The ship lock outlives any plausible upload.
const SHIP_LOCK_TTL: Duration = Duration::from_secs(8 * 60);

/// Avro schema for mempool activity.
const MEMPOOL_ACTIVITY_SCHEMA: &str = r#"
{
    "doc": "Bitcoind mempool activity",
    "name": "Mempool",
    "type": "record",
    "fields": [
        {"name": "event_type",
         "type": {"type": "enum", "name": "event_type", "symbols": ["mempool_accept"]}},
        {"name": "host", "type": "string"},
        {"name": "timestamp", "type": {"type": "long", "logicalType": "timestamp-micros"}},
        {"name": "txhash", "type": "string"},
        {"name": "peer_num", "type": ["null", "int"]},
        {"name": "pool_size_txns", "type": ["null", "int"]},
        {"name": "pool_size_kb", "type": ["null", "int"]}
    ]
}
"#;

/// The parsed mempool activity schema.
pub fn mempool_activity_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::parse_str(MEMPOOL_ACTIVITY_SCHEMA).expect("static schema parses")
    })
}

/// Render one admission as an Avro record matching the schema above.
pub fn avro_record(accept: &MempoolAccept) -> AvroValue {
    let opt_int = |n: u64| AvroValue::Union(1, Box::new(AvroValue::Int(n as i32)));
    AvroValue::Record(vec![
        ("event_type".to_string(), AvroValue::Enum(0, "mempool_accept".to_string())),
        ("host".to_string(), AvroValue::String(accept.host.clone())),
        (
            "timestamp".to_string(),
            AvroValue::TimestampMicros(accept.timestamp.timestamp_micros()),
        ),
        ("txhash".to_string(), AvroValue::String(accept.txhash.clone())),
        ("peer_num".to_string(), opt_int(accept.peer_num)),
        ("pool_size_txns".to_string(), opt_int(accept.pool_size_txns)),
        ("pool_size_kb".to_string(), opt_int(accept.pool_size_kb)),
    ])
}

/// Where shipped archives land; the real uploader is deployment scaffolding
/// behind this seam.
pub trait ObjectStorage: Send + Sync {
    fn put(&self, path: &str, data: &[u8]) -> io::Result<()>;
}

/// Object storage that mirrors uploads into a local directory tree.
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: &Path) -> DirStorage { DirStorage { root: root.to_path_buf() } }
}

impl ObjectStorage for DirStorage {
    fn put(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, data)
    }
}

/// The rolling mempool activity file.
///
/// The only mutable file the edge owns outside the fast store.
pub struct MempoolArchiver {
    dir: PathBuf,
    writer: Option<Writer<'static, File>>,
}

impl std::fmt::Debug for MempoolArchiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MempoolArchiver({})", self.dir.display())
    }
}

impl MempoolArchiver {
    /// Open the archive directory, rotating any file a previous process
    /// left behind (a container file cannot be reopened for append).
    pub fn new(dir: &Path) -> anyhow::Result<MempoolArchiver> {
        std::fs::create_dir_all(dir)?;
        let mut archiver = MempoolArchiver { dir: dir.to_path_buf(), writer: None };
        if archiver.current_path().exists() {
            log::info!("rotating stale mempool activity file from a previous run");
            archiver.rotate()?;
        }
        Ok(archiver)
    }

    fn current_path(&self) -> PathBuf { self.dir.join("current") }

    /// Size of the rolling file in bytes.
    pub fn current_size(&self) -> u64 {
        std::fs::metadata(self.current_path()).map(|m| m.len()).unwrap_or(0)
    }

    /// Append one admission and sync it into the container file.
    pub fn append(&mut self, accept: &MempoolAccept) -> anyhow::Result<()> {
        if self.writer.is_none() {
            let file = File::create(self.current_path())?;
            self.writer = Some(Writer::new(mempool_activity_schema(), file));
        }
        let writer = self.writer.as_mut().expect("writer was just created");
        writer.append(avro_record(accept))?;
        writer.flush()?;
        Ok(())
    }

    /// Finalize and rename the rolling file, returning the to-ship path.
    pub fn rotate(&mut self) -> anyhow::Result<Option<PathBuf>> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner()?;
            file.sync_all()?;
        }
        if !self.current_path().exists() {
            return Ok(None);
        }

        let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let target = self.dir.join(format!("to-ship.{}.avro", stamp));
        std::fs::rename(self.current_path(), &target)?;
        log::info!("rotated mempool activity file to {}", target.display());
        Ok(Some(target))
    }

    /// Rotate and upload everything pending.
    ///
    /// Serialized by a non-blocking named lock; a concurrent ship attempt
    /// returns immediately having done nothing.
    pub fn ship(
        &mut self,
        local: &dyn FastStore,
        storage: &dyn ObjectStorage,
        host: &str,
    ) -> anyhow::Result<usize> {
        let lock = NamedLock::new(local, "mempool-ship", SHIP_LOCK_TTL);
        let guard = match lock.try_acquire()? {
            Some(guard) => guard,
            None => {
                log::info!("mempool ship already in progress; skipping");
                return Ok(0);
            }
        };

        self.rotate()?;

        let mut shipped = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("to-ship.") {
                continue;
            }

            let data = std::fs::read(entry.path())?;
            let key = format!(
                "mempool_events/source=bmon/dt={}/{}.{}.avro",
                Utc::now().format("%Y-%m-%d"),
                host,
                Utc::now().timestamp(),
            );
            storage.put(&key, &data)?;

            let done = entry.path().with_file_name(name.replacen("to-ship.", "shipped.", 1));
            std::fs::rename(entry.path(), done)?;
            shipped += 1;
        }

        drop(guard);
        Ok(shipped)
    }
}

#[cfg(test)]
mod test {
    use apache_avro::Reader;
    use bmon_kv::MemoryStore;
    use chrono::TimeZone as _;

    use super::*;

    fn accept(txhash: &str) -> MempoolAccept {
        MempoolAccept {
            host: "node0".to_string(),
            timestamp: chrono::Utc.with_ymd_and_hms(2022, 10, 17, 17, 57, 43).unwrap(),
            txhash: txhash.to_string(),
            peer_num: 11,
            pool_size_txns: 11848,
            pool_size_kb: 25560,
        }
    }

    #[test]
    fn appended_records_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut archiver = MempoolArchiver::new(dir.path()).unwrap();

        archiver.append(&accept("aaaa")).unwrap();
        archiver.append(&accept("bbbb")).unwrap();
        assert!(archiver.current_size() > 0);

        let rotated = archiver.rotate().unwrap().unwrap();
        let reader = Reader::new(File::open(rotated).unwrap()).unwrap();
        let values: Vec<_> = reader.map(|v| v.unwrap()).collect();
        assert_eq!(values.len(), 2);

        match &values[0] {
            AvroValue::Record(fields) => {
                assert_eq!(fields[0].1, AvroValue::Enum(0, "mempool_accept".to_string()));
                assert_eq!(fields[1].1, AvroValue::String("node0".to_string()));
                assert_eq!(fields[3].1, AvroValue::String("aaaa".to_string()));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn ship_renames_and_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = tempfile::tempdir().unwrap();
        let local = MemoryStore::new();
        let storage = DirStorage::new(upload_dir.path());

        let mut archiver = MempoolArchiver::new(dir.path()).unwrap();
        archiver.append(&accept("cccc")).unwrap();

        let shipped = archiver.ship(&local, &storage, "node0").unwrap();
        assert_eq!(shipped, 1);

        // The local file is now marked shipped.
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("shipped.")));
        assert!(!names.iter().any(|n| n == "current"));

        // And a copy landed under the partitioned object path.
        let mut found = vec![];
        for entry in walk(upload_dir.path()) {
            found.push(entry);
        }
        assert!(found.iter().any(|p| {
            let s = p.to_string_lossy();
            s.contains("mempool_events/source=bmon/dt=") && s.contains("node0.")
        }));
    }

    #[test]
    fn concurrent_ship_noops() {
        let dir = tempfile::tempdir().unwrap();
        let local = MemoryStore::new();
        let storage = DirStorage::new(dir.path());

        let mut archiver = MempoolArchiver::new(dir.path()).unwrap();
        archiver.append(&accept("dddd")).unwrap();

        let lock = NamedLock::new(&local, "mempool-ship", SHIP_LOCK_TTL);
        let _held = lock.try_acquire().unwrap().unwrap();
        assert_eq!(archiver.ship(&local, &storage, "node0").unwrap(), 0);
    }

    #[test]
    fn stale_current_is_rotated_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut archiver = MempoolArchiver::new(dir.path()).unwrap();
            archiver.append(&accept("eeee")).unwrap();
            // Dropped without rotation, as in a crash.
        }
        let archiver = MempoolArchiver::new(dir.path()).unwrap();
        assert_eq!(archiver.current_size(), 0);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("to-ship.")));
    }

    fn walk(dir: &Path) -> Vec<PathBuf> {
        let mut out = vec![];
        for entry in std::fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                out.extend(walk(&entry.path()));
            } else {
                out.push(entry.path());
            }
        }
        out
    }
}
