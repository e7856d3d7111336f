//! Durable storage for flight ledgers.
//!
//! Each active flight persists as `active_ledgers/flight_<id>.json`, a
//! JSON array of blocks in chain order written with stable key ordering
//! for human readability (hashing re-sorts keys, so pretty output is
//! safe).  Archiving moves the ledger to
//! `flight_archives/Flight_<id>.json`.  The flight
//! counter is a single text file holding the decimal last-issued
//! identifier; absence means "no flights issued yet".  All writes go
//! through a temp-file-plus-rename so readers never observe a torn file.

use crate::block::{Block, EventKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const ACTIVE_DIR: &str = "active_ledgers";
const ARCHIVE_DIR: &str = "flight_archives";
const BACKUP_DIR: &str = "backups";
const COUNT_FILE: &str = "flight_count.txt";

/// Filesystem layout for one coordinator deployment.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    active_dir: PathBuf,
    archive_dir: PathBuf,
    backup_root: PathBuf,
    count_path: PathBuf,
}

/// Summary of one archived flight, recovered from its genesis block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSummary {
    /// Archive file stem, e.g. `Flight_7`.
    pub name: String,
    /// Flight identifier parsed from the filename.
    pub flight_id: u64,
    /// Number of blocks in the archived chain.
    pub blocks: usize,
    /// Device identifier from the genesis `CHAIN_START` event.
    pub uav_id: String,
    /// Operator from the genesis `CHAIN_START` event.
    pub operator: String,
    /// Genesis block timestamp, Unix seconds.
    pub started_at: f64,
}

/// What a maintenance reset moved aside.
#[derive(Debug, Clone)]
pub struct ResetReport {
    /// Timestamped directory the ledger files were moved into.
    pub backup_dir: PathBuf,
    /// Number of archived flights moved.
    pub archived_moved: usize,
    /// Number of active ledgers moved.
    pub active_moved: usize,
    /// Whether a flight counter file existed and was removed.
    pub counter_removed: bool,
}

impl LedgerStore {
    /// Opens (and creates, if needed) the storage layout under `root`.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let store = Self {
            active_dir: root.join(ACTIVE_DIR),
            archive_dir: root.join(ARCHIVE_DIR),
            backup_root: root.join(BACKUP_DIR),
            count_path: root.join(COUNT_FILE),
        };
        fs::create_dir_all(&store.active_dir)?;
        fs::create_dir_all(&store.archive_dir)?;
        Ok(store)
    }

    /// Atomically issues the next flight identifier.
    ///
    /// Identifiers start at 1 and increase by 1 per call.  A missing or
    /// corrupt counter file resets numbering rather than failing.  The
    /// read-modify-write is not internally locked; callers serialize
    /// through the manager lock.
    pub fn next_flight_id(&self) -> io::Result<u64> {
        let last = match fs::read_to_string(&self.count_path) {
            Ok(text) => text.trim().parse::<u64>().unwrap_or(0),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err),
        };
        let next = last + 1;
        write_atomic(&self.count_path, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Path of the active ledger file for a flight.
    pub fn active_path(&self, flight_id: u64) -> PathBuf {
        self.active_dir.join(format!("flight_{flight_id}.json"))
    }

    /// Path of the archived ledger file for a flight.
    pub fn archive_path(&self, flight_id: u64) -> PathBuf {
        self.archive_dir.join(format!("Flight_{flight_id}.json"))
    }

    /// Resolves an archive name (e.g. `Flight_7` or `Flight_7.json`) to
    /// its file path, rejecting anything that could escape the archive
    /// directory.
    pub fn archive_file(&self, name: &str) -> Option<PathBuf> {
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return None;
        }
        let file = if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{name}.json")
        };
        Some(self.archive_dir.join(file))
    }

    /// Persists a flight's chain to its active ledger file.
    pub fn save_chain(&self, flight_id: u64, chain: &[Block]) -> io::Result<PathBuf> {
        let path = self.active_path(flight_id);
        let contents = serde_json::to_string_pretty(chain)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        write_atomic(&path, contents.as_bytes())?;
        Ok(path)
    }

    /// Moves a flight's persisted chain from active to archive storage.
    ///
    /// The archive file is written from the in-memory chain (the
    /// authoritative copy), then the active file is removed; a stale or
    /// missing active file therefore cannot corrupt the archive.
    pub fn archive_chain(&self, flight_id: u64, chain: &[Block]) -> io::Result<PathBuf> {
        let archive = self.archive_path(flight_id);
        let contents = serde_json::to_string_pretty(chain)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        write_atomic(&archive, contents.as_bytes())?;
        match fs::remove_file(self.active_path(flight_id)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        Ok(archive)
    }

    /// Reads a persisted block array from disk.
    pub fn load_chain(&self, path: &Path) -> io::Result<Vec<Block>> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Lists archived flights sorted by flight identifier, skipping
    /// unreadable files with a warning.
    pub fn list_archives(&self) -> io::Result<Vec<ArchiveSummary>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.archive_dir)?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(id_str) = stem.strip_prefix("Flight_") else {
                continue;
            };
            let Ok(flight_id) = id_str.parse::<u64>() else {
                continue;
            };
            match self.load_chain(&path) {
                Ok(chain) => {
                    if let Some(summary) = summarize(stem, flight_id, &chain) {
                        found.push(summary);
                    }
                }
                Err(err) => {
                    tracing::warn!(file = %path.display(), %err, "skipping unreadable archive");
                }
            }
        }
        found.sort_by_key(|summary| summary.flight_id);
        Ok(found)
    }

    /// Moves all ledger files into a timestamped backup directory and
    /// removes the flight counter, restarting numbering at 1.
    ///
    /// Run only while the coordinator is stopped.
    pub fn reset(&self) -> io::Result<ResetReport> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let backup_dir = self.backup_root.join(format!("flight_reset_{stamp}"));
        let archived_moved =
            move_matching(&self.archive_dir, "Flight_", &backup_dir.join(ARCHIVE_DIR))?;
        let active_moved =
            move_matching(&self.active_dir, "flight_", &backup_dir.join(ACTIVE_DIR))?;
        let counter_removed = match fs::remove_file(&self.count_path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(err),
        };
        Ok(ResetReport {
            backup_dir,
            archived_moved,
            active_moved,
            counter_removed,
        })
    }
}

fn summarize(stem: &str, flight_id: u64, chain: &[Block]) -> Option<ArchiveSummary> {
    let genesis = chain.first()?;
    let start = genesis
        .event_log
        .iter()
        .find(|event| event.event_type == EventKind::ChainStart);
    Some(ArchiveSummary {
        name: stem.to_string(),
        flight_id,
        blocks: chain.len(),
        uav_id: start
            .and_then(|e| e.uav_id.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        operator: start
            .and_then(|e| e.operator.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        started_at: genesis.timestamp,
    })
}

fn move_matching(dir: &Path, prefix: &str, backup_dir: &Path) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut moved = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(".json") {
            continue;
        }
        fs::create_dir_all(backup_dir)?;
        fs::rename(&path, backup_dir.join(name))?;
        moved += 1;
    }
    Ok(moved)
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    // unique per write so concurrent persists of the same flight never
    // share a temp file
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp.{stamp}.{seq}"));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_store() -> (PathBuf, LedgerStore) {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = std::env::temp_dir().join(format!("skyledger_store_{unique}"));
        let store = LedgerStore::open(&root).unwrap();
        (root, store)
    }

    #[test]
    fn test_flight_counter_starts_at_one_and_increments() {
        let (root, store) = temp_store();
        assert_eq!(store.next_flight_id().unwrap(), 1);
        assert_eq!(store.next_flight_id().unwrap(), 2);
        assert_eq!(store.next_flight_id().unwrap(), 3);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_corrupt_counter_resets_numbering() {
        let (root, store) = temp_store();
        fs::write(root.join(COUNT_FILE), "not a number").unwrap();
        assert_eq!(store.next_flight_id().unwrap(), 1);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (root, store) = temp_store();
        let chain = vec![Block::genesis(5, "UAV_A1", "ops").unwrap()];
        let path = store.save_chain(5, &chain).unwrap();
        assert_eq!(path, store.active_path(5));
        let loaded = store.load_chain(&path).unwrap();
        assert_eq!(loaded, chain);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_archive_moves_active_file() {
        let (root, store) = temp_store();
        let chain = vec![Block::genesis(9, "UAV_B2", "ops").unwrap()];
        store.save_chain(9, &chain).unwrap();
        let archive = store.archive_chain(9, &chain).unwrap();
        assert!(archive.is_file());
        assert!(!store.active_path(9).exists());
        assert_eq!(store.load_chain(&archive).unwrap(), chain);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_list_archives_sorted_with_genesis_metadata() {
        let (root, store) = temp_store();
        for id in [3u64, 1, 2] {
            let chain = vec![Block::genesis(id, "UAV_A1", "ops").unwrap()];
            store.archive_chain(id, &chain).unwrap();
        }
        let archives = store.list_archives().unwrap();
        let ids: Vec<u64> = archives.iter().map(|a| a.flight_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(archives[0].uav_id, "UAV_A1");
        assert_eq!(archives[0].blocks, 1);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_concurrent_saves_of_one_flight_leave_a_parseable_file() {
        let (root, store) = temp_store();
        let chain = vec![Block::genesis(4, "UAV_A1", "ops").unwrap()];
        let store = std::sync::Arc::new(store);
        let chain = std::sync::Arc::new(chain);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                let chain = std::sync::Arc::clone(&chain);
                std::thread::spawn(move || store.save_chain(4, &chain).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let loaded = store.load_chain(&store.active_path(4)).unwrap();
        assert_eq!(loaded, *chain);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_archive_file_rejects_traversal() {
        let (root, store) = temp_store();
        assert!(store.archive_file("../secret").is_none());
        assert!(store.archive_file("a/b").is_none());
        assert!(store.archive_file("Flight_4").is_some());
        assert!(store.archive_file("Flight_4.json").is_some());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_reset_backs_up_and_clears_counter() {
        let (root, store) = temp_store();
        store.next_flight_id().unwrap();
        let chain = vec![Block::genesis(1, "UAV_A1", "ops").unwrap()];
        store.save_chain(1, &chain).unwrap();
        store.archive_chain(2, &chain).unwrap();

        let report = store.reset().unwrap();
        assert_eq!(report.archived_moved, 1);
        assert_eq!(report.active_moved, 1);
        assert!(report.counter_removed);
        assert!(report.backup_dir.is_dir());
        assert_eq!(store.next_flight_id().unwrap(), 1);
        fs::remove_dir_all(&root).unwrap();
    }
}
