//! Write-Ahead Logging (WAL) and snapshot persistence for a partition.
//!
//! Every non-empty commit is appended to the WAL before its effects become
//! visible. A checkpoint writes the full committed state to a snapshot file
//! (temp file + rename) and truncates the WAL.

use super::entry::StoredEntry;
use crate::core::{Result, StoreError};
use crate::transaction::Change;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, event};

pub const WAL_FILE: &str = "partition.wal";
pub const SNAPSHOT_FILE: &str = "partition.snapshot";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Entries of every collection, keyed by collection name then encoded key.
pub type CollectionData = HashMap<String, HashMap<Vec<u8>, StoredEntry>>;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Write-Ahead Log entry types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    /// All changes of one committed transaction
    Commit {
        tx_id: u64,
        lsn: u64,
        committed_at: DateTime<Utc>,
        changes: Vec<Change>,
    },
}

impl WalEntry {
    pub fn lsn(&self) -> u64 {
        match self {
            WalEntry::Commit { lsn, .. } => *lsn,
        }
    }
}

// ============================================================================
// Partition Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    pub entries: Vec<(Vec<u8>, StoredEntry)>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    pub version: u32,
    pub last_lsn: u64,
    pub collections: Vec<CollectionSnapshot>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
    pub collection_count: usize,
}

impl PartitionSnapshot {
    pub fn new(collections: &CollectionData, last_lsn: u64) -> Self {
        let collections: Vec<CollectionSnapshot> = collections
            .iter()
            .map(|(name, entries)| CollectionSnapshot {
                name: name.clone(),
                entries: entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            })
            .collect();
        let entry_count = collections.iter().map(|c| c.entries.len()).sum();
        let collection_count = collections.len();

        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            last_lsn,
            collections,
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                entry_count,
                collection_count,
            },
        }
    }

    pub fn into_collections(self) -> CollectionData {
        self.collections
            .into_iter()
            .map(|c| (c.name, c.entries.into_iter().collect()))
            .collect()
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every commit
    Sync,
    /// Flush to the OS after every commit
    #[default]
    Async,
    /// Keep state in memory only
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(DurabilityMode::Sync),
            "async" => Ok(DurabilityMode::Async),
            "none" => Ok(DurabilityMode::None),
            other => Err(StoreError::ExecutionError(format!(
                "Unknown durability mode '{}' (expected sync, async or none)",
                other
            ))),
        }
    }
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    /// File length covered by complete records
    valid_len: u64,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::IoError(format!("Failed to create WAL directory: {}", e))
            })?;
        }

        let mut valid_len = 0;
        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&wal_path)
                .map_err(|e| StoreError::IoError(format!("Failed to open WAL file: {}", e)))?;
            valid_len = file
                .metadata()
                .map_err(|e| StoreError::IoError(format!("Failed to stat WAL file: {}", e)))?
                .len();
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            valid_len,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let serialized = rmp_serde::to_vec(entry)?;
        let len = u32::try_from(serialized.len()).map_err(|_| {
            StoreError::SerializationError(format!(
                "WAL record of {} bytes exceeds the record size limit",
                serialized.len()
            ))
        })?;
        let file = self.wal_file.as_mut().ok_or_else(|| {
            StoreError::IoError("WAL is unavailable until the next checkpoint".to_string())
        })?;

        match Self::write_record(file, len, &serialized, self.durability_mode) {
            Ok(()) => {
                self.valid_len += 4 + u64::from(len);
                self.entries_since_checkpoint += 1;
                Ok(())
            }
            Err(err) => {
                self.discard_partial_append();
                Err(err)
            }
        }
    }

    fn write_record(
        file: &mut BufWriter<File>,
        len: u32,
        serialized: &[u8],
        durability_mode: DurabilityMode,
    ) -> Result<()> {
        file.write_all(&len.to_le_bytes())
            .map_err(|e| StoreError::IoError(format!("Failed to write WAL: {}", e)))?;
        file.write_all(serialized)
            .map_err(|e| StoreError::IoError(format!("Failed to write WAL: {}", e)))?;
        file.flush()
            .map_err(|e| StoreError::IoError(format!("Failed to flush WAL: {}", e)))?;
        if durability_mode == DurabilityMode::Sync {
            file.get_mut()
                .sync_all()
                .map_err(|e| StoreError::IoError(format!("Failed to sync WAL: {}", e)))?;
        }
        Ok(())
    }

    /// Drop whatever a failed append left behind, buffered or on disk, so the
    /// next record starts right after the last complete one. If the file
    /// cannot be cut back, appends are refused until `clear` reopens it.
    fn discard_partial_append(&mut self) {
        let Some(writer) = self.wal_file.take() else {
            return;
        };
        let (file, _unwritten) = writer.into_parts();
        match file.set_len(self.valid_len) {
            Ok(()) => self.wal_file = Some(BufWriter::new(file)),
            Err(e) => event!(
                Level::ERROR,
                path = %self.wal_path.display(),
                error = %e,
                "failed to roll back partial WAL record; appends disabled until checkpoint"
            ),
        }
    }

    /// Read every complete record. A torn trailing record (crash mid-append)
    /// is dropped: its commit never became visible.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path)
            .map_err(|e| StoreError::IoError(format!("Failed to open WAL for reading: {}", e)))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(StoreError::IoError(format!(
                        "Failed to read WAL entry length: {}",
                        e
                    )));
                }
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    event!(Level::WARN, path = %self.wal_path.display(), "ignoring torn WAL tail");
                    break;
                }
                Err(e) => {
                    return Err(StoreError::IoError(format!(
                        "Failed to read WAL entry data: {}",
                        e
                    )));
                }
            }
            let entry: WalEntry = rmp_serde::from_slice(&data)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| StoreError::IoError(format!("Failed to truncate WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        self.valid_len = 0;
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn save(&self, snapshot: &PartitionSnapshot) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::IoError(format!("Failed to create snapshot directory: {}", e))
            })?;
        }
        let temp_path = self.snapshot_path.with_extension("tmp");
        let temp_file = File::create(&temp_path)
            .map_err(|e| StoreError::IoError(format!("Failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(temp_file);
        let serialized = rmp_serde::to_vec(snapshot)?;
        writer
            .write_all(&serialized)
            .map_err(|e| StoreError::IoError(format!("Failed to write snapshot: {}", e)))?;
        writer
            .flush()
            .map_err(|e| StoreError::IoError(format!("Failed to flush snapshot: {}", e)))?;
        writer
            .get_mut()
            .sync_all()
            .map_err(|e| StoreError::IoError(format!("Failed to sync snapshot: {}", e)))?;
        fs::rename(&temp_path, &self.snapshot_path)
            .map_err(|e| StoreError::IoError(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<PartitionSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| StoreError::IoError(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| StoreError::IoError(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: PartitionSnapshot = rmp_serde::from_slice(&data)?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::SerializationError(format!(
                "Unsupported snapshot format version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

/// State recovered from disk
pub struct RecoveredState {
    pub collections: CollectionData,
    pub last_lsn: u64,
}

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, collections: &CollectionData, last_lsn: u64) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let snapshot = PartitionSnapshot::new(collections, last_lsn);
        self.snapshot.save(&snapshot)?;
        self.wal.clear()?;
        event!(
            Level::DEBUG,
            last_lsn,
            entries = snapshot.metadata.entry_count,
            "partition checkpoint written"
        );
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Load the snapshot and replay every WAL commit newer than it.
    pub fn recover(&self) -> Result<RecoveredState> {
        let (mut collections, mut last_lsn) = match self.snapshot.load()? {
            Some(snapshot) => {
                let lsn = snapshot.last_lsn;
                (snapshot.into_collections(), lsn)
            }
            None => (HashMap::new(), 0),
        };

        for entry in self.wal.read_all()? {
            if entry.lsn() <= last_lsn {
                continue;
            }
            match entry {
                WalEntry::Commit {
                    lsn,
                    committed_at,
                    changes,
                    ..
                } => {
                    apply_changes(&mut collections, lsn, committed_at, changes);
                    last_lsn = lsn;
                }
            }
        }

        Ok(RecoveredState {
            collections,
            last_lsn,
        })
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }
}

/// Apply one commit's changes; every written key takes `lsn` as its version.
pub fn apply_changes(
    collections: &mut CollectionData,
    lsn: u64,
    committed_at: DateTime<Utc>,
    changes: impl IntoIterator<Item = Change>,
) {
    for change in changes {
        match change {
            Change::Put {
                collection,
                key,
                value,
                ttl_ms,
            } => {
                // A TTL past the representable range never expires.
                let expires_at = ttl_ms.and_then(|ms| {
                    let ttl = chrono::Duration::try_milliseconds(i64::try_from(ms).ok()?)?;
                    committed_at.checked_add_signed(ttl)
                });
                collections
                    .entry(collection)
                    .or_default()
                    .insert(key, StoredEntry::new(value, lsn, expires_at));
            }
            Change::Remove { collection, key } => {
                if let Some(entries) = collections.get_mut(&collection) {
                    entries.remove(&key);
                }
            }
        }
    }
}
