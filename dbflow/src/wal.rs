//! The write-ahead log: CRC-framed epoch and checkpoint records.
//!
//! Layout: an 8-byte ASCII magic (`DBSPWAL1`), then framed records. Each
//! record is a little-endian `u32` payload length, the payload bytes, and a
//! `u32` CRC-32 (IEEE) of the payload. The payload is a `u8` record type, an
//! `i64` epoch, and a length-prefixed UTF-8 name (empty for epoch markers).
//!
//! Recovery never throws on damage: scanning stops at the first CRC mismatch
//! or truncated trailing record and reports the last good offset, and an
//! explicit truncation request cuts the file back to the last intact record.
//! Appends serialize through a per-file lock; reads open their own handle.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};

const MAGIC: &[u8; 8] = b"DBSPWAL1";

const TYPE_BEGIN_EPOCH: u8 = 1;
const TYPE_END_EPOCH: u8 = 2;
const TYPE_CHECKPOINT_CREATED: u8 = 3;
const TYPE_RESTORED_FROM_CHECKPOINT: u8 = 4;

/// Everything the log records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalRecord {
    /// A unit of durable work opened.
    BeginEpoch(i64),
    /// The epoch committed.
    EndEpoch(i64),
    /// A checkpoint finished under the given name.
    CheckpointCreated {
        /// The epoch the checkpoint captured.
        epoch: i64,
        /// The checkpoint's name.
        name: String,
    },
    /// State was restored from a checkpoint.
    RestoredFromCheckpoint {
        /// The restored epoch.
        epoch: i64,
        /// The checkpoint's name.
        name: String,
    },
}

impl WalRecord {
    fn type_byte(&self) -> u8 {
        match self {
            WalRecord::BeginEpoch(_) => TYPE_BEGIN_EPOCH,
            WalRecord::EndEpoch(_) => TYPE_END_EPOCH,
            WalRecord::CheckpointCreated { .. } => TYPE_CHECKPOINT_CREATED,
            WalRecord::RestoredFromCheckpoint { .. } => TYPE_RESTORED_FROM_CHECKPOINT,
        }
    }

    fn epoch(&self) -> i64 {
        match self {
            WalRecord::BeginEpoch(epoch) | WalRecord::EndEpoch(epoch) => *epoch,
            WalRecord::CheckpointCreated { epoch, .. }
            | WalRecord::RestoredFromCheckpoint { epoch, .. } => *epoch,
        }
    }

    fn name(&self) -> &str {
        match self {
            WalRecord::BeginEpoch(_) | WalRecord::EndEpoch(_) => "",
            WalRecord::CheckpointCreated { name, .. }
            | WalRecord::RestoredFromCheckpoint { name, .. } => name,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        let name = self.name().as_bytes();
        let mut payload = Vec::with_capacity(1 + 8 + 2 + name.len());
        payload.push(self.type_byte());
        payload.extend_from_slice(&self.epoch().to_le_bytes());
        payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
        payload.extend_from_slice(name);
        payload
    }

    fn decode_payload(payload: &[u8]) -> Result<WalRecord> {
        if payload.len() < 11 {
            return Err(Error::Persistence("wal payload shorter than its fixed fields".into()));
        }
        let type_byte = payload[0];
        let epoch = i64::from_le_bytes(payload[1..9].try_into().expect("8 bytes"));
        let name_len = u16::from_le_bytes(payload[9..11].try_into().expect("2 bytes")) as usize;
        if payload.len() != 11 + name_len {
            return Err(Error::Persistence("wal payload length disagrees with name length".into()));
        }
        let name = std::str::from_utf8(&payload[11..])
            .map_err(|_| Error::Persistence("wal record name is not UTF-8".into()))?
            .to_string();
        match type_byte {
            TYPE_BEGIN_EPOCH => Ok(WalRecord::BeginEpoch(epoch)),
            TYPE_END_EPOCH => Ok(WalRecord::EndEpoch(epoch)),
            TYPE_CHECKPOINT_CREATED => Ok(WalRecord::CheckpointCreated { epoch, name }),
            TYPE_RESTORED_FROM_CHECKPOINT => Ok(WalRecord::RestoredFromCheckpoint { epoch, name }),
            other => Err(Error::Persistence(format!("unknown wal record type {other}"))),
        }
    }
}

/// The result of scanning a log.
#[derive(Debug)]
pub struct WalScan {
    /// Intact records, with the offset each began at.
    pub records: Vec<(u64, WalRecord)>,
    /// The end of the last intact record (or of the header).
    pub last_good_offset: u64,
    /// Why the scan stopped early, if it did.
    pub corruption: Option<String>,
}

/// An append-only, CRC-framed log file.
pub struct Wal {
    path: PathBuf,
    writer: Mutex<File>,
}

impl Wal {
    /// Opens (creating if needed) the log at `path` and validates its magic.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(MAGIC)?;
            file.flush()?;
        } else {
            let mut magic = [0u8; 8];
            file.seek(SeekFrom::Start(0))?;
            if len < MAGIC.len() as u64 {
                return Err(Error::Persistence("wal file shorter than its magic".into()));
            }
            file.read_exact(&mut magic)?;
            if &magic != MAGIC {
                return Err(Error::Persistence("wal file has unknown magic".into()));
            }
        }
        file.seek(SeekFrom::End(0))?;
        Ok(Wal { path, writer: Mutex::new(file) })
    }

    /// The log's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record, returning the offset it was written at.
    pub fn append(&self, record: &WalRecord) -> Result<u64> {
        let payload = record.encode_payload();
        let crc = crc32fast::hash(&payload);
        let mut framed = Vec::with_capacity(8 + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        framed.extend_from_slice(&payload);
        framed.extend_from_slice(&crc.to_le_bytes());

        let mut writer = self.writer.lock();
        let offset = writer.seek(SeekFrom::End(0))?;
        writer.write_all(&framed)?;
        writer.flush()?;
        tracing::trace!(?record, offset, "wal append");
        Ok(offset)
    }

    /// Scans the whole log, stopping at damage without erroring.
    pub fn scan(&self) -> Result<WalScan> {
        let mut file = File::open(&self.path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::Persistence("wal file has unknown magic".into()));
        }

        let mut records = Vec::new();
        let mut offset = MAGIC.len();
        let mut corruption = None;
        while offset < bytes.len() {
            let remaining = &bytes[offset..];
            if remaining.len() < 4 {
                corruption = Some("truncated length prefix".into());
                break;
            }
            let payload_len =
                u32::from_le_bytes(remaining[..4].try_into().expect("4 bytes")) as usize;
            if remaining.len() < 4 + payload_len + 4 {
                corruption = Some("truncated trailing record".into());
                break;
            }
            let payload = &remaining[4..4 + payload_len];
            let stored_crc = u32::from_le_bytes(
                remaining[4 + payload_len..4 + payload_len + 4].try_into().expect("4 bytes"),
            );
            if crc32fast::hash(payload) != stored_crc {
                corruption = Some(format!("crc mismatch at offset {offset}"));
                break;
            }
            match WalRecord::decode_payload(payload) {
                Ok(record) => records.push((offset as u64, record)),
                Err(error) => {
                    corruption = Some(error.to_string());
                    break;
                }
            }
            offset += 4 + payload_len + 4;
        }

        if let Some(reason) = &corruption {
            tracing::warn!(last_good = offset, %reason, "wal scan stopped early");
        }
        Ok(WalScan { records, last_good_offset: offset as u64, corruption })
    }

    /// The epoch of the last intact `EndEpoch` record.
    pub fn last_committed_epoch(&self) -> Result<Option<i64>> {
        let scan = self.scan()?;
        Ok(scan
            .records
            .iter()
            .rev()
            .find_map(|(_, record)| match record {
                WalRecord::EndEpoch(epoch) => Some(*epoch),
                _ => None,
            }))
    }

    /// The epoch and name of the last intact `CheckpointCreated` record.
    pub fn latest_checkpoint(&self) -> Result<Option<(i64, String)>> {
        let scan = self.scan()?;
        Ok(scan
            .records
            .iter()
            .rev()
            .find_map(|(_, record)| match record {
                WalRecord::CheckpointCreated { epoch, name } => Some((*epoch, name.clone())),
                _ => None,
            }))
    }

    /// Cuts the file back to the end of the last intact record.
    pub fn truncate_to_last_good_record(&self) -> Result<u64> {
        let scan = self.scan()?;
        let writer = self.writer.lock();
        writer.set_len(scan.last_good_offset)?;
        tracing::info!(offset = scan.last_good_offset, "wal truncated to last good record");
        Ok(scan.last_good_offset)
    }
}
