//! Checkpoints: operator-state snapshots with a CRC-framed manifest.
//!
//! A checkpoint taken at epoch `E` lives in `cp_{E}/` under the manager's
//! root: one `op_{node}.bin` file of codec bytes per stateful operator, plus
//! `manifest.bin`. The manifest starts with the 7-byte ASCII magic `DBSPCP2`
//! followed by one framed record (`u32` length, payload, `u32` CRC-32 of the
//! payload). The payload lists the circuit id, epoch, checkpoint name, and
//! the per-operator file table. Manifests written by older code start with
//! `DBSPCP1` and carry no CRC; the restore path accepts them.

use std::fs;
use std::path::{Path, PathBuf};

use crate::circuit::{CircuitId, NodeId};
use crate::error::{Error, Result};

const MAGIC_V2: &[u8; 7] = b"DBSPCP2";
const MAGIC_V1: &[u8; 7] = b"DBSPCP1";

/// One operator's entry in a manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorStateEntry {
    /// The operator the state belongs to.
    pub node: NodeId,
    /// The sibling file holding the serialized state.
    pub file_name: String,
    /// The state's size in bytes, as recorded at creation.
    pub size: i64,
}

/// A parsed checkpoint manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    /// The circuit the checkpoint belongs to.
    pub circuit: i64,
    /// The epoch the checkpoint captured.
    pub epoch: i64,
    /// The checkpoint's name.
    pub name: String,
    /// The operator state files.
    pub operators: Vec<OperatorStateEntry>,
}

impl Manifest {
    fn encode_payload(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.circuit.to_le_bytes());
        payload.extend_from_slice(&self.epoch.to_le_bytes());
        payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
        payload.extend_from_slice(name);
        payload.extend_from_slice(&(self.operators.len() as u32).to_le_bytes());
        for entry in self.operators.iter() {
            payload.extend_from_slice(&(entry.node.0 as i64).to_le_bytes());
            let file_name = entry.file_name.as_bytes();
            payload.extend_from_slice(&(file_name.len() as u16).to_le_bytes());
            payload.extend_from_slice(file_name);
            payload.extend_from_slice(&entry.size.to_le_bytes());
        }
        payload
    }

    fn decode_payload(payload: &[u8]) -> Result<Manifest> {
        let mut reader = PayloadReader { payload, pos: 0 };
        let circuit = reader.i64()?;
        let epoch = reader.i64()?;
        let name_len = reader.u16()? as usize;
        let name = reader.utf8(name_len)?;
        let op_count = reader.u32()? as usize;
        let mut operators = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            let node = NodeId(reader.i64()? as u64);
            let file_name_len = reader.u16()? as usize;
            let file_name = reader.utf8(file_name_len)?;
            let size = reader.i64()?;
            operators.push(OperatorStateEntry { node, file_name, size });
        }
        if reader.pos != payload.len() {
            return Err(Error::Persistence("manifest payload has trailing bytes".into()));
        }
        Ok(Manifest { circuit, epoch, name, operators })
    }
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.payload.len() {
            return Err(Error::Persistence("manifest payload truncated".into()));
        }
        let bytes = &self.payload[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    fn utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| Error::Persistence("manifest string is not UTF-8".into()))
    }
}

/// Creates and restores checkpoints under a root directory.
pub struct CheckpointManager {
    root: PathBuf,
}

impl CheckpointManager {
    /// A manager rooted at `root`, created if absent.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(CheckpointManager { root })
    }

    /// The directory a checkpoint at `epoch` occupies.
    pub fn checkpoint_dir(&self, epoch: i64) -> PathBuf {
        self.root.join(format!("cp_{epoch}"))
    }

    /// Writes operator states and the manifest for one checkpoint.
    pub fn create(
        &self,
        circuit: CircuitId,
        epoch: i64,
        name: &str,
        states: &[(NodeId, Vec<u8>)],
    ) -> Result<Manifest> {
        let dir = self.checkpoint_dir(epoch);
        fs::create_dir_all(&dir)?;

        let mut operators = Vec::with_capacity(states.len());
        for (node, bytes) in states {
            let file_name = format!("op_{}.bin", node.0);
            fs::write(dir.join(&file_name), bytes)?;
            operators.push(OperatorStateEntry {
                node: *node,
                file_name,
                size: bytes.len() as i64,
            });
        }

        let manifest =
            Manifest { circuit: circuit.0 as i64, epoch, name: name.to_string(), operators };
        let payload = manifest.encode_payload();
        let crc = crc32fast::hash(&payload);
        let mut framed = Vec::with_capacity(MAGIC_V2.len() + 8 + payload.len());
        framed.extend_from_slice(MAGIC_V2);
        framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        framed.extend_from_slice(&payload);
        framed.extend_from_slice(&crc.to_le_bytes());
        fs::write(dir.join("manifest.bin"), framed)?;

        tracing::debug!(epoch, name, operators = manifest.operators.len(), "checkpoint written");
        Ok(manifest)
    }

    /// Parses `manifest.bin`, accepting both the v2 and legacy v1 formats.
    pub fn read_manifest(&self, epoch: i64) -> Result<Manifest> {
        let path = self.checkpoint_dir(epoch).join("manifest.bin");
        if !path.exists() {
            return Err(Error::Persistence(format!("missing manifest {}", path.display())));
        }
        let bytes = fs::read(&path)?;
        Self::parse_manifest(&bytes)
    }

    fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
        if bytes.len() < 7 {
            return Err(Error::Persistence("manifest shorter than its magic".into()));
        }
        let (magic, rest) = bytes.split_at(7);
        let checked = match magic {
            m if m == MAGIC_V2 => true,
            m if m == MAGIC_V1 => false,
            _ => return Err(Error::Persistence("manifest has unknown magic".into())),
        };

        if rest.len() < 4 {
            return Err(Error::Persistence("manifest truncated before its length".into()));
        }
        let payload_len = u32::from_le_bytes(rest[..4].try_into().expect("4 bytes")) as usize;
        let expected = if checked { 4 + payload_len + 4 } else { 4 + payload_len };
        if rest.len() < expected {
            return Err(Error::Persistence("manifest payload truncated".into()));
        }
        let payload = &rest[4..4 + payload_len];
        if checked {
            let stored_crc = u32::from_le_bytes(
                rest[4 + payload_len..4 + payload_len + 4].try_into().expect("4 bytes"),
            );
            if crc32fast::hash(payload) != stored_crc {
                return Err(Error::Persistence("manifest crc mismatch".into()));
            }
        }
        Manifest::decode_payload(payload)
    }

    /// Reads a checkpoint's manifest and every present state file.
    ///
    /// Operators whose state file has gone missing are skipped, not fatal:
    /// the caller matches entries against its circuit by node id anyway.
    pub fn restore(&self, epoch: i64) -> Result<(Manifest, Vec<(NodeId, Vec<u8>)>)> {
        let manifest = self.read_manifest(epoch)?;
        let dir = self.checkpoint_dir(epoch);
        let mut states = Vec::with_capacity(manifest.operators.len());
        for entry in manifest.operators.iter() {
            let path = dir.join(&entry.file_name);
            if !path.exists() {
                tracing::warn!(node = %entry.node, file = %entry.file_name, "state file missing; skipped");
                continue;
            }
            states.push((entry.node, fs::read(path)?));
        }
        Ok((manifest, states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, CheckpointManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("checkpoints")).unwrap();
        (dir, manager)
    }

    #[test]
    fn create_restore_round_trip() {
        let (_dir, manager) = manager();
        let states = vec![(NodeId(3), vec![1u8, 2, 3]), (NodeId(7), vec![9u8])];
        let written = manager.create(CircuitId(1), 42, "nightly", &states).unwrap();
        assert_eq!(written.operators.len(), 2);
        assert_eq!(written.operators[0].file_name, "op_3.bin");
        assert_eq!(written.operators[0].size, 3);

        let (manifest, restored) = manager.restore(42).unwrap();
        assert_eq!(manifest, written);
        assert_eq!(restored, states);
    }

    #[test]
    fn missing_manifest_is_a_persistence_error() {
        let (_dir, manager) = manager();
        assert!(matches!(manager.restore(9), Err(Error::Persistence(_))));
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let (_dir, manager) = manager();
        manager.create(CircuitId(1), 1, "cp", &[(NodeId(0), vec![5u8])]).unwrap();
        let path = manager.checkpoint_dir(1).join("manifest.bin");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(manager.restore(1), Err(Error::Persistence(_))));
    }

    #[test]
    fn legacy_v1_manifest_accepted() {
        let (_dir, manager) = manager();
        // Build a v1 manifest by hand: magic, length, payload, no CRC.
        let manifest = Manifest {
            circuit: 4,
            epoch: 8,
            name: "legacy".into(),
            operators: vec![OperatorStateEntry {
                node: NodeId(2),
                file_name: "op_2.bin".into(),
                size: 1,
            }],
        };
        let payload = manifest.encode_payload();
        let mut framed = Vec::new();
        framed.extend_from_slice(MAGIC_V1);
        framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        framed.extend_from_slice(&payload);

        let dir = manager.checkpoint_dir(8);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("manifest.bin"), framed).unwrap();
        fs::write(dir.join("op_2.bin"), [7u8]).unwrap();

        let (parsed, states) = manager.restore(8).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(states, vec![(NodeId(2), vec![7u8])]);
    }

    #[test]
    fn missing_state_files_are_skipped() {
        let (_dir, manager) = manager();
        manager
            .create(CircuitId(0), 2, "cp", &[(NodeId(1), vec![1u8]), (NodeId(2), vec![2u8])])
            .unwrap();
        fs::remove_file(manager.checkpoint_dir(2).join("op_1.bin")).unwrap();
        let (_, states) = manager.restore(2).unwrap();
        assert_eq!(states, vec![(NodeId(2), vec![2u8])]);
    }
}
