//! ---
//! fwu_section: "03-persistence-logging"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Record storage abstractions and the operation journal."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::{LogLine, OperationStatus, UpgradeOperation};
use crate::{Result, StoreError};

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Header stored as the first line of the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl JournalHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = hex::encode(Sha256::digest(created_at.to_rfc3339().as_bytes()));
        Self {
            version: JOURNAL_VERSION,
            created_at,
            hash,
        }
    }
}

/// Change recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    /// A new operation was scheduled.
    OperationCreated {
        /// Full operation record at creation.
        operation: UpgradeOperation,
    },
    /// A line was appended to an operation log.
    LogAppended {
        /// Operation id.
        operation: Uuid,
        /// Appended line.
        line: LogLine,
    },
    /// An operation reached a new status.
    StatusChanged {
        /// Operation id.
        operation: Uuid,
        /// New status.
        status: OperationStatus,
        /// Time of the transition.
        at: DateTime<Utc>,
    },
}

/// Journal line wrapping one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Recorded change.
    pub event: JournalEvent,
}

impl JournalEntry {
    /// Wrap `event`; the sequence is assigned by [`JournalWriter::append`].
    pub fn new(event: JournalEvent) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Append-only writer for the operation journal.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl JournalWriter {
    /// Open a journal for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        let next_sequence = if !exists || fs::metadata(path)?.len() == 0 {
            let line = serde_json::to_string(&JournalHeader::new())?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            0
        } else {
            last_sequence(path)?
        };

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append `event` and flush; returns the assigned sequence number.
    pub fn append(&mut self, event: JournalEvent) -> Result<u64> {
        let mut entry = JournalEntry::new(event);
        entry.sequence = self.next_sequence + 1;
        let line = serde_json::to_string(&entry)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.next_sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// Location of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut last = 0u64;
    for entry in JournalReader::open(path)? {
        last = entry?.sequence;
    }
    Ok(last)
}

/// Streaming iterator over journal entries.
pub struct JournalReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl JournalReader {
    /// Open the journal for sequential reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        if !header.trim().is_empty() {
            let header: JournalHeader = serde_json::from_str(&header)?;
            if header.version != JOURNAL_VERSION {
                return Err(StoreError::Conflict(format!(
                    "unsupported journal version {}",
                    header.version
                )));
            }
        }
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(serde_json::from_str(&line).map_err(StoreError::from)),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

/// Rebuild every journaled operation, in creation order.
pub fn replay_journal(path: &Path) -> Result<IndexMap<Uuid, UpgradeOperation>> {
    let mut operations: IndexMap<Uuid, UpgradeOperation> = IndexMap::new();
    for entry in JournalReader::open(path)? {
        let entry = entry?;
        match entry.event {
            JournalEvent::OperationCreated { operation } => {
                operations.insert(operation.id, operation);
            }
            JournalEvent::LogAppended { operation, line } => {
                let record = operations
                    .get_mut(&operation)
                    .ok_or_else(|| StoreError::not_found("operation", operation))?;
                record.modified = line.timestamp;
                record.log.push(line);
            }
            JournalEvent::StatusChanged {
                operation,
                status,
                at,
            } => {
                let record = operations
                    .get_mut(&operation)
                    .ok_or_else(|| StoreError::not_found("operation", operation))?;
                record.status = status;
                record.modified = at;
            }
        }
    }
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceFirmware;
    use tempfile::tempdir;

    fn line(message: &str) -> LogLine {
        LogLine {
            timestamp: Utc::now(),
            message: message.to_owned(),
        }
    }

    #[test]
    fn append_and_replay_operation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.jsonl");
        let firmware = DeviceFirmware::new("fw-1", "dev-1", "img-1");
        let operation = UpgradeOperation::new(&firmware, None);
        let id = operation.id;

        let mut writer = JournalWriter::open(&path).unwrap();
        writer
            .append(JournalEvent::OperationCreated { operation })
            .unwrap();
        writer
            .append(JournalEvent::LogAppended {
                operation: id,
                line: line("Upgrade completed successfully"),
            })
            .unwrap();
        writer
            .append(JournalEvent::StatusChanged {
                operation: id,
                status: OperationStatus::Success,
                at: Utc::now(),
            })
            .unwrap();

        let replayed = replay_journal(&path).unwrap();
        let record = &replayed[&id];
        assert_eq!(record.status, OperationStatus::Success);
        assert_eq!(record.log_text(), "Upgrade completed successfully");
    }

    #[test]
    fn reopening_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ops.jsonl");
        let firmware = DeviceFirmware::new("fw-1", "dev-1", "img-1");
        {
            let mut writer = JournalWriter::open(&path).unwrap();
            let operation = UpgradeOperation::new(&firmware, None);
            assert_eq!(
                writer
                    .append(JournalEvent::OperationCreated { operation })
                    .unwrap(),
                1
            );
        }
        let mut writer = JournalWriter::open(&path).unwrap();
        let operation = UpgradeOperation::new(&firmware, None);
        assert_eq!(
            writer
                .append(JournalEvent::OperationCreated { operation })
                .unwrap(),
            2
        );

        let sequences: Vec<_> = JournalReader::open(&path)
            .unwrap()
            .map(|entry| entry.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn replay_rejects_unknown_operation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.jsonl");
        let mut writer = JournalWriter::open(&path).unwrap();
        writer
            .append(JournalEvent::LogAppended {
                operation: Uuid::new_v4(),
                line: line("orphan"),
            })
            .unwrap();
        let err = replay_journal(&path).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "operation", .. }));
    }
}
