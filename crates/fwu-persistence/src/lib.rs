//! ---
//! fwu_section: "03-persistence-logging"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Record storage abstractions and the operation journal."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Records describing builds, images, devices and upgrade operations, the
//! [`RecordStore`] interface over them, and an append-only journal that makes
//! operation log appends and status transitions durable.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record referenced by id does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Record kind, e.g. `device`.
        kind: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },
    /// Wrapper for IO errors encountered while reading/writing the journal.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The requested change contradicts the stored state.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub mod journal;
pub mod model;
pub mod store;

pub use journal::{replay_journal, JournalEntry, JournalEvent, JournalReader, JournalWriter};
pub use model::{
    BatchStatus, BatchSummary, BatchUpgradeOperation, Build, Category, Device, DeviceConnection,
    DeviceFirmware, FirmwareImage, LogLine, OperationStatus, UpgradeOperation,
};
pub use store::{MemoryStore, RecordStore};
