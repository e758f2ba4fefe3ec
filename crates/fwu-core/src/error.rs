//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use fwu_persistence::StoreError;
use fwu_transport::TransportError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, UpgradeError>;

/// Errors surfaced by the upgrade core.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Invalid assignment or missing device-type configuration.
    #[error("{0}")]
    Configuration(String),
    /// Record store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Another operation already runs for the device.
    #[error("device {0} already has an upgrade operation in progress")]
    DeviceBusy(String),
    /// The operation status was already final.
    #[error("operation {0} already reached a terminal status")]
    AlreadyTerminal(Uuid),
    /// Transport failure that escaped classification.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Prometheus registration failure.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl UpgradeError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
