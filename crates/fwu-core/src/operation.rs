//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::Utc;
use fwu_logging::{fwu_info, log_operation_event, LogContext, OperationOutcome};
use fwu_persistence::{LogLine, OperationStatus, RecordStore, StoreError, UpgradeOperation};
use uuid::Uuid;

use crate::error::{Result, UpgradeError};

/// Append/finish handle over one persisted upgrade operation.
///
/// Every line is written through the record store before the call returns,
/// and mirrored as a tracing event carrying the device and operation ids.
pub struct OperationLog {
    store: Arc<dyn RecordStore>,
    id: Uuid,
    id_text: String,
    device: String,
}

impl OperationLog {
    pub fn open(store: Arc<dyn RecordStore>, operation: &UpgradeOperation) -> Self {
        Self {
            store,
            id: operation.id,
            id_text: operation.id.to_string(),
            device: operation.device.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_device(&self.device)
            .with_operation(&self.id_text)
    }

    pub fn append(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        fwu_info!(context = self.context(), "{}", message);
        self.store.append_log(
            self.id,
            LogLine {
                timestamp: Utc::now(),
                message,
            },
        )?;
        Ok(())
    }

    pub fn status(&self) -> Result<OperationStatus> {
        Ok(self.store.operation(self.id)?.status)
    }

    pub fn snapshot(&self) -> Result<UpgradeOperation> {
        Ok(self.store.operation(self.id)?)
    }

    /// Move the operation to its terminal `status`; succeeds at most once.
    pub fn finish(&self, status: OperationStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(UpgradeError::configuration(format!(
                "{status} is not a terminal operation status"
            )));
        }
        if self.status()?.is_terminal() {
            return Err(UpgradeError::AlreadyTerminal(self.id));
        }
        match self.store.set_status(self.id, status) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(UpgradeError::AlreadyTerminal(self.id)),
            Err(err) => return Err(err.into()),
        }
        let outcome = match status {
            OperationStatus::Success => OperationOutcome::Success,
            OperationStatus::Aborted => OperationOutcome::Aborted,
            _ => OperationOutcome::Fault,
        };
        log_operation_event(
            Some(&self.context()),
            "upgrade.finished",
            &format!("operation finished as {status}"),
            outcome,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwu_persistence::{DeviceFirmware, MemoryStore};

    fn open() -> (Arc<MemoryStore>, OperationLog) {
        let store = Arc::new(MemoryStore::new());
        let operation = UpgradeOperation::new(&DeviceFirmware::new("fw-1", "dev-1", "img-1"), None);
        store.create_operation(operation.clone()).unwrap();
        let log = OperationLog::open(store.clone(), &operation);
        (store, log)
    }

    #[test]
    fn appends_are_persisted_in_order() {
        let (store, log) = open();
        log.append("first").unwrap();
        log.append("second").unwrap();
        assert_eq!(store.operation(log.id()).unwrap().log_text(), "first\nsecond");
    }

    #[test]
    fn finish_happens_exactly_once() {
        let (_store, log) = open();
        log.finish(OperationStatus::Success).unwrap();
        let err = log.finish(OperationStatus::Failed).unwrap_err();
        assert!(matches!(err, UpgradeError::AlreadyTerminal(id) if id == log.id()));
        assert_eq!(log.status().unwrap(), OperationStatus::Success);
    }

    #[test]
    fn in_progress_is_not_a_terminal_target() {
        let (_store, log) = open();
        assert!(log.finish(OperationStatus::InProgress).is_err());
    }
}
