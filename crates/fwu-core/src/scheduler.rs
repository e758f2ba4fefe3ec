//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use fwu_persistence::{OperationStatus, UpgradeOperation};
use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{Result, UpgradeError};
use crate::executor::UpgradeExecutor;
use crate::operation::OperationLog;

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Releases the device slot when the task ends, panics included.
struct InFlightGuard {
    devices: InFlight,
    device: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.devices.lock().remove(&self.device);
        debug!(device = %self.device, "device slot released");
    }
}

/// Spawns one task per operation, at most one per device.
pub struct UpgradeScheduler {
    executor: Arc<UpgradeExecutor>,
    in_flight: InFlight,
}

impl UpgradeScheduler {
    pub fn new(executor: Arc<UpgradeExecutor>) -> Self {
        Self {
            executor,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn executor(&self) -> &Arc<UpgradeExecutor> {
        &self.executor
    }

    pub fn is_busy(&self, device: &str) -> bool {
        self.in_flight.lock().contains(device)
    }

    /// Reserve the device of `operation`, aborting the operation if it is taken.
    fn claim(&self, operation: &UpgradeOperation) -> Result<InFlightGuard> {
        let claimed = self.in_flight.lock().insert(operation.device.clone());
        if !claimed {
            let log = OperationLog::open(self.executor.store().clone(), operation);
            log.append("Another upgrade operation is in progress for this device, aborting")?;
            log.finish(OperationStatus::Aborted)?;
            return Err(UpgradeError::DeviceBusy(operation.device.clone()));
        }
        Ok(InFlightGuard {
            devices: self.in_flight.clone(),
            device: operation.device.clone(),
        })
    }

    /// Spawn `operation` on the runtime.
    pub fn schedule(
        &self,
        operation: &UpgradeOperation,
    ) -> Result<JoinHandle<Result<OperationStatus>>> {
        let guard = self.claim(operation)?;
        let executor = self.executor.clone();
        let id = operation.id;
        Ok(tokio::spawn(async move {
            let _guard = guard;
            executor.execute(id).await
        }))
    }

    /// Run `operations` concurrently and collect each result.
    pub async fn run_all(
        &self,
        operations: &[UpgradeOperation],
    ) -> Vec<(Uuid, Result<OperationStatus>)> {
        let mut tasks = JoinSet::new();
        let mut results = Vec::with_capacity(operations.len());
        for operation in operations {
            match self.claim(operation) {
                Ok(guard) => {
                    let executor = self.executor.clone();
                    let id = operation.id;
                    tasks.spawn(async move {
                        let _guard = guard;
                        (id, executor.execute(id).await)
                    });
                }
                Err(err) => results.push((operation.id, Err(err))),
            }
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(error = %err, "upgrade task did not complete"),
            }
        }
        results
    }
}
