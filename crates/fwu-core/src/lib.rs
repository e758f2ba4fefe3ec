//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Remote firmware upgrade orchestration.
//!
//! [`UpgradeRuntime`] wires the pieces together from an [`AppConfig`]: the
//! hardware catalog and upgrader registry validate assignments in the
//! [`FirmwareService`], the [`UpgradeExecutor`] drives single operations,
//! the [`UpgradeScheduler`] runs them concurrently and the
//! [`BatchCoordinator`] propagates new builds across a fleet.

use std::sync::Arc;

use fwu_common::AppConfig;
use fwu_persistence::RecordStore;
use fwu_transport::TransportFactory;

pub mod batch;
pub mod catalog;
pub mod checksum;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod operation;
pub mod reconnect;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod upgrader;

pub use batch::{compare_builds, parse_version, BatchCoordinator, PlannedBatch};
pub use catalog::{HardwareCatalog, HardwareEntry};
pub use checksum::{ChecksumState, ChecksumVerifier};
pub use error::{Result, UpgradeError};
pub use executor::UpgradeExecutor;
pub use metrics::{new_registry, SharedRegistry, UpgradeMetrics};
pub use operation::OperationLog;
pub use reconnect::{ReconnectLoop, ReconnectOutcome, ReconnectPolicy};
pub use retry::RetryPolicy;
pub use scheduler::UpgradeScheduler;
pub use service::FirmwareService;
pub use upgrader::{CommandSet, UpgraderRegistry, OPENWRT};

/// Fully wired upgrade stack sharing one store and one transport factory.
pub struct UpgradeRuntime {
    pub service: Arc<FirmwareService>,
    pub executor: Arc<UpgradeExecutor>,
    pub scheduler: Arc<UpgradeScheduler>,
    pub coordinator: BatchCoordinator,
}

impl UpgradeRuntime {
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn RecordStore>,
        transports: Arc<dyn TransportFactory>,
        metrics: Option<UpgradeMetrics>,
    ) -> Self {
        let catalog = Arc::new(HardwareCatalog::from_config(&config.hardware));
        let upgraders = Arc::new(UpgraderRegistry::from_config(&config.upgraders));
        let mut executor =
            UpgradeExecutor::new(store.clone(), transports, upgraders.clone(), &config.upgrade);
        if let Some(metrics) = metrics {
            executor = executor.with_metrics(metrics);
        }
        Self::assemble(
            FirmwareService::new(store, catalog, upgraders),
            executor,
        )
    }

    /// Wire a runtime from parts built by the caller.
    pub fn assemble(service: FirmwareService, executor: UpgradeExecutor) -> Self {
        let service = Arc::new(service);
        let executor = Arc::new(executor);
        let scheduler = Arc::new(UpgradeScheduler::new(executor.clone()));
        let coordinator = BatchCoordinator::new(service.clone(), scheduler.clone());
        Self {
            service,
            executor,
            scheduler,
            coordinator,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.service.store()
    }
}
