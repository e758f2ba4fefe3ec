//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Propagation of a new build to every eligible device.

use std::cmp::Ordering;
use std::sync::Arc;

use fwu_persistence::{
    BatchStatus, BatchSummary, BatchUpgradeOperation, Build, DeviceFirmware, FirmwareImage,
    OperationStatus, RecordStore, StoreError, UpgradeOperation,
};
use indexmap::IndexMap;
use semver::Version;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, UpgradeError};
use crate::operation::OperationLog;
use crate::scheduler::UpgradeScheduler;
use crate::service::FirmwareService;

/// Parse a build version, padding missing components (`0.2` is `0.2.0`).
pub fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    let core_end = raw.find(|c: char| c == '-' || c == '+').unwrap_or(raw.len());
    let padding = match raw[..core_end].split('.').count() {
        1 => ".0.0",
        2 => ".0",
        _ => "",
    };
    let padded = format!("{}{}{}", &raw[..core_end], padding, &raw[core_end..]);
    Version::parse(&padded).ok()
}

/// Order builds by version, falling back to creation time.
pub fn compare_builds(a: &Build, b: &Build) -> Ordering {
    match (parse_version(&a.version), parse_version(&b.version)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => a.created.cmp(&b.created),
    }
}

/// A batch record together with the operations it groups.
#[derive(Debug, Clone)]
pub struct PlannedBatch {
    pub batch: BatchUpgradeOperation,
    pub operations: Vec<UpgradeOperation>,
}

/// Creates and runs batch upgrade operations.
pub struct BatchCoordinator {
    service: Arc<FirmwareService>,
    scheduler: Arc<UpgradeScheduler>,
}

impl BatchCoordinator {
    pub fn new(service: Arc<FirmwareService>, scheduler: Arc<UpgradeScheduler>) -> Self {
        Self { service, scheduler }
    }

    fn store(&self) -> &Arc<dyn RecordStore> {
        self.service.store()
    }

    /// Move devices running an older build of the same category to `build_id`.
    pub fn upgrade_related_devices(&self, build_id: &str) -> Result<PlannedBatch> {
        let build = self.store().build(build_id)?;
        let candidates = self.plan_related(&build)?;
        self.commit(&build, candidates)
    }

    /// Give firmware-less compatible devices their first assignment to `build_id`.
    pub fn upgrade_firmwareless_devices(&self, build_id: &str) -> Result<PlannedBatch> {
        let build = self.store().build(build_id)?;
        let candidates = self.plan_firmwareless(&build)?;
        self.commit(&build, candidates)
    }

    /// Both propagation modes into a single batch.
    pub fn upgrade_all(&self, build_id: &str) -> Result<PlannedBatch> {
        let build = self.store().build(build_id)?;
        let mut candidates = self.plan_related(&build)?;
        candidates.extend(self.plan_firmwareless(&build)?);
        self.commit(&build, candidates)
    }

    /// Execute every operation of `planned` and summarize the outcome.
    pub async fn run(&self, planned: &PlannedBatch) -> Result<BatchSummary> {
        let results = self.scheduler.run_all(&planned.operations).await;
        for (operation, result) in results {
            if let Err(err) = result {
                warn!(%operation, error = %err, "batch member did not run to completion");
            }
        }
        let summary = self.summary(planned.batch.id)?;
        info!(
            batch = %planned.batch.id,
            status = %summary.status(),
            success = summary.success,
            failed = summary.failed,
            aborted = summary.aborted,
            "batch upgrade finished"
        );
        Ok(summary)
    }

    pub fn summary(&self, batch_id: Uuid) -> Result<BatchSummary> {
        let batch = self.store().batch(batch_id)?;
        let statuses = batch
            .operations
            .iter()
            .map(|id| self.store().operation(*id).map(|operation| operation.status))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(BatchSummary::from_statuses(statuses))
    }

    pub fn status(&self, batch_id: Uuid) -> Result<BatchStatus> {
        Ok(self.summary(batch_id)?.status())
    }

    fn images_by_type(&self, build: &Build) -> Result<IndexMap<String, FirmwareImage>> {
        Ok(self
            .store()
            .images_for_build(&build.id)?
            .into_iter()
            .map(|image| (image.image_type.clone(), image))
            .collect())
    }

    /// Firmware records to move to `build`; nothing is written yet.
    fn plan_related(&self, build: &Build) -> Result<Vec<DeviceFirmware>> {
        let images = self.images_by_type(build)?;
        let mut candidates = Vec::new();
        for firmware in self.store().device_firmwares()? {
            let current = match self.store().image(&firmware.image) {
                Ok(image) => image,
                Err(StoreError::NotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            let current_build = match self.store().build(&current.build) {
                Ok(current_build) => current_build,
                Err(StoreError::NotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            if current_build.id == build.id
                || current_build.category != build.category
                || current_build.organization != build.organization
                || compare_builds(&current_build, build) != Ordering::Less
            {
                continue;
            }
            let Some(target) = images.get(&current.image_type) else {
                continue;
            };
            let mut firmware = firmware;
            firmware.mark_saved();
            firmware.assign(target.id.clone());
            if self.admit(&firmware)? {
                candidates.push(firmware);
            }
        }
        Ok(candidates)
    }

    fn plan_firmwareless(&self, build: &Build) -> Result<Vec<DeviceFirmware>> {
        let images = self.images_by_type(build)?;
        let mut candidates = Vec::new();
        for device in self.store().devices_in_organization(&build.organization)? {
            if self.store().firmware_for_device(&device.id)?.is_some() {
                continue;
            }
            let mut compatible = None;
            for image in images.values() {
                if self.service.boards(image)?.contains(&device.model) {
                    compatible = Some(image);
                    break;
                }
            }
            let Some(image) = compatible else {
                continue;
            };
            let firmware =
                DeviceFirmware::new(Uuid::new_v4().to_string(), device.id.clone(), image.id.clone());
            if self.admit(&firmware)? {
                candidates.push(firmware);
            }
        }
        Ok(candidates)
    }

    /// Whether `firmware` passes validation; invalid or dangling records are skipped.
    fn admit(&self, firmware: &DeviceFirmware) -> Result<bool> {
        match self.service.validate_assignment(firmware) {
            Ok(()) => Ok(true),
            Err(UpgradeError::Configuration(reason)) => {
                warn!(device = %firmware.device, %reason, "device skipped by batch upgrade");
                Ok(false)
            }
            Err(UpgradeError::Store(err @ StoreError::NotFound { .. })) => {
                warn!(
                    device = %firmware.device,
                    reason = %err,
                    "device skipped by batch upgrade"
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Persist the assignments of a fully planned batch.
    ///
    /// A store failure halfway aborts the operations created so far, so no
    /// in-progress operation is left outside a runnable batch.
    fn commit(&self, build: &Build, candidates: Vec<DeviceFirmware>) -> Result<PlannedBatch> {
        let mut planned = PlannedBatch {
            batch: BatchUpgradeOperation::new(build.id.clone()),
            operations: Vec::new(),
        };
        for mut firmware in candidates {
            match self
                .service
                .save_device_firmware(&mut firmware, true, Some(planned.batch.id))
            {
                Ok(Some(operation)) => {
                    planned.batch.operations.push(operation.id);
                    planned.operations.push(operation);
                }
                Ok(None) => {}
                Err(err) => {
                    self.abort_planned(&planned, &err);
                    return Err(err);
                }
            }
        }
        self.store().save_batch(planned.batch.clone())?;
        info!(
            batch = %planned.batch.id,
            build = %planned.batch.build,
            operations = planned.operations.len(),
            "batch upgrade planned"
        );
        Ok(planned)
    }

    fn abort_planned(&self, planned: &PlannedBatch, cause: &UpgradeError) {
        for operation in &planned.operations {
            let log = OperationLog::open(self.store().clone(), operation);
            let closed = log
                .append(format!("Batch upgrade could not be planned: {cause}"))
                .and_then(|()| log.finish(OperationStatus::Aborted));
            if let Err(err) = closed {
                warn!(operation = %operation.id, error = %err, "unable to abort planned operation");
            }
        }
        if let Err(err) = self.store().save_batch(planned.batch.clone()) {
            warn!(batch = %planned.batch.id, error = %err, "unable to save aborted batch");
        }
    }
}
