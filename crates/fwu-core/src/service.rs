//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Image registration and firmware assignment rules.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use fwu_persistence::{DeviceFirmware, FirmwareImage, RecordStore, UpgradeOperation};
use tracing::info;
use uuid::Uuid;

use crate::catalog::HardwareCatalog;
use crate::checksum;
use crate::error::{Result, UpgradeError};
use crate::upgrader::UpgraderRegistry;

/// Validates assignments and turns image changes into upgrade operations.
pub struct FirmwareService {
    store: Arc<dyn RecordStore>,
    catalog: Arc<HardwareCatalog>,
    upgraders: Arc<UpgraderRegistry>,
}

impl FirmwareService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        catalog: Arc<HardwareCatalog>,
        upgraders: Arc<UpgraderRegistry>,
    ) -> Self {
        Self {
            store,
            catalog,
            upgraders,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn catalog(&self) -> &HardwareCatalog {
        &self.catalog
    }

    /// Store a new image of `build`, hashing its content.
    ///
    /// Rejected with a configuration error when `image_type` has no known boards.
    pub fn add_image(
        &self,
        id: impl Into<String>,
        build: &str,
        image_type: &str,
        file_name: &str,
        content: Bytes,
    ) -> Result<FirmwareImage> {
        self.catalog.boards(image_type)?;
        let image = FirmwareImage {
            id: id.into(),
            build: build.to_owned(),
            image_type: image_type.to_owned(),
            file_name: file_name.to_owned(),
            checksum: checksum::compute(&content),
            content,
            created: Utc::now(),
        };
        self.store.save_image(image.clone())?;
        Ok(image)
    }

    /// Compatible boards of an image.
    pub fn boards(&self, image: &FirmwareImage) -> Result<&[String]> {
        self.catalog.boards(&image.image_type)
    }

    /// Check that `firmware` may be saved.
    pub fn validate_assignment(&self, firmware: &DeviceFirmware) -> Result<()> {
        let device = self.store.device(&firmware.device)?;
        let image = self.store.image(&firmware.image)?;
        let build = self.store.build(&image.build)?;
        if build.organization != device.organization {
            return Err(UpgradeError::configuration(format!(
                "image {} belongs to another organization than device {}",
                image.file_name, device.name
            )));
        }
        if !self.catalog.is_compatible(&image.image_type, &device.model)? {
            return Err(UpgradeError::configuration(format!(
                "device model and image model do not match ({} is not one of {})",
                device.model,
                self.catalog.boards(&image.image_type)?.join(", ")
            )));
        }
        let connection = self
            .store
            .connections_for_device(&device.id)?
            .into_iter()
            .find(|connection| connection.enabled)
            .ok_or_else(|| {
                UpgradeError::configuration(format!(
                    "device {} has no related connection",
                    device.name
                ))
            })?;
        self.upgraders.get(&connection.update_strategy)?;
        Ok(())
    }

    /// Validate and persist `firmware`.
    ///
    /// When `upgrade` is set and the image changed since the last save, a new
    /// in-progress operation is created (inside `batch`, if given) and returned.
    pub fn save_device_firmware(
        &self,
        firmware: &mut DeviceFirmware,
        upgrade: bool,
        batch: Option<Uuid>,
    ) -> Result<Option<UpgradeOperation>> {
        self.validate_assignment(firmware)?;
        let changed = firmware.image_changed();
        self.store.save_device_firmware(firmware.clone())?;
        firmware.mark_saved();
        if !(upgrade && changed) {
            return Ok(None);
        }
        let operation = UpgradeOperation::new(firmware, batch);
        self.store.create_operation(operation.clone())?;
        info!(
            device = %firmware.device,
            image = %firmware.image,
            operation = %operation.id,
            "upgrade operation scheduled"
        );
        Ok(Some(operation))
    }

    /// Load the firmware record `id` with its change tracking primed.
    pub fn load_device_firmware(&self, id: &str) -> Result<DeviceFirmware> {
        let mut firmware = self.store.device_firmware(id)?;
        firmware.mark_saved();
        Ok(firmware)
    }
}
