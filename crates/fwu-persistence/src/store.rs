//! ---
//! fwu_section: "03-persistence-logging"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Record storage abstractions and the operation journal."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Record store interface and its in-memory implementation.

use std::path::Path;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::journal::{JournalEvent, JournalWriter};
use crate::model::{
    BatchUpgradeOperation, Build, Category, Device, DeviceConnection, DeviceFirmware,
    FirmwareImage, LogLine, OperationStatus, UpgradeOperation,
};
use crate::{Result, StoreError};

/// Query/save operations over upgrade records.
///
/// Log appends and status transitions must be durable once the call returns.
pub trait RecordStore: Send + Sync {
    /// Insert or replace a category.
    fn save_category(&self, category: Category) -> Result<()>;
    /// Fetch a category.
    fn category(&self, id: &str) -> Result<Category>;

    /// Insert or replace a build.
    fn save_build(&self, build: Build) -> Result<()>;
    /// Fetch a build.
    fn build(&self, id: &str) -> Result<Build>;
    /// Builds of a category, in insertion order.
    fn builds_in_category(&self, category: &str) -> Result<Vec<Build>>;
    /// Delete a build together with its images.
    fn delete_build(&self, id: &str) -> Result<()>;

    /// Store a new image; images are immutable once stored.
    fn save_image(&self, image: FirmwareImage) -> Result<()>;
    /// Fetch an image.
    fn image(&self, id: &str) -> Result<FirmwareImage>;
    /// Images attached to a build.
    fn images_for_build(&self, build: &str) -> Result<Vec<FirmwareImage>>;

    /// Insert or replace a device.
    fn save_device(&self, device: Device) -> Result<()>;
    /// Fetch a device.
    fn device(&self, id: &str) -> Result<Device>;
    /// Devices of an organization.
    fn devices_in_organization(&self, organization: &str) -> Result<Vec<Device>>;

    /// Insert or replace a management connection.
    fn save_connection(&self, connection: DeviceConnection) -> Result<()>;
    /// Connections of a device.
    fn connections_for_device(&self, device: &str) -> Result<Vec<DeviceConnection>>;

    /// Insert or replace a device firmware record.
    fn save_device_firmware(&self, firmware: DeviceFirmware) -> Result<()>;
    /// Fetch a device firmware record.
    fn device_firmware(&self, id: &str) -> Result<DeviceFirmware>;
    /// Firmware record of a device, if any.
    fn firmware_for_device(&self, device: &str) -> Result<Option<DeviceFirmware>>;
    /// Every device firmware record.
    fn device_firmwares(&self) -> Result<Vec<DeviceFirmware>>;

    /// Store a new operation.
    fn create_operation(&self, operation: UpgradeOperation) -> Result<()>;
    /// Fetch an operation.
    fn operation(&self, id: Uuid) -> Result<UpgradeOperation>;
    /// Every operation, in creation order.
    fn operations(&self) -> Result<Vec<UpgradeOperation>>;
    /// Append a log line to an operation.
    fn append_log(&self, id: Uuid, line: LogLine) -> Result<()>;
    /// Move an in-progress operation to `status`.
    fn set_status(&self, id: Uuid, status: OperationStatus) -> Result<()>;

    /// Insert or replace a batch.
    fn save_batch(&self, batch: BatchUpgradeOperation) -> Result<()>;
    /// Fetch a batch.
    fn batch(&self, id: Uuid) -> Result<BatchUpgradeOperation>;
}

#[derive(Default)]
struct Tables {
    categories: IndexMap<String, Category>,
    builds: IndexMap<String, Build>,
    images: IndexMap<String, FirmwareImage>,
    devices: IndexMap<String, Device>,
    connections: IndexMap<String, DeviceConnection>,
    firmwares: IndexMap<String, DeviceFirmware>,
    operations: IndexMap<Uuid, UpgradeOperation>,
    batches: IndexMap<Uuid, BatchUpgradeOperation>,
}

/// In-memory record store, optionally journaling operation changes to disk.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    journal: Option<Mutex<JournalWriter>>,
}

impl MemoryStore {
    /// Create an empty, non-journaled store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store journaling operation changes to `path`.
    pub fn with_journal(path: &Path) -> Result<Self> {
        let writer = JournalWriter::open(path)?;
        debug!(journal = %path.display(), "operation journal opened");
        Ok(Self {
            tables: RwLock::default(),
            journal: Some(Mutex::new(writer)),
        })
    }

    fn record(&self, event: JournalEvent) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.lock().append(event)?;
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn save_category(&self, category: Category) -> Result<()> {
        self.tables
            .write()
            .categories
            .insert(category.id.clone(), category);
        Ok(())
    }

    fn category(&self, id: &str) -> Result<Category> {
        self.tables
            .read()
            .categories
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("category", id))
    }

    fn save_build(&self, build: Build) -> Result<()> {
        self.tables.write().builds.insert(build.id.clone(), build);
        Ok(())
    }

    fn build(&self, id: &str) -> Result<Build> {
        self.tables
            .read()
            .builds
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("build", id))
    }

    fn builds_in_category(&self, category: &str) -> Result<Vec<Build>> {
        Ok(self
            .tables
            .read()
            .builds
            .values()
            .filter(|build| build.category == category)
            .cloned()
            .collect())
    }

    fn delete_build(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.builds.shift_remove(id).is_none() {
            return Err(StoreError::not_found("build", id));
        }
        tables.images.retain(|_, image| image.build != id);
        Ok(())
    }

    fn save_image(&self, image: FirmwareImage) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.builds.contains_key(&image.build) {
            return Err(StoreError::not_found("build", &image.build));
        }
        if let Some(existing) = tables.images.get(&image.id) {
            if existing.checksum != image.checksum {
                return Err(StoreError::Conflict(format!(
                    "image '{}' content is immutable",
                    image.id
                )));
            }
        }
        tables.images.insert(image.id.clone(), image);
        Ok(())
    }

    fn image(&self, id: &str) -> Result<FirmwareImage> {
        self.tables
            .read()
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("image", id))
    }

    fn images_for_build(&self, build: &str) -> Result<Vec<FirmwareImage>> {
        Ok(self
            .tables
            .read()
            .images
            .values()
            .filter(|image| image.build == build)
            .cloned()
            .collect())
    }

    fn save_device(&self, device: Device) -> Result<()> {
        self.tables.write().devices.insert(device.id.clone(), device);
        Ok(())
    }

    fn device(&self, id: &str) -> Result<Device> {
        self.tables
            .read()
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("device", id))
    }

    fn devices_in_organization(&self, organization: &str) -> Result<Vec<Device>> {
        Ok(self
            .tables
            .read()
            .devices
            .values()
            .filter(|device| device.organization == organization)
            .cloned()
            .collect())
    }

    fn save_connection(&self, connection: DeviceConnection) -> Result<()> {
        self.tables
            .write()
            .connections
            .insert(connection.id.clone(), connection);
        Ok(())
    }

    fn connections_for_device(&self, device: &str) -> Result<Vec<DeviceConnection>> {
        Ok(self
            .tables
            .read()
            .connections
            .values()
            .filter(|connection| connection.device == device)
            .cloned()
            .collect())
    }

    fn save_device_firmware(&self, firmware: DeviceFirmware) -> Result<()> {
        let mut tables = self.tables.write();
        let duplicate = tables
            .firmwares
            .values()
            .any(|existing| existing.device == firmware.device && existing.id != firmware.id);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "device '{}' already has a firmware record",
                firmware.device
            )));
        }
        tables.firmwares.insert(firmware.id.clone(), firmware);
        Ok(())
    }

    fn device_firmware(&self, id: &str) -> Result<DeviceFirmware> {
        self.tables
            .read()
            .firmwares
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("device firmware", id))
    }

    fn firmware_for_device(&self, device: &str) -> Result<Option<DeviceFirmware>> {
        Ok(self
            .tables
            .read()
            .firmwares
            .values()
            .find(|firmware| firmware.device == device)
            .cloned())
    }

    fn device_firmwares(&self) -> Result<Vec<DeviceFirmware>> {
        Ok(self.tables.read().firmwares.values().cloned().collect())
    }

    fn create_operation(&self, operation: UpgradeOperation) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.operations.contains_key(&operation.id) {
            return Err(StoreError::Conflict(format!(
                "operation {} already exists",
                operation.id
            )));
        }
        self.record(JournalEvent::OperationCreated {
            operation: operation.clone(),
        })?;
        tables.operations.insert(operation.id, operation);
        Ok(())
    }

    fn operation(&self, id: Uuid) -> Result<UpgradeOperation> {
        self.tables
            .read()
            .operations
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("operation", id))
    }

    fn operations(&self) -> Result<Vec<UpgradeOperation>> {
        Ok(self.tables.read().operations.values().cloned().collect())
    }

    fn append_log(&self, id: Uuid, line: LogLine) -> Result<()> {
        let mut tables = self.tables.write();
        let operation = tables
            .operations
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("operation", id))?;
        self.record(JournalEvent::LogAppended {
            operation: id,
            line: line.clone(),
        })?;
        operation.modified = line.timestamp;
        operation.log.push(line);
        Ok(())
    }

    fn set_status(&self, id: Uuid, status: OperationStatus) -> Result<()> {
        let mut tables = self.tables.write();
        let operation = tables
            .operations
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("operation", id))?;
        if operation.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "operation {id} already finished as {}",
                operation.status
            )));
        }
        let at = Utc::now();
        self.record(JournalEvent::StatusChanged {
            operation: id,
            status,
            at,
        })?;
        operation.status = status;
        operation.modified = at;
        Ok(())
    }

    fn save_batch(&self, batch: BatchUpgradeOperation) -> Result<()> {
        self.tables.write().batches.insert(batch.id, batch);
        Ok(())
    }

    fn batch(&self, id: Uuid) -> Result<BatchUpgradeOperation> {
        self.tables
            .read()
            .batches
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("batch", id))
    }
}
