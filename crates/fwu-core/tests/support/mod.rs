#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fwu_common::{AppConfig, ReconnectConfig, UpgradeConfig};
use fwu_core::{UpgradeMetrics, UpgradeRuntime};
use fwu_persistence::{
    BatchUpgradeOperation, Build, Category, Device, DeviceConnection, DeviceFirmware,
    FirmwareImage, LogLine, MemoryStore, OperationStatus, RecordStore, StoreError,
    UpgradeOperation,
};
use uuid::Uuid;
use fwu_transport::{SimulatedDevice, SimulatedFleet};

pub const WDR4300: &str = "ar71xx-generic-tl-wdr4300-v1-squashfs-sysupgrade.bin";
pub const WDR4300_IL: &str = "ar71xx-generic-tl-wdr4300-v1-il-squashfs-sysupgrade.bin";
pub const BOARD: &str = "TP-LINK TL-WDR4300 v1";
pub const BOARD_IL: &str = "TP-LINK TL-WDR4300 v1 (IL)";
pub const CHECKSUM_FILE: &str = "/etc/openwisp/firmware_checksum";
pub const ORG: &str = "org-1";
pub const CATEGORY: &str = "cat-1";

/// Upgrade timings with every wait removed.
pub fn fast_config() -> UpgradeConfig {
    UpgradeConfig {
        max_attempts: 5,
        retry_base_delay: Duration::ZERO,
        retry_jitter: Duration::ZERO,
        command_timeout: Duration::from_secs(5),
        flash_timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig {
            settle_delay: Duration::ZERO,
            interval: Duration::ZERO,
            max_attempts: 10,
        },
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub fleet: Arc<SimulatedFleet>,
    pub metrics: UpgradeMetrics,
    pub runtime: UpgradeRuntime,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_upgrade(fast_config())
    }

    pub fn with_upgrade(upgrade: UpgradeConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(upgrade, store.clone(), store)
    }

    /// A fixture whose runtime writes through a [`FlakyStore`].
    pub fn flaky() -> (Self, Arc<FlakyStore>) {
        let store = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        (Self::assemble(fast_config(), store, flaky.clone()), flaky)
    }

    fn assemble(
        upgrade: UpgradeConfig,
        store: Arc<MemoryStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        let config = AppConfig {
            upgrade,
            ..AppConfig::default()
        };
        let fleet = Arc::new(SimulatedFleet::new());
        let metrics = UpgradeMetrics::new(fwu_core::new_registry()).unwrap();
        let runtime =
            UpgradeRuntime::from_config(&config, records, fleet.clone(), Some(metrics.clone()));
        store
            .save_category(Category::new(CATEGORY, ORG, "WDR4300 Router"))
            .unwrap();
        Self {
            store,
            fleet,
            metrics,
            runtime,
        }
    }

    pub fn add_build(&self, id: &str, version: &str) -> Build {
        let build = Build::new(id, ORG, CATEGORY, version);
        self.store.save_build(build.clone()).unwrap();
        build
    }

    pub fn add_image(&self, id: &str, build: &str, image_type: &str) -> FirmwareImage {
        self.runtime
            .service
            .add_image(
                id,
                build,
                image_type,
                &format!("{id}.bin"),
                Bytes::from(format!("firmware image {id}")),
            )
            .unwrap()
    }

    /// Register a device with an OpenWrt connection backed by `simulated`.
    pub fn add_device(&self, id: &str, board: &str, simulated: SimulatedDevice) -> Arc<SimulatedDevice> {
        self.add_bare_device(id, board);
        self.store
            .save_connection(DeviceConnection::new(format!("conn-{id}"), id, "openwrt"))
            .unwrap();
        self.fleet.insert(id, simulated)
    }

    /// Register a device without any management connection.
    pub fn add_bare_device(&self, id: &str, board: &str) {
        self.store
            .save_device(Device::new(id, ORG, id, "00:11:22:33:44:55", board))
            .unwrap();
    }

    /// Assign `image` to `device`, returning the scheduled operation.
    pub fn assign(&self, device: &str, image: &str) -> UpgradeOperation {
        self.save_firmware(device, image, true)
            .expect("image change schedules an operation")
    }

    /// Assign `image` to `device` without scheduling an upgrade.
    pub fn preassign(&self, device: &str, image: &str) {
        self.save_firmware(device, image, false);
    }

    fn save_firmware(&self, device: &str, image: &str, upgrade: bool) -> Option<UpgradeOperation> {
        let mut firmware = match self.store.firmware_for_device(device).unwrap() {
            Some(mut existing) => {
                existing.mark_saved();
                existing.assign(image);
                existing
            }
            None => DeviceFirmware::new(format!("fw-{device}"), device, image),
        };
        self.runtime
            .service
            .save_device_firmware(&mut firmware, upgrade, None)
            .unwrap()
    }

    pub async fn execute(&self, operation: &UpgradeOperation) -> OperationStatus {
        self.runtime.executor.execute(operation.id).await.unwrap()
    }

    pub fn operation(&self, operation: &UpgradeOperation) -> UpgradeOperation {
        self.store.operation(operation.id).unwrap()
    }

    pub fn connection(&self, device: &str) -> DeviceConnection {
        self.store
            .connections_for_device(device)
            .unwrap()
            .remove(0)
    }

    pub fn firmware(&self, device: &str) -> DeviceFirmware {
        self.store.firmware_for_device(device).unwrap().unwrap()
    }
}

fn disk_full() -> StoreError {
    StoreError::Io(std::io::Error::other("disk full"))
}

/// Memory store whose writes can be made to fail on demand.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    firmware_saves_fail: AtomicBool,
    connection_saves_fail: AtomicBool,
    operation_creates_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            firmware_saves_fail: AtomicBool::new(false),
            connection_saves_fail: AtomicBool::new(false),
            operation_creates_left: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn fail_firmware_saves(&self) {
        self.firmware_saves_fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_connection_saves(&self) {
        self.connection_saves_fail.store(true, Ordering::SeqCst);
    }

    /// Allow `count` more operations to be created, then fail.
    pub fn limit_operation_creates(&self, count: usize) {
        self.operation_creates_left.store(count, Ordering::SeqCst);
    }
}

type StoreResult<T> = fwu_persistence::Result<T>;

impl RecordStore for FlakyStore {
    fn save_category(&self, category: Category) -> StoreResult<()> {
        self.inner.save_category(category)
    }

    fn category(&self, id: &str) -> StoreResult<Category> {
        self.inner.category(id)
    }

    fn save_build(&self, build: Build) -> StoreResult<()> {
        self.inner.save_build(build)
    }

    fn build(&self, id: &str) -> StoreResult<Build> {
        self.inner.build(id)
    }

    fn builds_in_category(&self, category: &str) -> StoreResult<Vec<Build>> {
        self.inner.builds_in_category(category)
    }

    fn delete_build(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_build(id)
    }

    fn save_image(&self, image: FirmwareImage) -> StoreResult<()> {
        self.inner.save_image(image)
    }

    fn image(&self, id: &str) -> StoreResult<FirmwareImage> {
        self.inner.image(id)
    }

    fn images_for_build(&self, build: &str) -> StoreResult<Vec<FirmwareImage>> {
        self.inner.images_for_build(build)
    }

    fn save_device(&self, device: Device) -> StoreResult<()> {
        self.inner.save_device(device)
    }

    fn device(&self, id: &str) -> StoreResult<Device> {
        self.inner.device(id)
    }

    fn devices_in_organization(&self, organization: &str) -> StoreResult<Vec<Device>> {
        self.inner.devices_in_organization(organization)
    }

    fn save_connection(&self, connection: DeviceConnection) -> StoreResult<()> {
        if self.connection_saves_fail.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.save_connection(connection)
    }

    fn connections_for_device(&self, device: &str) -> StoreResult<Vec<DeviceConnection>> {
        self.inner.connections_for_device(device)
    }

    fn save_device_firmware(&self, firmware: DeviceFirmware) -> StoreResult<()> {
        if self.firmware_saves_fail.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.save_device_firmware(firmware)
    }

    fn device_firmware(&self, id: &str) -> StoreResult<DeviceFirmware> {
        self.inner.device_firmware(id)
    }

    fn firmware_for_device(&self, device: &str) -> StoreResult<Option<DeviceFirmware>> {
        self.inner.firmware_for_device(device)
    }

    fn device_firmwares(&self) -> StoreResult<Vec<DeviceFirmware>> {
        self.inner.device_firmwares()
    }

    fn create_operation(&self, operation: UpgradeOperation) -> StoreResult<()> {
        let allowed = self
            .operation_creates_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(disk_full());
        }
        self.inner.create_operation(operation)
    }

    fn operation(&self, id: Uuid) -> StoreResult<UpgradeOperation> {
        self.inner.operation(id)
    }

    fn operations(&self) -> StoreResult<Vec<UpgradeOperation>> {
        self.inner.operations()
    }

    fn append_log(&self, id: Uuid, line: LogLine) -> StoreResult<()> {
        self.inner.append_log(id, line)
    }

    fn set_status(&self, id: Uuid, status: OperationStatus) -> StoreResult<()> {
        self.inner.set_status(id, status)
    }

    fn save_batch(&self, batch: BatchUpgradeOperation) -> StoreResult<()> {
        self.inner.save_batch(batch)
    }

    fn batch(&self, id: Uuid) -> StoreResult<BatchUpgradeOperation> {
        self.inner.batch(id)
    }
}
