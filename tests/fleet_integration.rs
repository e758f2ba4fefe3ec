//! ---
//! fwu_section: "15-testing-qa-runbook"
//! fwu_subsection: "integration-tests"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Integration and validation tests for the FW-Upgrader stack."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use fwu_common::AppConfig;
use fwu_core::{new_registry, UpgradeMetrics, UpgradeRuntime};
use fwu_persistence::{
    replay_journal, BatchStatus, Build, Category, Device, DeviceConnection, DeviceFirmware,
    MemoryStore, OperationStatus, RecordStore,
};
use fwu_transport::{SimulatedDevice, SimulatedFleet};

const CONFIG: &str = r#"
[upgrade]
max_attempts = 3
retry_base_delay = 0
retry_jitter = 0
command_timeout = 5
flash_timeout = 5

[upgrade.reconnect]
settle_delay = 0
interval = 0
max_attempts = 4

[[hardware]]
image_type = "ath79-generic-tplink_archer-c7-v5-squashfs-sysupgrade.bin"
label = "TP-Link Archer C7 v5"
boards = ["TP-Link Archer C7 v5"]

[upgraders.lede]
upload_dir = "/var/tmp/"
checksum_file = "/etc/fwu/checksum"
test_command = "sysupgrade --test {path}"
flash_command = "sysupgrade -n {path}"
"#;

const ARCHER: &str = "ath79-generic-tplink_archer-c7-v5-squashfs-sysupgrade.bin";
const ARCHER_BOARD: &str = "TP-Link Archer C7 v5";

struct Deployment {
    store: Arc<MemoryStore>,
    fleet: Arc<SimulatedFleet>,
    metrics: UpgradeMetrics,
    runtime: UpgradeRuntime,
}

fn deploy(journal: &std::path::Path) -> Deployment {
    let config = AppConfig::from_str(CONFIG).expect("valid configuration");
    let store = Arc::new(MemoryStore::with_journal(journal).expect("journal opens"));
    let fleet = Arc::new(SimulatedFleet::new());
    let metrics = UpgradeMetrics::new(new_registry()).unwrap();
    let runtime =
        UpgradeRuntime::from_config(&config, store.clone(), fleet.clone(), Some(metrics.clone()));

    store.save_category(Category::new("c7", "org", "Archer C7")).unwrap();
    for (build, version) in [("c7-1", "1.0"), ("c7-2", "1.1")] {
        store.save_build(Build::new(build, "org", "c7", version)).unwrap();
        runtime
            .service
            .add_image(
                format!("{build}-img"),
                build,
                ARCHER,
                &format!("{build}.bin"),
                Bytes::from(format!("archer firmware {version}")),
            )
            .unwrap();
    }
    Deployment {
        store,
        fleet,
        metrics,
        runtime,
    }
}

fn enroll(deployment: &Deployment, id: &str, device: SimulatedDevice) -> Arc<SimulatedDevice> {
    deployment
        .store
        .save_device(Device::new(id, "org", id, "aa:bb:cc:dd:ee:ff", ARCHER_BOARD))
        .unwrap();
    deployment
        .store
        .save_connection(DeviceConnection::new(format!("{id}-conn"), id, "lede"))
        .unwrap();
    let mut firmware = DeviceFirmware::new(format!("{id}-fw"), id, "c7-1-img");
    firmware.installed = true;
    deployment
        .runtime
        .service
        .save_device_firmware(&mut firmware, false, None)
        .unwrap();
    deployment.fleet.insert(id, device)
}

#[tokio::test]
async fn configured_strategy_drives_fleet_rollout() {
    let dir = tempfile::tempdir().unwrap();
    let deployment = deploy(&dir.path().join("operations.jsonl"));
    let healthy = enroll(&deployment, "ap-1", SimulatedDevice::new("ap-1").reboot_outage(1));
    let lost = enroll(&deployment, "ap-2", SimulatedDevice::new("ap-2").reboot_outage(u32::MAX));

    let coordinator = &deployment.runtime.coordinator;
    let planned = coordinator.upgrade_related_devices("c7-2").unwrap();
    assert_eq!(planned.operations.len(), 2);
    let summary = coordinator.run(&planned).await.unwrap();

    assert_eq!(summary.success, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.status(), BatchStatus::Failed);

    let commands = healthy.commands();
    assert!(commands.contains(&"test -f /etc/fwu/checksum".to_owned()));
    assert!(commands.contains(&"sysupgrade --test /var/tmp/c7-2.bin".to_owned()));
    assert!(commands.contains(&"sysupgrade -n /var/tmp/c7-2.bin".to_owned()));
    assert!(commands.contains(&"mkdir -p /etc/fwu".to_owned()));
    let checksum = deployment.store.image("c7-2-img").unwrap().checksum;
    assert_eq!(
        healthy.file("/etc/fwu/checksum"),
        Some(format!("{checksum}\n").into_bytes())
    );

    assert_eq!(lost.connect_calls(), 1 + 4);
    let connection = deployment.store.connections_for_device("ap-2").unwrap().remove(0);
    assert_eq!(connection.is_working, Some(false));

    assert_eq!(deployment.metrics.operations(OperationStatus::Success), 1);
    assert_eq!(deployment.metrics.operations(OperationStatus::Failed), 1);
    assert_eq!(deployment.metrics.reconnect_attempts("connected"), 1);
    assert_eq!(deployment.metrics.reconnect_attempts("unreachable"), 1 + 4);
}

#[tokio::test]
async fn journal_replay_matches_live_records() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("operations.jsonl");
    let deployment = deploy(&journal);
    enroll(&deployment, "ap-1", SimulatedDevice::new("ap-1"));
    enroll(
        &deployment,
        "ap-2",
        SimulatedDevice::new("ap-2").fail_uploads(u32::MAX, "Invalid packet blocking"),
    );

    let coordinator = &deployment.runtime.coordinator;
    let planned = coordinator.upgrade_related_devices("c7-2").unwrap();
    coordinator.run(&planned).await.unwrap();

    let replayed = replay_journal(&journal).unwrap();
    let live = deployment.store.operations().unwrap();
    assert_eq!(replayed.len(), live.len());
    for operation in live {
        let restored = &replayed[&operation.id];
        assert_eq!(restored.status, operation.status);
        assert_eq!(restored.log_text(), operation.log_text());
    }
    let failed = replayed
        .values()
        .find(|operation| operation.device == "ap-2")
        .unwrap();
    assert_eq!(failed.status, OperationStatus::Failed);
    assert!(failed
        .log_text()
        .contains("Max retries exceeded. Upgrade failed: Invalid packet blocking."));
}

#[tokio::test]
async fn reopened_journal_continues_history() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("operations.jsonl");
    {
        let deployment = deploy(&journal);
        enroll(&deployment, "ap-1", SimulatedDevice::new("ap-1"));
        let planned = deployment
            .runtime
            .coordinator
            .upgrade_related_devices("c7-2")
            .unwrap();
        deployment.runtime.coordinator.run(&planned).await.unwrap();
    }
    {
        let deployment = deploy(&journal);
        enroll(&deployment, "ap-9", SimulatedDevice::new("ap-9"));
        let planned = deployment
            .runtime
            .coordinator
            .upgrade_related_devices("c7-2")
            .unwrap();
        deployment.runtime.coordinator.run(&planned).await.unwrap();
    }

    let replayed = replay_journal(&journal).unwrap();
    assert_eq!(replayed.len(), 2);
    assert!(replayed
        .values()
        .all(|operation| operation.status == OperationStatus::Success));
}
