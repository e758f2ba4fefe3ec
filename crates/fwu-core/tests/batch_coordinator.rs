mod support;

use fwu_core::UpgradeError;
use fwu_persistence::{BatchStatus, DeviceFirmware, OperationStatus, RecordStore};
use fwu_transport::SimulatedDevice;
use support::{Fixture, BOARD, BOARD_IL, CHECKSUM_FILE, WDR4300, WDR4300_IL};

/// Two devices of different hardware running build 0.1, plus build 0.2 ready.
fn fleet_on_first_build() -> Fixture {
    let fixture = Fixture::new();
    seed_first_build(&fixture);
    fixture
}

fn seed_first_build(fixture: &Fixture) {
    fixture.add_build("build-1", "0.1");
    fixture.add_image("img-1", "build-1", WDR4300);
    fixture.add_image("img-1-il", "build-1", WDR4300_IL);
    fixture.add_build("build-2", "0.2");
    fixture.add_image("img-2", "build-2", WDR4300);
    fixture.add_image("img-2-il", "build-2", WDR4300_IL);
    fixture.add_device("dev-1", BOARD, SimulatedDevice::new("ap-1"));
    fixture.add_device("dev-2", BOARD_IL, SimulatedDevice::new("ap-2"));
    fixture.preassign("dev-1", "img-1");
    fixture.preassign("dev-2", "img-1-il");
}

#[tokio::test]
async fn related_devices_move_to_matching_image_type() {
    let fixture = fleet_on_first_build();
    assert!(fixture.store.operations().unwrap().is_empty());

    let coordinator = &fixture.runtime.coordinator;
    let planned = coordinator.upgrade_related_devices("build-2").unwrap();

    assert_eq!(planned.operations.len(), 2);
    assert_eq!(planned.batch.operations.len(), 2);
    assert!(planned
        .operations
        .iter()
        .all(|operation| operation.batch == Some(planned.batch.id)));
    assert_eq!(fixture.firmware("dev-1").image, "img-2");
    assert_eq!(fixture.firmware("dev-2").image, "img-2-il");
    assert_eq!(
        coordinator.status(planned.batch.id).unwrap(),
        BatchStatus::InProgress
    );

    let summary = coordinator.run(&planned).await.unwrap();
    assert_eq!(summary.success, 2);
    assert_eq!(summary.status(), BatchStatus::Success);
    assert!(fixture.firmware("dev-1").installed);
    assert!(fixture.firmware("dev-2").installed);

    let checksum = fixture.store.image("img-2-il").unwrap().checksum;
    let device = fixture.fleet.get("dev-2").unwrap();
    assert_eq!(
        device.file(CHECKSUM_FILE),
        Some(format!("{checksum}\n").into_bytes())
    );
}

#[tokio::test]
async fn devices_on_newer_builds_are_left_alone() {
    let fixture = fleet_on_first_build();
    let coordinator = &fixture.runtime.coordinator;
    let forward = coordinator.upgrade_related_devices("build-2").unwrap();
    coordinator.run(&forward).await.unwrap();

    let backward = coordinator.upgrade_related_devices("build-1").unwrap();

    assert!(backward.operations.is_empty());
    assert_eq!(
        coordinator.status(backward.batch.id).unwrap(),
        BatchStatus::Idle
    );
    assert_eq!(fixture.firmware("dev-1").image, "img-2");
}

#[tokio::test]
async fn devices_of_other_categories_are_left_alone() {
    let fixture = fleet_on_first_build();
    fixture
        .store
        .save_category(fwu_persistence::Category::new("cat-2", support::ORG, "Other"))
        .unwrap();
    fixture
        .store
        .save_build(fwu_persistence::Build::new(
            "other-2",
            support::ORG,
            "cat-2",
            "9.0",
        ))
        .unwrap();
    fixture.add_image("other-img", "other-2", WDR4300);

    let planned = fixture
        .runtime
        .coordinator
        .upgrade_related_devices("other-2")
        .unwrap();

    assert!(planned.operations.is_empty());
    assert_eq!(fixture.firmware("dev-1").image, "img-1");
}

#[tokio::test]
async fn firmwareless_devices_get_first_assignment() {
    let fixture = Fixture::new();
    fixture.add_build("build-1", "0.1");
    fixture.add_image("img-1", "build-1", WDR4300);
    fixture.add_image("img-1-il", "build-1", WDR4300_IL);
    fixture.add_device("dev-1", BOARD, SimulatedDevice::new("ap-1"));
    fixture.add_device("dev-2", BOARD_IL, SimulatedDevice::new("ap-2"));
    fixture.add_device("dev-3", "Ubiquiti Nanostation M5", SimulatedDevice::new("ap-3"));
    fixture.add_bare_device("dev-4", BOARD);

    let coordinator = &fixture.runtime.coordinator;
    let planned = coordinator.upgrade_firmwareless_devices("build-1").unwrap();

    assert_eq!(planned.operations.len(), 2);
    assert_eq!(fixture.firmware("dev-1").image, "img-1");
    assert_eq!(fixture.firmware("dev-2").image, "img-1-il");
    assert!(fixture.store.firmware_for_device("dev-3").unwrap().is_none());
    assert!(fixture.store.firmware_for_device("dev-4").unwrap().is_none());

    let summary = coordinator.run(&planned).await.unwrap();
    assert_eq!(summary.success, 2);
}

#[tokio::test]
async fn upgrade_all_combines_both_modes() {
    let fixture = fleet_on_first_build();
    fixture.add_device("dev-new", BOARD, SimulatedDevice::new("ap-new"));

    let planned = fixture.runtime.coordinator.upgrade_all("build-2").unwrap();

    assert_eq!(planned.operations.len(), 3);
    assert_eq!(fixture.firmware("dev-new").image, "img-2");
}

#[tokio::test]
async fn failing_member_fails_the_batch() {
    let fixture = Fixture::new();
    fixture.add_build("build-1", "0.1");
    fixture.add_image("img-1", "build-1", WDR4300);
    fixture.add_build("build-2", "0.2");
    fixture.add_image("img-2", "build-2", WDR4300);
    fixture.add_device("dev-ok", BOARD, SimulatedDevice::new("ap-ok"));
    fixture.add_device(
        "dev-bad",
        BOARD,
        SimulatedDevice::new("ap-bad").reject_image("Image metadata not found"),
    );
    fixture.preassign("dev-ok", "img-1");
    fixture.preassign("dev-bad", "img-1");

    let coordinator = &fixture.runtime.coordinator;
    let planned = coordinator.upgrade_related_devices("build-2").unwrap();
    let summary = coordinator.run(&planned).await.unwrap();

    assert_eq!(summary.success, 1);
    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.status(), BatchStatus::Failed);
    let statuses: Vec<_> = planned
        .operations
        .iter()
        .map(|operation| fixture.operation(operation).status)
        .collect();
    assert!(statuses.contains(&OperationStatus::Success));
    assert!(statuses.contains(&OperationStatus::Aborted));
}

#[tokio::test]
async fn dangling_firmware_records_are_skipped() {
    let fixture = fleet_on_first_build();
    fixture
        .store
        .save_device_firmware(DeviceFirmware::new("fw-ghost", "ghost", "img-1"))
        .unwrap();

    let coordinator = &fixture.runtime.coordinator;
    let planned = coordinator.upgrade_related_devices("build-2").unwrap();

    assert_eq!(planned.operations.len(), 2);
    assert_eq!(fixture.store.operations().unwrap().len(), 2);
    assert_eq!(
        fixture.store.batch(planned.batch.id).unwrap().operations.len(),
        2
    );
    assert_eq!(fixture.store.device_firmware("fw-ghost").unwrap().image, "img-1");

    let summary = coordinator.run(&planned).await.unwrap();
    assert_eq!(summary.success, 2);
}

#[tokio::test]
async fn store_failure_while_planning_aborts_created_operations() {
    let (fixture, flaky) = Fixture::flaky();
    seed_first_build(&fixture);
    flaky.limit_operation_creates(1);

    let err = fixture
        .runtime
        .coordinator
        .upgrade_related_devices("build-2")
        .unwrap_err();
    assert!(matches!(err, UpgradeError::Store(_)));

    let operations = fixture.store.operations().unwrap();
    assert_eq!(operations.len(), 1);
    let aborted = &operations[0];
    assert_eq!(aborted.status, OperationStatus::Aborted);
    assert!(aborted
        .log_text()
        .contains("Batch upgrade could not be planned: io error: disk full"));
    let batch = fixture.store.batch(aborted.batch.unwrap()).unwrap();
    assert_eq!(batch.operations, vec![aborted.id]);
}
