//! ---
//! fwu_section: "05-networking-external-interfaces"
//! fwu_subsection: "binary"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Control CLI for administrators interacting with FW-Upgrader."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Fleet upgrade dry runs against simulated devices.
//!
//! A scenario file describes builds, images and devices (with optional
//! scripted faults) and names the build to propagate:
//!
//! ```toml
//! [rollout]
//! build = "build-2"
//! mode = "related"
//!
//! [[builds]]
//! id = "build-2"
//! version = "0.2"
//! images = [{ id = "img-2", image_type = "ar71xx-generic-tl-wdr4300-v1-squashfs-sysupgrade.bin" }]
//!
//! [[devices]]
//! id = "ap-1"
//! model = "TP-LINK TL-WDR4300 v1"
//! firmware = "img-1"
//! faults = { reboot_outage = 2 }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Args, ValueEnum};
use fwu_common::UpgradeConfig;
use fwu_core::{new_registry, PlannedBatch, UpgradeMetrics, UpgradeRuntime, UpgraderRegistry};
use fwu_persistence::{
    BatchSummary, Build, Category, Device, DeviceConnection, DeviceFirmware, MemoryStore,
    RecordStore, UpgradeOperation,
};
use fwu_transport::{SimulatedDevice, SimulatedFleet};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::info;

use crate::load_config;

const DEFAULT_ORGANIZATION: &str = "default";
const DEFAULT_CATEGORY: &str = "default";

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Scenario file describing builds, devices and the rollout.
    #[arg(long, value_name = "FILE")]
    scenario: PathBuf,
    /// Journal operations to this file (overrides the configured journal).
    #[arg(long, value_name = "FILE")]
    journal: Option<PathBuf>,
    /// Keep the configured retry and reconnect waits instead of skipping them.
    #[arg(long = "real-delays", action = clap::ArgAction::SetTrue)]
    real_delays: bool,
    /// Override the rollout mode of the scenario.
    #[arg(long, value_enum)]
    mode: Option<RolloutMode>,
    /// Append the Prometheus text exposition after the report.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    metrics: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RolloutMode {
    /// Devices already running an older build of the same category.
    #[default]
    Related,
    /// Devices without any firmware assignment.
    Firmwareless,
    /// Both of the above.
    All,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default)]
    pub categories: Vec<ScenarioCategory>,
    pub rollout: Rollout,
    #[serde(default)]
    pub builds: Vec<ScenarioBuild>,
    #[serde(default)]
    pub devices: Vec<ScenarioDevice>,
}

#[derive(Debug, Deserialize)]
pub struct Rollout {
    pub build: String,
    #[serde(default)]
    pub mode: RolloutMode,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioBuild {
    pub id: String,
    pub version: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub images: Vec<ScenarioImage>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioImage {
    pub id: String,
    pub image_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Image payload; a placeholder derived from the id when absent.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioDevice {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    #[serde(default = "default_mac")]
    pub mac_address: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Devices without a management connection are skipped by rollouts.
    #[serde(default = "default_connected")]
    pub connected: bool,
    /// Image currently assigned and installed.
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub faults: Faults,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Faults {
    #[serde(default)]
    pub unreachable: bool,
    #[serde(default)]
    pub connect_failures: u32,
    #[serde(default)]
    pub upload_failures: u32,
    #[serde(default)]
    pub upload_error: Option<String>,
    #[serde(default)]
    pub reboot_outage: u32,
    #[serde(default)]
    pub reject_image: Option<String>,
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_owned()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_owned()
}

fn default_mac() -> String {
    "00:00:00:00:00:00".to_owned()
}

fn default_strategy() -> String {
    fwu_core::OPENWRT.to_owned()
}

fn default_connected() -> bool {
    true
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read scenario {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }
}

#[derive(Serialize)]
struct Report<'a> {
    batch: String,
    build: &'a str,
    status: String,
    summary: BatchSummary,
    operations: Vec<UpgradeOperation>,
}

pub fn run(args: SimulateArgs, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let scenario = Scenario::from_path(&args.scenario)?;

    let journal = args
        .journal
        .clone()
        .or_else(|| config.journal.enabled.then(|| config.journal.path.clone()));
    let store = Arc::new(match &journal {
        Some(path) => MemoryStore::with_journal(path)
            .with_context(|| format!("unable to open journal {}", path.display()))?,
        None => MemoryStore::new(),
    });
    let fleet = Arc::new(SimulatedFleet::new());
    let metrics = UpgradeMetrics::new(new_registry())?;

    let mut effective = config.clone();
    if !args.real_delays {
        effective.upgrade = without_delays(&config.upgrade);
    }
    let runtime = UpgradeRuntime::from_config(
        &effective,
        store.clone(),
        fleet.clone(),
        Some(metrics.clone()),
    );
    let upgraders = UpgraderRegistry::from_config(&effective.upgraders);
    populate(&scenario, &runtime, &upgraders, store.as_ref(), &fleet)?;

    let coordinator = &runtime.coordinator;
    let build = scenario.rollout.build.as_str();
    let planned: PlannedBatch = match args.mode.unwrap_or(scenario.rollout.mode) {
        RolloutMode::Related => coordinator.upgrade_related_devices(build)?,
        RolloutMode::Firmwareless => coordinator.upgrade_firmwareless_devices(build)?,
        RolloutMode::All => coordinator.upgrade_all(build)?,
    };

    let rt = Runtime::new()?;
    let summary = rt.block_on(coordinator.run(&planned))?;
    let operations = planned
        .operations
        .iter()
        .map(|operation| store.operation(operation.id))
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        batch = %planned.batch.id,
        operations = operations.len(),
        "simulation finished"
    );

    let report = Report {
        batch: planned.batch.id.to_string(),
        build,
        status: summary.status().to_string(),
        summary,
        operations,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    if args.metrics {
        print!("{}", metrics.encode_text()?);
    }
    Ok(())
}

fn without_delays(upgrade: &UpgradeConfig) -> UpgradeConfig {
    let mut upgrade = upgrade.clone();
    upgrade.retry_base_delay = Duration::ZERO;
    upgrade.retry_jitter = Duration::ZERO;
    upgrade.reconnect.settle_delay = Duration::ZERO;
    upgrade.reconnect.interval = Duration::ZERO;
    upgrade
}

/// Load the scenario records into the store and fleet.
fn populate(
    scenario: &Scenario,
    runtime: &UpgradeRuntime,
    upgraders: &UpgraderRegistry,
    store: &dyn RecordStore,
    fleet: &SimulatedFleet,
) -> Result<()> {
    let organization = scenario.organization.as_str();
    store.save_category(Category::new(DEFAULT_CATEGORY, organization, "Default"))?;
    for category in &scenario.categories {
        store.save_category(Category::new(
            category.id.clone(),
            organization,
            category.name.clone(),
        ))?;
    }
    for build in &scenario.builds {
        store.save_build(Build::new(
            build.id.clone(),
            organization,
            build.category.clone(),
            build.version.clone(),
        ))?;
        for image in &build.images {
            let content = image
                .content
                .clone()
                .unwrap_or_else(|| format!("simulated firmware {}", image.id));
            let file_name = image
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.bin", image.id));
            runtime.service.add_image(
                image.id.clone(),
                &build.id,
                &image.image_type,
                &file_name,
                Bytes::from(content),
            )?;
        }
    }

    for device in &scenario.devices {
        let name = device.name.clone().unwrap_or_else(|| device.id.clone());
        store.save_device(Device::new(
            device.id.clone(),
            organization,
            name.clone(),
            device.mac_address.clone(),
            device.model.clone(),
        ))?;
        if device.connected {
            store.save_connection(DeviceConnection::new(
                format!("{}-connection", device.id),
                device.id.clone(),
                device.strategy.clone(),
            ))?;
        }
        let mut simulated = simulated_device(&name, &device.faults);
        if let Some(image_id) = &device.firmware {
            let image = store.image(image_id)?;
            let commands = upgraders.get(&device.strategy)?;
            simulated =
                simulated.with_file(commands.checksum_file.clone(), format!("{}\n", image.checksum));
            let mut firmware = DeviceFirmware::new(
                format!("{}-firmware", device.id),
                device.id.clone(),
                image_id.clone(),
            );
            firmware.installed = true;
            runtime
                .service
                .save_device_firmware(&mut firmware, false, None)
                .map_err(|err| anyhow!("device {}: {err}", device.id))?;
        }
        fleet.insert(device.id.clone(), simulated);
    }
    Ok(())
}

fn simulated_device(name: &str, faults: &Faults) -> SimulatedDevice {
    let mut device = SimulatedDevice::new(name);
    if faults.unreachable {
        device = device.unreachable("Connection failed");
    }
    if faults.connect_failures > 0 {
        device = device.fail_connects(faults.connect_failures, "Connection failed");
    }
    if faults.upload_failures > 0 {
        let message = faults
            .upload_error
            .clone()
            .unwrap_or_else(|| "upload failed".to_owned());
        device = device.fail_uploads(faults.upload_failures, message);
    }
    if faults.reboot_outage > 0 {
        device = device.reboot_outage(faults.reboot_outage);
    }
    if let Some(output) = &faults.reject_image {
        device = device.reject_image(output.clone());
    }
    device
}
