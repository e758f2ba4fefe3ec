//! ---
//! fwu_section: "03-persistence-logging"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Record storage abstractions and the operation journal."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Product line grouping builds of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Record identifier.
    pub id: String,
    /// Owning organization.
    pub organization: String,
    /// Human readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl Category {
    /// Construct a category with an empty description.
    pub fn new(
        id: impl Into<String>,
        organization: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization: organization.into(),
            name: name.into(),
            description: String::new(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Immutable firmware release of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    /// Record identifier.
    pub id: String,
    /// Owning organization.
    pub organization: String,
    /// Category id.
    pub category: String,
    /// Release version, usually SemVer-like.
    pub version: String,
    /// Optional release notes.
    #[serde(default)]
    pub changelog: Option<String>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

impl Build {
    /// Construct a build stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        organization: impl Into<String>,
        category: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization: organization.into(),
            category: category.into(),
            version: version.into(),
            changelog: None,
            created: Utc::now(),
        }
    }

    /// Display form, `"<category> v<version>"` when the category is known.
    pub fn label(&self, category: Option<&Category>) -> String {
        match category {
            Some(category) => format!("{} v{}", category.name, self.version),
            None => format!("v{}", self.version),
        }
    }
}

/// One binary artifact of a build for one device type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareImage {
    /// Record identifier.
    pub id: String,
    /// Owning build id.
    pub build: String,
    /// Hardware catalog key, e.g. `ar71xx-generic-tl-wdr4300-v1-squashfs-sysupgrade.bin`.
    pub image_type: String,
    /// Uploaded file name, used for the remote upload path.
    pub file_name: String,
    /// Lowercase SHA-256 hex digest of `content`.
    pub checksum: String,
    /// Image bytes.
    pub content: Bytes,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

/// A managed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Record identifier.
    pub id: String,
    /// Owning organization.
    pub organization: String,
    /// Host name.
    pub name: String,
    /// Primary MAC address.
    pub mac_address: String,
    /// Hardware board identifier reported by the device.
    pub model: String,
}

impl Device {
    /// Construct a device record.
    pub fn new(
        id: impl Into<String>,
        organization: impl Into<String>,
        name: impl Into<String>,
        mac_address: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization: organization.into(),
            name: name.into(),
            mac_address: mac_address.into(),
            model: model.into(),
        }
    }
}

/// Management connection of a device and its liveness flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnection {
    /// Record identifier.
    pub id: String,
    /// Device id.
    pub device: String,
    /// Device-type tag selecting the upgrader command set.
    pub update_strategy: String,
    /// Disabled connections are never used.
    pub enabled: bool,
    /// `None` until the first connection attempt.
    pub is_working: Option<bool>,
    /// Reason of the last failure, empty when working.
    #[serde(default)]
    pub failure_reason: String,
    /// Time of the last connection attempt.
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl DeviceConnection {
    /// Construct an enabled, never-tried connection.
    pub fn new(
        id: impl Into<String>,
        device: impl Into<String>,
        update_strategy: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            device: device.into(),
            update_strategy: update_strategy.into(),
            enabled: true,
            is_working: None,
            failure_reason: String::new(),
            last_attempt: None,
        }
    }

    /// Record a successful connection.
    pub fn mark_working(&mut self, at: DateTime<Utc>) {
        self.is_working = Some(true);
        self.failure_reason.clear();
        self.last_attempt = Some(at);
    }

    /// Record a failed connection with a human readable reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.is_working = Some(false);
        self.failure_reason = reason.into();
        self.last_attempt = Some(at);
    }
}

/// Intended firmware of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFirmware {
    /// Record identifier.
    pub id: String,
    /// Device id, unique among device firmware records.
    pub device: String,
    /// Assigned image id.
    pub image: String,
    /// Set once an upgrade to `image` succeeded.
    pub installed: bool,
    /// Image id as of the last save; `None` for unsaved records.
    #[serde(default)]
    pub previous_image: Option<String>,
}

impl DeviceFirmware {
    /// Construct an unsaved assignment.
    pub fn new(id: impl Into<String>, device: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device: device.into(),
            image: image.into(),
            installed: false,
            previous_image: None,
        }
    }

    /// Whether the assigned image differs from the one last saved.
    pub fn image_changed(&self) -> bool {
        self.previous_image.as_deref() != Some(self.image.as_str())
    }

    /// Point the assignment at another image, resetting the installed flag.
    pub fn assign(&mut self, image: impl Into<String>) {
        let image = image.into();
        if image != self.image {
            self.image = image;
            self.installed = false;
        }
    }

    /// Remember the current image as saved.
    pub fn mark_saved(&mut self) {
        self.previous_image = Some(self.image.clone());
    }
}

/// Status of an upgrade operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OperationStatus {
    /// Running.
    InProgress,
    /// Image installed.
    Success,
    /// Gave up after an error.
    Failed,
    /// Stopped before flashing.
    Aborted,
}

impl OperationStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Timestamped operation log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// When the line was appended.
    pub timestamp: DateTime<Utc>,
    /// Human readable text.
    pub message: String,
}

/// One attempt to bring one device to one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeOperation {
    /// Record identifier.
    pub id: Uuid,
    /// Device id.
    pub device: String,
    /// Target image id.
    pub image: String,
    /// Device firmware record this operation installs.
    pub device_firmware: String,
    /// Owning batch, if any.
    #[serde(default)]
    pub batch: Option<Uuid>,
    /// Current status.
    pub status: OperationStatus,
    /// Append-only log.
    #[serde(default)]
    pub log: Vec<LogLine>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub modified: DateTime<Utc>,
}

impl UpgradeOperation {
    /// Construct an in-progress operation for `firmware`.
    pub fn new(firmware: &DeviceFirmware, batch: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            device: firmware.device.clone(),
            image: firmware.image.clone(),
            device_firmware: firmware.id.clone(),
            batch,
            status: OperationStatus::InProgress,
            log: Vec::new(),
            created: now,
            modified: now,
        }
    }

    /// Log messages joined by newlines.
    pub fn log_text(&self) -> String {
        self.log
            .iter()
            .map(|line| line.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Group of operations issued for one build propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpgradeOperation {
    /// Record identifier.
    pub id: Uuid,
    /// Build being propagated.
    pub build: String,
    /// Member operations in creation order.
    pub operations: Vec<Uuid>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

impl BatchUpgradeOperation {
    /// Construct an empty batch for `build`.
    pub fn new(build: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            build: build.into(),
            operations: Vec::new(),
            created: Utc::now(),
        }
    }
}

/// Aggregated status of a batch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BatchStatus {
    /// No member operations.
    Idle,
    /// At least one member is still running.
    InProgress,
    /// Every member succeeded.
    Success,
    /// Some member failed or was aborted.
    Failed,
}

/// Per-status member counts of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Running members.
    pub in_progress: usize,
    /// Successful members.
    pub success: usize,
    /// Failed members.
    pub failed: usize,
    /// Aborted members.
    pub aborted: usize,
}

impl BatchSummary {
    /// Count member statuses.
    pub fn from_statuses(statuses: impl IntoIterator<Item = OperationStatus>) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            match status {
                OperationStatus::InProgress => summary.in_progress += 1,
                OperationStatus::Success => summary.success += 1,
                OperationStatus::Failed => summary.failed += 1,
                OperationStatus::Aborted => summary.aborted += 1,
            }
        }
        summary
    }

    /// Number of members.
    pub fn total(&self) -> usize {
        self.in_progress + self.success + self.failed + self.aborted
    }

    /// Aggregated status.
    pub fn status(&self) -> BatchStatus {
        if self.total() == 0 {
            BatchStatus::Idle
        } else if self.in_progress > 0 {
            BatchStatus::InProgress
        } else if self.failed + self.aborted > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Success
        }
    }
}
