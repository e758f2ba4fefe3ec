//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Image type to compatible hardware board mapping.

use fwu_common::HardwareImageConfig;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Result, UpgradeError};

/// Label and compatible boards of one image type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareEntry {
    /// Human readable name.
    pub label: String,
    /// Board identifiers as reported by the devices.
    pub boards: Vec<String>,
}

const BUILTIN: &[(&str, &str, &[&str])] = &[
    (
        "ar71xx-generic-tl-wdr4300-v1-squashfs-sysupgrade.bin",
        "TP-Link WDR4300 v1 (OpenWrt 19.07 and earlier)",
        &["TP-LINK TL-WDR4300 v1"],
    ),
    (
        "ar71xx-generic-tl-wdr4300-v1-il-squashfs-sysupgrade.bin",
        "TP-Link WDR4300 v1 Israel Version (OpenWrt 19.07 and earlier)",
        &["TP-LINK TL-WDR4300 v1 (IL)"],
    ),
    (
        "ath79-generic-tplink_tl-wdr4300-v1-squashfs-sysupgrade.bin",
        "TP-Link WDR4300 v1 (OpenWrt 19.07 and later)",
        &["TP-Link TL-WDR4300 v1"],
    ),
    (
        "ar71xx-generic-ubnt-airrouter-squashfs-sysupgrade.bin",
        "Ubiquiti AirRouter",
        &["Ubiquiti AirRouter"],
    ),
    (
        "ramips-mt7621-zbt-wg3526-16M-squashfs-sysupgrade.bin",
        "ZBT-WG3526 (16M)",
        &["ZBT-WG3526 (16M)"],
    ),
    (
        "x86-64-combined-squashfs.img.gz",
        "VMware, Inc. VMware Virtual Platform",
        &["VMware, Inc. VMware Virtual Platform"],
    ),
];

/// Lookup table from image type to [`HardwareEntry`].
#[derive(Debug, Clone, Default)]
pub struct HardwareCatalog {
    entries: IndexMap<String, HardwareEntry>,
}

impl HardwareCatalog {
    /// Catalog holding only the builtin OpenWrt targets.
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(image_type, label, boards)| {
                (
                    (*image_type).to_owned(),
                    HardwareEntry {
                        label: (*label).to_owned(),
                        boards: boards.iter().map(|b| (*b).to_owned()).collect(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Builtin catalog extended (or overridden) by configuration entries.
    pub fn from_config(extra: &[HardwareImageConfig]) -> Self {
        let mut catalog = Self::builtin();
        for entry in extra {
            debug!(image_type = %entry.image_type, "registering configured hardware entry");
            catalog.insert(
                entry.image_type.clone(),
                HardwareEntry {
                    label: entry
                        .label
                        .clone()
                        .unwrap_or_else(|| entry.image_type.clone()),
                    boards: entry.boards.clone(),
                },
            );
        }
        catalog
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, image_type: impl Into<String>, entry: HardwareEntry) {
        self.entries.insert(image_type.into(), entry);
    }

    /// Remove an entry, returning it.
    pub fn remove(&mut self, image_type: &str) -> Option<HardwareEntry> {
        self.entries.shift_remove(image_type)
    }

    /// Compatible boards of `image_type`.
    pub fn boards(&self, image_type: &str) -> Result<&[String]> {
        match self.entries.get(image_type) {
            Some(entry) if !entry.boards.is_empty() => Ok(&entry.boards),
            _ => Err(UpgradeError::configuration(format!(
                "could not find boards for image type '{image_type}'"
            ))),
        }
    }

    /// Label of `image_type`, if known.
    pub fn label(&self, image_type: &str) -> Option<&str> {
        self.entries.get(image_type).map(|entry| entry.label.as_str())
    }

    /// Whether `board` can run images of `image_type`.
    pub fn is_compatible(&self, image_type: &str, board: &str) -> Result<bool> {
        Ok(self.boards(image_type)?.iter().any(|b| b == board))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HardwareEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
