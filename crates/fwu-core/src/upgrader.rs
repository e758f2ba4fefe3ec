//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Device-type command sets and the registry selecting them.

use std::sync::Arc;
use std::time::Duration;

use fwu_common::CommandTemplateConfig;
use fwu_transport::{CommandOutput, Transport, TransportError};
use indexmap::IndexMap;
use tokio::time::timeout;

use crate::error::{Result, UpgradeError};

/// Update strategy tag of the builtin OpenWrt command set.
pub const OPENWRT: &str = "openwrt";

/// Remote conventions of one device type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    pub upload_dir: String,
    pub checksum_file: String,
    pub test_command: String,
    pub flash_command: String,
    pub checksum_probe: String,
    pub checksum_read: String,
    pub mkdir_command: String,
    pub checksum_write: String,
}

impl CommandSet {
    /// OpenWrt `sysupgrade` based command set.
    pub fn openwrt() -> Self {
        Self {
            upload_dir: "/tmp".to_owned(),
            checksum_file: "/etc/openwisp/firmware_checksum".to_owned(),
            test_command: "sysupgrade --test {path}".to_owned(),
            flash_command: "sysupgrade -v -c {path}".to_owned(),
            checksum_probe: "test -f {file}".to_owned(),
            checksum_read: "cat {file}".to_owned(),
            mkdir_command: "mkdir -p {dir}".to_owned(),
            checksum_write: "echo {checksum} > {file}".to_owned(),
        }
    }

    pub fn from_config(config: &CommandTemplateConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            checksum_file: config.checksum_file.clone(),
            test_command: config.test_command.clone(),
            flash_command: config.flash_command.clone(),
            checksum_probe: config.checksum_probe.clone(),
            checksum_read: config.checksum_read.clone(),
            mkdir_command: config.mkdir_command.clone(),
            checksum_write: config.checksum_write.clone(),
        }
    }

    /// Where an image named `file_name` is uploaded.
    pub fn remote_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.upload_dir.trim_end_matches('/'), file_name)
    }

    /// Parent directory of the checksum marker.
    pub fn checksum_dir(&self) -> &str {
        match self.checksum_file.rfind('/') {
            Some(0) => "/",
            Some(index) => &self.checksum_file[..index],
            None => ".",
        }
    }

    pub fn test(&self, path: &str) -> String {
        render(&self.test_command, &[("{path}", path)])
    }

    pub fn flash(&self, path: &str) -> String {
        render(&self.flash_command, &[("{path}", path)])
    }

    pub fn probe(&self) -> String {
        render(&self.checksum_probe, &[("{file}", &self.checksum_file)])
    }

    pub fn read(&self) -> String {
        render(&self.checksum_read, &[("{file}", &self.checksum_file)])
    }

    pub fn mkdir(&self) -> String {
        render(&self.mkdir_command, &[("{dir}", self.checksum_dir())])
    }

    pub fn write(&self, checksum: &str) -> String {
        render(
            &self.checksum_write,
            &[("{checksum}", checksum), ("{file}", &self.checksum_file)],
        )
    }
}

fn render(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_owned(), |acc, (key, value)| acc.replace(key, value))
}

/// Update strategy tag to [`CommandSet`] lookup table.
#[derive(Debug, Clone)]
pub struct UpgraderRegistry {
    sets: IndexMap<String, Arc<CommandSet>>,
}

impl UpgraderRegistry {
    /// Registry holding the builtin OpenWrt strategy.
    pub fn builtin() -> Self {
        let mut sets = IndexMap::new();
        sets.insert(OPENWRT.to_owned(), Arc::new(CommandSet::openwrt()));
        Self { sets }
    }

    /// Builtin strategies plus every configured `[upgraders.<tag>]` table.
    pub fn from_config(configured: &IndexMap<String, CommandTemplateConfig>) -> Self {
        let mut registry = Self::builtin();
        for (tag, templates) in configured {
            registry.register(tag.clone(), CommandSet::from_config(templates));
        }
        registry
    }

    pub fn register(&mut self, tag: impl Into<String>, commands: CommandSet) {
        self.sets.insert(tag.into(), Arc::new(commands));
    }

    /// Command set of `tag`.
    pub fn get(&self, tag: &str) -> Result<Arc<CommandSet>> {
        self.sets.get(tag).cloned().ok_or_else(|| {
            UpgradeError::configuration(format!(
                "no upgrader registered for update strategy '{tag}'"
            ))
        })
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}

impl Default for UpgraderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Run `command` with a hard ceiling; an elapsed ceiling is a [`TransportError::Timeout`].
pub async fn run_command(
    transport: &dyn Transport,
    command: &str,
    limit: Duration,
) -> std::result::Result<CommandOutput, TransportError> {
    match timeout(limit, transport.exec(command, limit)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            command: command.to_owned(),
            after: limit,
        }),
    }
}
