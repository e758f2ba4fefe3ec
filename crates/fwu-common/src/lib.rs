//! ---
//! fwu_section: "01-core-functionality"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Shared primitives and utilities for the upgrade runtime."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Shared primitives for the FW-Upgrader workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the core library and the control CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CommandTemplateConfig, HardwareImageConfig, JournalConfig, LoggingConfig,
    ReconnectConfig, UpgradeConfig,
};
pub use logging::{init_tracing, log_file_prefix, LogFormat};
