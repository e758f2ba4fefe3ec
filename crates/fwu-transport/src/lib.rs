//! ---
//! fwu_section: "05-networking-external-interfaces"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Device transport capability and simulated devices."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Management channel capability consumed by the upgrade core.
//!
//! The core never speaks a remote-shell protocol itself. It only calls
//! [`Transport::connect`], [`Transport::exec`] and [`Transport::upload`] and
//! branches on the [`TransportError`] class they return.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod error;
pub mod simulated;

pub use error::TransportError;
pub use simulated::{SimulatedDevice, SimulatedFleet};

/// Output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Combined stdout/stderr text.
    pub output: String,
    /// Process exit code reported by the remote shell.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Build an output record.
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Remote shell and file-transfer session with one device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or re-open) the session.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Run a shell command, bounded by `timeout` on the transport side.
    async fn exec(&self, command: &str, timeout: Duration)
        -> Result<CommandOutput, TransportError>;

    /// Copy `contents` to `remote_path` on the device.
    async fn upload(&self, contents: &[u8], remote_path: &str) -> Result<(), TransportError>;

    /// Close the session. Errors are irrelevant at this point.
    async fn disconnect(&self) {}
}

/// Produces a transport for a device at the start of each upgrade run.
pub trait TransportFactory: Send + Sync {
    /// Resolve the management channel of `device_id`.
    fn open(&self, device_id: &str) -> Result<Arc<dyn Transport>, TransportError>;
}
