//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Checksum marker stored on the device after every successful flash.

use std::time::Duration;

use fwu_transport::{Transport, TransportError};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::operation::OperationLog;
use crate::upgrader::{run_command, CommandSet};

/// Lowercase SHA-256 hex digest of `content`.
pub fn compute(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Compare a marker read from the device with an image checksum.
pub fn matches(recorded: &str, expected: &str) -> bool {
    recorded.trim().eq_ignore_ascii_case(expected.trim())
}

/// What the device marker says about an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumState {
    /// No marker on the device.
    Missing,
    /// The device already runs the image.
    Matches,
    /// The device runs something else.
    Differs(String),
}

/// Reads and writes the checksum marker through a connected transport.
pub struct ChecksumVerifier<'a> {
    commands: &'a CommandSet,
    timeout: Duration,
}

impl<'a> ChecksumVerifier<'a> {
    pub fn new(commands: &'a CommandSet, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    pub async fn check(
        &self,
        transport: &dyn Transport,
        expected: &str,
        log: &OperationLog,
    ) -> Result<ChecksumState> {
        let probe = run_command(transport, &self.commands.probe(), self.timeout).await?;
        if !probe.success() {
            log.append("Image checksum file not found, proceeding with the upload of the new image")?;
            return Ok(ChecksumState::Missing);
        }
        log.append("Image checksum file found")?;
        let read = run_command(transport, &self.commands.read(), self.timeout).await?;
        if !read.success() {
            log.append("Image checksum file could not be read, proceeding")?;
            return Ok(ChecksumState::Missing);
        }
        if matches(&read.output, expected) {
            return Ok(ChecksumState::Matches);
        }
        log.append("Checksum different, proceeding")?;
        Ok(ChecksumState::Differs(read.output.trim().to_owned()))
    }

    /// Create the marker directory and store `checksum` in the marker file.
    pub async fn write(
        &self,
        transport: &dyn Transport,
        checksum: &str,
    ) -> std::result::Result<(), TransportError> {
        for command in [self.commands.mkdir(), self.commands.write(checksum)] {
            let output = run_command(transport, &command, self.timeout).await?;
            if !output.success() {
                return Err(TransportError::Protocol(format!(
                    "`{command}` exited with status {}: {}",
                    output.exit_code,
                    output.output.trim()
                )));
            }
        }
        Ok(())
    }
}
