//! ---
//! fwu_section: "05-networking-external-interfaces"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Device transport capability and simulated devices."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! In-memory stand-in for an OpenWrt device reachable over a remote shell.
//!
//! The simulated shell understands the handful of commands the upgrader
//! issues (`test -f`, `cat`, `mkdir -p`, `echo .. > ..` and `sysupgrade`),
//! keeps a flat in-memory filesystem, and can be scripted to fail in the
//! ways real devices do: unreachable hosts, broken uploads, images rejected
//! by the dry run, and an outage window after flashing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::debug;

use crate::{CommandOutput, Transport, TransportError, TransportFactory};

#[derive(Debug, Clone)]
struct FaultPlan {
    unreachable: bool,
    connect_failures: u32,
    connect_error: String,
    upload_failures: u32,
    upload_error: String,
    reboot_outage: u32,
    image_rejection: Option<String>,
    failing_commands: Vec<(String, TransportError)>,
    hanging_commands: Vec<String>,
    flash_result: Option<CommandOutput>,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            unreachable: false,
            connect_failures: 0,
            connect_error: "Connection failed".to_owned(),
            upload_failures: 0,
            upload_error: "upload failed".to_owned(),
            reboot_outage: 0,
            image_rejection: None,
            failing_commands: Vec::new(),
            hanging_commands: Vec::new(),
            flash_result: None,
        }
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    connected: bool,
    files: HashMap<String, Vec<u8>>,
    pending_outage: u32,
    plan: FaultPlan,
    connect_calls: u32,
    upload_calls: u32,
    commands: Vec<String>,
    flashed: Vec<Vec<u8>>,
}

enum Evaluated {
    Output(CommandOutput),
    Hang,
    Fail(TransportError),
}

/// Scriptable fake device implementing [`Transport`].
#[derive(Debug)]
pub struct SimulatedDevice {
    name: String,
    state: Mutex<DeviceState>,
}

impl SimulatedDevice {
    /// Create a healthy, reachable device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Seed a file on the device filesystem.
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.state
            .get_mut()
            .files
            .insert(path.into(), contents.into());
        self
    }

    /// Every connect fails with `message`.
    pub fn unreachable(mut self, message: impl Into<String>) -> Self {
        let plan = &mut self.state.get_mut().plan;
        plan.unreachable = true;
        plan.connect_error = message.into();
        self
    }

    /// The next `count` connects fail with `message`.
    pub fn fail_connects(mut self, count: u32, message: impl Into<String>) -> Self {
        let plan = &mut self.state.get_mut().plan;
        plan.connect_failures = count;
        plan.connect_error = message.into();
        self
    }

    /// The next `count` uploads fail with a transfer error carrying `message`.
    pub fn fail_uploads(mut self, count: u32, message: impl Into<String>) -> Self {
        let plan = &mut self.state.get_mut().plan;
        plan.upload_failures = count;
        plan.upload_error = message.into();
        self
    }

    /// After flashing, the next `count` connects fail while the device reboots.
    pub fn reboot_outage(mut self, count: u32) -> Self {
        self.state.get_mut().plan.reboot_outage = count;
        self
    }

    /// `sysupgrade --test` rejects any image with `output`.
    pub fn reject_image(mut self, output: impl Into<String>) -> Self {
        self.state.get_mut().plan.image_rejection = Some(output.into());
        self
    }

    /// Commands starting with `prefix` fail with `error`.
    pub fn fail_command(mut self, prefix: impl Into<String>, error: TransportError) -> Self {
        self.state
            .get_mut()
            .plan
            .failing_commands
            .push((prefix.into(), error));
        self
    }

    /// Commands starting with `prefix` never answer.
    pub fn hang_command(mut self, prefix: impl Into<String>) -> Self {
        self.state
            .get_mut()
            .plan
            .hanging_commands
            .push(prefix.into());
        self
    }

    /// The flash command returns `output` instead of rebooting the device.
    pub fn flash_returns(mut self, output: CommandOutput) -> Self {
        self.state.get_mut().plan.flash_result = Some(output);
        self
    }

    /// Device name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current contents of `path`.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    /// Number of connect calls observed.
    pub fn connect_calls(&self) -> u32 {
        self.state.lock().connect_calls
    }

    /// Number of upload calls observed.
    pub fn upload_calls(&self) -> u32 {
        self.state.lock().upload_calls
    }

    /// Every command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Images written by the flash command, in order.
    pub fn flashed_images(&self) -> Vec<Vec<u8>> {
        self.state.lock().flashed.clone()
    }

    fn evaluate(&self, state: &mut DeviceState, command: &str) -> Evaluated {
        if let Some((_, err)) = state
            .plan
            .failing_commands
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return Evaluated::Fail(err.clone());
        }
        if state
            .plan
            .hanging_commands
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return Evaluated::Hang;
        }

        let args: Vec<&str> = command.split_whitespace().collect();
        let output = match args.as_slice() {
            ["test", "-f", path] => {
                let code = if state.files.contains_key(*path) { 0 } else { 1 };
                CommandOutput::new("", code)
            }
            ["cat", path] => match state.files.get(*path) {
                Some(contents) => CommandOutput::new(String::from_utf8_lossy(contents), 0),
                None => CommandOutput::new(
                    format!("cat: can't open '{path}': No such file or directory"),
                    1,
                ),
            },
            ["mkdir", "-p", _dir] => CommandOutput::new("", 0),
            ["echo", value, ">", path] => {
                state
                    .files
                    .insert((*path).to_owned(), format!("{value}\n").into_bytes());
                CommandOutput::new("", 0)
            }
            ["sysupgrade", "--test", path] => {
                if !state.files.contains_key(*path) {
                    CommandOutput::new(format!("Image not found: {path}"), 1)
                } else if let Some(rejection) = &state.plan.image_rejection {
                    CommandOutput::new(rejection.clone(), 1)
                } else {
                    CommandOutput::new("", 0)
                }
            }
            ["sysupgrade", .., path] => return self.flash(state, path),
            [] => CommandOutput::new("", 0),
            [program, ..] => CommandOutput::new(format!("sh: {program}: not found"), 127),
        };
        Evaluated::Output(output)
    }

    fn flash(&self, state: &mut DeviceState, path: &str) -> Evaluated {
        let Some(image) = state.files.get(path).cloned() else {
            return Evaluated::Output(CommandOutput::new(format!("Image not found: {path}"), 1));
        };
        if let Some(result) = state.plan.flash_result.clone() {
            return Evaluated::Output(result);
        }
        state.flashed.push(image);
        state.files.remove(path);
        state.connected = false;
        state.pending_outage = state.plan.reboot_outage;
        debug!(device = %self.name, "simulated device rebooting into new firmware");
        Evaluated::Fail(TransportError::ConnectionLost(
            "remote side closed the session".to_owned(),
        ))
    }
}

#[async_trait]
impl Transport for SimulatedDevice {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        if state.plan.unreachable {
            return Err(TransportError::Connectivity(state.plan.connect_error.clone()));
        }
        if state.plan.connect_failures > 0 {
            state.plan.connect_failures -= 1;
            return Err(TransportError::Connectivity(state.plan.connect_error.clone()));
        }
        if state.pending_outage > 0 {
            state.pending_outage -= 1;
            return Err(TransportError::Connectivity(format!(
                "{}: no route to host",
                self.name
            )));
        }
        state.connected = true;
        Ok(())
    }

    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let evaluated = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(TransportError::ConnectionLost(
                    "session not established".to_owned(),
                ));
            }
            state.commands.push(command.to_owned());
            self.evaluate(&mut state, command)
        };
        match evaluated {
            Evaluated::Output(output) => Ok(output),
            Evaluated::Fail(err) => Err(err),
            Evaluated::Hang => {
                sleep(timeout).await;
                Err(TransportError::Timeout {
                    command: command.to_owned(),
                    after: timeout,
                })
            }
        }
    }

    async fn upload(&self, contents: &[u8], remote_path: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::ConnectionLost(
                "session not established".to_owned(),
            ));
        }
        state.upload_calls += 1;
        if state.plan.upload_failures > 0 {
            state.plan.upload_failures -= 1;
            return Err(TransportError::Transfer(state.plan.upload_error.clone()));
        }
        state
            .files
            .insert(remote_path.to_owned(), contents.to_vec());
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.lock().connected = false;
    }
}

/// Device-id keyed registry of simulated devices.
#[derive(Debug, Default)]
pub struct SimulatedFleet {
    devices: RwLock<HashMap<String, Arc<SimulatedDevice>>>,
}

impl SimulatedFleet {
    /// Create an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` under `device_id` and return a shared handle to it.
    pub fn insert(&self, device_id: impl Into<String>, device: SimulatedDevice) -> Arc<SimulatedDevice> {
        let device = Arc::new(device);
        self.devices.write().insert(device_id.into(), device.clone());
        device
    }

    /// Look up a registered device.
    pub fn get(&self, device_id: &str) -> Option<Arc<SimulatedDevice>> {
        self.devices.read().get(device_id).cloned()
    }
}

impl TransportFactory for SimulatedFleet {
    fn open(&self, device_id: &str) -> Result<Arc<dyn Transport>, TransportError> {
        match self.get(device_id) {
            Some(device) => Ok(device),
            None => Err(TransportError::Connectivity(format!(
                "no management route to device {device_id}"
            ))),
        }
    }
}
