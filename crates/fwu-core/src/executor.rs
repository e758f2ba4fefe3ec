//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Per-device upgrade protocol.
//!
//! One run is strictly ordered: connect, checksum pre-check, upload, dry-run
//! test, flash, reconnect and checksum write. Recoverable failures restart
//! the whole run from connect, bounded by the [`RetryPolicy`]. The connection
//! drop that follows the flash command is expected and hands over to the
//! [`ReconnectLoop`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fwu_common::UpgradeConfig;
use fwu_logging::{fwu_debug, fwu_warn};
use fwu_persistence::{
    DeviceConnection, DeviceFirmware, FirmwareImage, OperationStatus, RecordStore,
};
use fwu_transport::{Transport, TransportError, TransportFactory};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::sleep;
use uuid::Uuid;

use crate::checksum::{ChecksumState, ChecksumVerifier};
use crate::error::{Result, UpgradeError};
use crate::metrics::UpgradeMetrics;
use crate::operation::OperationLog;
use crate::reconnect::{ReconnectLoop, ReconnectOutcome, ReconnectPolicy};
use crate::retry::RetryPolicy;
use crate::upgrader::{run_command, CommandSet, UpgraderRegistry};

const GIVING_UP: &str = "Giving up, device not reachable";

/// Why a run stopped short of a successful upgrade.
enum Failure {
    /// Worth rerunning from connect.
    Recoverable(String),
    /// The device rejected the image during the dry run.
    Incompatible(String),
    /// Final, the message is logged verbatim.
    Fatal(String),
    Internal(UpgradeError),
}

impl From<UpgradeError> for Failure {
    fn from(err: UpgradeError) -> Self {
        match err {
            UpgradeError::Transport(err) if err.is_connectivity() => {
                Failure::Recoverable(err.to_string())
            }
            UpgradeError::Transport(err) => Failure::Fatal(format!("Upgrade failed: {err}")),
            other => Failure::Internal(other),
        }
    }
}

enum Completion {
    AlreadyInstalled,
    Upgraded,
}

/// Everything a run needs, resolved once per operation.
struct Target {
    firmware: DeviceFirmware,
    image: FirmwareImage,
    connection: DeviceConnection,
    commands: Arc<CommandSet>,
}

/// Drives upgrade operations through the device protocol.
pub struct UpgradeExecutor {
    store: Arc<dyn RecordStore>,
    transports: Arc<dyn TransportFactory>,
    upgraders: Arc<UpgraderRegistry>,
    retry: RetryPolicy,
    reconnect: ReconnectPolicy,
    command_timeout: Duration,
    flash_timeout: Duration,
    metrics: Option<UpgradeMetrics>,
    rng: Mutex<StdRng>,
}

impl UpgradeExecutor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transports: Arc<dyn TransportFactory>,
        upgraders: Arc<UpgraderRegistry>,
        config: &UpgradeConfig,
    ) -> Self {
        Self {
            store,
            transports,
            upgraders,
            retry: RetryPolicy::from_config(config),
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
            command_timeout: config.command_timeout,
            flash_timeout: config.flash_timeout,
            metrics: None,
            rng: Mutex::new(StdRng::seed_from_u64(0x5EED_F1A5)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_metrics(mut self, metrics: UpgradeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Seed the backoff jitter for deterministic runs.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Run operation `id` to a terminal status and return that status.
    ///
    /// Errors are reserved for the record store and for operations that
    /// already finished; device-side problems always end up in the log.
    /// An operation that started is closed as failed before an error is
    /// returned.
    pub async fn execute(&self, id: Uuid) -> Result<OperationStatus> {
        let operation = self.store.operation(id)?;
        if operation.status.is_terminal() {
            return Err(UpgradeError::AlreadyTerminal(id));
        }
        let log = OperationLog::open(self.store.clone(), &operation);
        let started = Instant::now();

        let mut target = match self.resolve(&operation.device_firmware, &operation.image) {
            Ok(target) => target,
            Err(UpgradeError::Store(err)) => {
                log.append(format!("Upgrade failed: {err}"))?;
                return self.finish(&log, OperationStatus::Failed, started);
            }
            Err(UpgradeError::Configuration(reason)) => {
                log.append(format!("Upgrade failed: {reason}"))?;
                return self.finish(&log, OperationStatus::Failed, started);
            }
            Err(other) => return self.abandon(&log, other, started),
        };

        for attempt in 1..=self.retry.max_attempts {
            let failure = match self.run_once(&mut target, &log, attempt).await {
                Ok(Completion::AlreadyInstalled) | Ok(Completion::Upgraded) => {
                    if let Err(err) = self.mark_installed(&target.firmware.id, &operation.image) {
                        fwu_warn!(
                            context = log.context(),
                            "unable to flag firmware installed: {}",
                            err
                        );
                        log.append(format!(
                            "Unable to flag the firmware as installed: {err}"
                        ))?;
                    }
                    return self.finish(&log, OperationStatus::Success, started);
                }
                Err(failure) => failure,
            };

            match failure {
                Failure::Recoverable(cause) if attempt < self.retry.max_attempts => {
                    log.append(format!("Detected a recoverable failure: {cause}."))?;
                    log.append("The upgrade operation will be retried soon.")?;
                    let delay = self.retry.backoff_delay(attempt, &mut self.rng.lock());
                    fwu_debug!(
                        context = log.context().with_attempt(attempt),
                        "retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Failure::Recoverable(cause) => {
                    log.append(format!("Max retries exceeded. Upgrade failed: {cause}."))?;
                    return self.finish(&log, OperationStatus::Failed, started);
                }
                Failure::Incompatible(output) => {
                    log.append(output)?;
                    return self.finish(&log, OperationStatus::Aborted, started);
                }
                Failure::Fatal(message) => {
                    log.append(message)?;
                    return self.finish(&log, OperationStatus::Failed, started);
                }
                Failure::Internal(err) => return self.abandon(&log, err, started),
            }
        }

        // max_attempts is at least one, every path above returns on the last run.
        log.append("Max retries exceeded.")?;
        self.finish(&log, OperationStatus::Failed, started)
    }

    fn resolve(&self, firmware_id: &str, image_id: &str) -> Result<Target> {
        let firmware = self.store.device_firmware(firmware_id)?;
        let image = self.store.image(image_id)?;
        let device = self.store.device(&firmware.device)?;
        let connection = self
            .store
            .connections_for_device(&device.id)?
            .into_iter()
            .find(|connection| connection.enabled)
            .ok_or_else(|| {
                UpgradeError::configuration(format!(
                    "device {} has no related connection",
                    device.name
                ))
            })?;
        let commands = self.upgraders.get(&connection.update_strategy)?;
        Ok(Target {
            firmware,
            image,
            connection,
            commands,
        })
    }

    async fn run_once(
        &self,
        target: &mut Target,
        log: &OperationLog,
        attempt: u32,
    ) -> std::result::Result<Completion, Failure> {
        let transport = match self.transports.open(&target.firmware.device) {
            Ok(transport) => transport,
            Err(err) => return Err(self.connect_failed(target, err)),
        };
        if let Err(err) = transport.connect().await {
            return Err(self.connect_failed(target, err));
        }
        target.connection.mark_working(Utc::now());
        self.store.save_connection(target.connection.clone())?;
        log.append("Connection successful, starting upgrade...")?;

        let result = self.upgrade(target, log, transport.as_ref(), attempt).await;
        transport.disconnect().await;
        result
    }

    fn connect_failed(&self, target: &mut Target, err: TransportError) -> Failure {
        target.connection.mark_failed(err.to_string(), Utc::now());
        if let Err(store_err) = self.store.save_connection(target.connection.clone()) {
            return Failure::Internal(store_err.into());
        }
        if err.is_connectivity() {
            Failure::Recoverable(err.to_string())
        } else {
            Failure::Fatal(format!("Upgrade failed: {err}"))
        }
    }

    async fn upgrade(
        &self,
        target: &mut Target,
        log: &OperationLog,
        transport: &dyn Transport,
        attempt: u32,
    ) -> std::result::Result<Completion, Failure> {
        let commands = target.commands.clone();
        let verifier = ChecksumVerifier::new(&commands, self.command_timeout);
        let checksum = target.image.checksum.clone();

        if verifier.check(transport, &checksum, log).await? == ChecksumState::Matches {
            log.append(
                "Firmware already upgraded previously. Identical checksum found on the device, upgrade not needed.",
            )?;
            return Ok(Completion::AlreadyInstalled);
        }

        let path = commands.remote_path(&target.image.file_name);
        log.append(format!("Uploading image to {path}"))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_upload_attempt();
        }
        if let Err(err) = transport.upload(&target.image.content, &path).await {
            return Err(Failure::Recoverable(err.to_string()));
        }

        log.append("Testing image")?;
        let test = run_command(transport, &commands.test(&path), self.command_timeout)
            .await
            .map_err(UpgradeError::from)?;
        if !test.success() {
            fwu_warn!(
                context = log.context().with_attempt(attempt),
                "image rejected by dry run (exit {})",
                test.exit_code
            );
            return Err(Failure::Incompatible(if test.output.trim().is_empty() {
                format!("Image test failed with exit status {}", test.exit_code)
            } else {
                test.output
            }));
        }

        log.append("Upgrade operation in progress")?;
        match run_command(transport, &commands.flash(&path), self.flash_timeout).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                return Err(Failure::Fatal(format!(
                    "Upgrade failed: flash command exited with status {}: {}",
                    output.exit_code,
                    output.output.trim()
                )));
            }
            Err(err) if err.is_connectivity() => {
                fwu_debug!(
                    context = log.context().with_attempt(attempt),
                    "connection dropped by flash as expected: {}",
                    err
                );
            }
            Err(err) => return Err(Failure::Fatal(format!("Upgrade failed: {err}"))),
        }
        transport.disconnect().await;

        let reconnect = ReconnectLoop::new(self.reconnect, self.metrics.clone());
        let verifier = &verifier;
        let checksum = checksum.as_str();
        let outcome = reconnect
            .run(transport, log, move || async move {
                log.append("Connected! Writing checksum")?;
                verifier.write(transport, checksum).await?;
                Ok::<(), UpgradeError>(())
            })
            .await?;

        match outcome {
            ReconnectOutcome::Connected { .. } => {
                target.connection.mark_working(Utc::now());
                self.store.save_connection(target.connection.clone())?;
                log.append("Upgrade completed successfully")?;
                Ok(Completion::Upgraded)
            }
            ReconnectOutcome::Exhausted { last_error, .. } => {
                fwu_warn!(
                    context = log.context(),
                    "reconnect budget exhausted: {}",
                    last_error
                );
                target.connection.mark_failed(GIVING_UP, Utc::now());
                self.store.save_connection(target.connection.clone())?;
                Err(Failure::Fatal(GIVING_UP.to_owned()))
            }
            ReconnectOutcome::Fatal { error, .. } => {
                Err(Failure::Fatal(format!("Upgrade failed: {error}")))
            }
        }
    }

    /// Flag the assignment installed unless it moved to another image meanwhile.
    fn mark_installed(&self, firmware_id: &str, image_id: &str) -> Result<()> {
        let mut firmware = self.store.device_firmware(firmware_id)?;
        if firmware.image == image_id && !firmware.installed {
            firmware.installed = true;
            self.store.save_device_firmware(firmware)?;
        }
        Ok(())
    }

    /// Close the operation as failed after an internal error, then surface it.
    fn abandon(
        &self,
        log: &OperationLog,
        err: UpgradeError,
        started: Instant,
    ) -> Result<OperationStatus> {
        if let Err(log_err) = log.append(format!("Upgrade failed: {err}")) {
            fwu_warn!(context = log.context(), "unable to log failure: {}", log_err);
        }
        if let Err(finish_err) = self.finish(log, OperationStatus::Failed, started) {
            fwu_warn!(
                context = log.context(),
                "unable to close operation: {}",
                finish_err
            );
        }
        Err(err)
    }

    fn finish(
        &self,
        log: &OperationLog,
        status: OperationStatus,
        started: Instant,
    ) -> Result<OperationStatus> {
        log.finish(status)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(status, started.elapsed());
        }
        Ok(status)
    }
}

impl From<fwu_persistence::StoreError> for Failure {
    fn from(err: fwu_persistence::StoreError) -> Self {
        Failure::Internal(err.into())
    }
}
