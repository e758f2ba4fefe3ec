//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
//! Bounded reconnect loop run after a destructive action reboots the device.

use std::future::Future;
use std::time::Duration;

use fwu_common::ReconnectConfig;
use fwu_logging::fwu_debug;
use fwu_transport::{Transport, TransportError};
use tokio::time::sleep;

use crate::error::{Result, UpgradeError};
use crate::metrics::UpgradeMetrics;
use crate::operation::OperationLog;

/// Pacing of the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait before the first attempt only.
    pub settle_delay: Duration,
    /// Wait before every later attempt.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(settle_delay: Duration, interval: Duration, max_attempts: u32) -> Self {
        Self {
            settle_delay,
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.settle_delay, config.interval, config.max_attempts)
    }

    /// `max_attempts` attempts without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, max_attempts)
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 1 {
            self.settle_delay
        } else {
            self.interval
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Connected and the post-connect action succeeded.
    Connected { attempts: u32 },
    /// Every attempt hit a connectivity-class error.
    Exhausted {
        attempts: u32,
        last_error: TransportError,
    },
    /// A non-connectivity error stopped the loop early.
    Fatal { attempt: u32, error: TransportError },
}

pub struct ReconnectLoop {
    policy: ReconnectPolicy,
    metrics: Option<UpgradeMetrics>,
}

impl ReconnectLoop {
    pub fn new(policy: ReconnectPolicy, metrics: Option<UpgradeMetrics>) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Reconnect `transport`, then run `action` on the fresh session.
    ///
    /// A connectivity-class error from either step consumes the attempt.
    /// Any other transport error ends the loop with [`ReconnectOutcome::Fatal`];
    /// non-transport errors from `action` are returned as-is.
    pub async fn run<F, Fut>(
        &self,
        transport: &dyn Transport,
        log: &OperationLog,
        mut action: F,
    ) -> Result<ReconnectOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            sleep(self.policy.delay_before(attempt)).await;
            log.append(format!(
                "Trying to reconnect to device (attempt n.{attempt})"
            ))?;

            let step = match transport.connect().await {
                Ok(()) => action().await,
                Err(err) => Err(UpgradeError::Transport(err)),
            };

            match step {
                Ok(()) => {
                    self.record("connected");
                    return Ok(ReconnectOutcome::Connected { attempts: attempt });
                }
                Err(UpgradeError::Transport(err)) if err.is_connectivity() => {
                    fwu_debug!(
                        context = log.context().with_attempt(attempt),
                        "reconnect attempt failed: {}",
                        err
                    );
                    self.record("unreachable");
                    log.append("Device not reachable yet")?;
                    last_error = Some(err);
                }
                Err(UpgradeError::Transport(error)) => {
                    self.record("fatal");
                    return Ok(ReconnectOutcome::Fatal { attempt, error });
                }
                Err(other) => return Err(other),
            }
        }

        Ok(ReconnectOutcome::Exhausted {
            attempts: self.policy.max_attempts,
            last_error: last_error.unwrap_or_else(|| {
                TransportError::Connectivity("device not reachable".to_owned())
            }),
        })
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_reconnect_attempt(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fwu_persistence::{DeviceFirmware, MemoryStore, RecordStore, UpgradeOperation};
    use fwu_transport::SimulatedDevice;

    fn operation_log() -> (Arc<MemoryStore>, OperationLog) {
        let store = Arc::new(MemoryStore::new());
        let operation =
            UpgradeOperation::new(&DeviceFirmware::new("fw-1", "dev-1", "img-1"), None);
        store.create_operation(operation.clone()).unwrap();
        let log = OperationLog::open(store.clone(), &operation);
        (store, log)
    }

    #[tokio::test]
    async fn unlimited_failures_use_exact_budget() {
        let (_store, log) = operation_log();
        let device = SimulatedDevice::new("ap").unreachable("Connection failed");
        let reconnect = ReconnectLoop::new(ReconnectPolicy::immediate(10), None);
        let outcome = reconnect.run(&device, &log, || async { Ok(()) }).await.unwrap();
        assert!(matches!(outcome, ReconnectOutcome::Exhausted { attempts: 10, .. }));
        assert_eq!(device.connect_calls(), 10);
    }

    #[tokio::test]
    async fn connects_on_third_attempt() {
        let (store, log) = operation_log();
        let device = SimulatedDevice::new("ap").fail_connects(2, "No route to host");
        let reconnect = ReconnectLoop::new(ReconnectPolicy::immediate(10), None);
        let outcome = reconnect.run(&device, &log, || async { Ok(()) }).await.unwrap();
        assert_eq!(outcome, ReconnectOutcome::Connected { attempts: 3 });
        let text = store.operation(log.id()).unwrap().log_text();
        assert!(text.contains("attempt n.1"));
        assert!(text.contains("attempt n.3"));
        assert_eq!(text.matches("Device not reachable yet").count(), 2);
    }

    #[tokio::test]
    async fn action_connectivity_error_consumes_attempt() {
        let (_store, log) = operation_log();
        let device = SimulatedDevice::new("ap");
        let reconnect = ReconnectLoop::new(ReconnectPolicy::immediate(5), None);
        let mut calls = 0;
        let outcome = reconnect
            .run(&device, &log, || {
                calls += 1;
                let result = if calls < 2 {
                    Err(UpgradeError::Transport(TransportError::ConnectionLost(
                        "reset".into(),
                    )))
                } else {
                    Ok(())
                };
                async move { result }
            })
            .await
            .unwrap();
        assert_eq!(outcome, ReconnectOutcome::Connected { attempts: 2 });
    }

    #[tokio::test]
    async fn non_connectivity_error_is_fatal() {
        let (_store, log) = operation_log();
        let device = SimulatedDevice::new("ap");
        let reconnect = ReconnectLoop::new(ReconnectPolicy::immediate(5), None);
        let outcome = reconnect
            .run(&device, &log, || async {
                Err(UpgradeError::Transport(TransportError::Protocol(
                    "read-only filesystem".into(),
                )))
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ReconnectOutcome::Fatal { attempt: 1, .. }));
        assert_eq!(device.connect_calls(), 1);
    }
}
