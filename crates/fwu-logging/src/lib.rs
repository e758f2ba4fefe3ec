//! ---
//! fwu_section: "03-persistence-logging"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Structured logging adapters and sinks."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Logging helpers that attach device and operation identifiers to every
//! tracing event emitted while an upgrade runs.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber writing to stderr.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Device identifier the event refers to.
    pub device: Option<&'a str>,
    /// Upgrade operation identifier.
    pub operation: Option<&'a str>,
    /// Executor run or reconnect attempt number.
    pub attempt: Option<u32>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device identifier.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach an operation identifier.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Attach an attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Terminal outcome used when emitting operation lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The operation reached `success`.
    Success,
    /// The operation was aborted without touching the device firmware.
    Aborted,
    /// The operation failed.
    Fault,
}

impl OperationOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Aborted => "aborted",
            OperationOutcome::Fault => "fault",
        }
    }

    fn level(&self) -> Level {
        match self {
            OperationOutcome::Success => Level::INFO,
            OperationOutcome::Aborted => Level::WARN,
            OperationOutcome::Fault => Level::ERROR,
        }
    }
}

/// Emit a standardized operation event with its outcome.
pub fn log_operation_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: OperationOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    let device = ctx.device.unwrap_or("");
    let operation = ctx.operation.unwrap_or("");
    let attempt = ctx.attempt.unwrap_or_default();
    let outcome_str = outcome.as_str();
    // `tracing::event!` needs a constant level.
    match outcome.level() {
        Level::ERROR => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome_str,
            device,
            operation,
            attempt,
            message = %message
        ),
        Level::WARN => tracing::event!(
            Level::WARN,
            event,
            outcome = outcome_str,
            device,
            operation,
            attempt,
            message = %message
        ),
        _ => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome_str,
            device,
            operation,
            attempt,
            message = %message
        ),
    }
}
