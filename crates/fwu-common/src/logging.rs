//! ---
//! fwu_section: "01-core-functionality"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Shared primitives and utilities for the upgrade runtime."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "FWU_LOG";
const PREFIX_ENV: &str = "FWU_LOG_PREFIX";

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Available log formats for the CLI and embedding services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// File name prefix of the rolling logs: `FWU_LOG_PREFIX`, then the
/// configured prefix, then the service name.
pub fn log_file_prefix(service_name: &str, config: &LoggingConfig) -> String {
    std::env::var(PREFIX_ENV)
        .ok()
        .filter(|prefix| !prefix.trim().is_empty())
        .or_else(|| config.file_prefix.clone())
        .unwrap_or_else(|| service_name.to_owned())
}

fn log_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to info logging",
                LOG_ENV, err
            );
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `FWU_LOG` overrides the log filter (e.g. `info`, `debug,fwu_core=trace`).
///   When unset the standard `RUST_LOG` variable is honoured, finally defaulting to
///   `info`.
/// * The console layer writes to stderr, so command output on stdout stays
///   machine readable.
/// * `<prefix>-<service>.log` rolls daily with every event as JSON; with
///   `operation_log` enabled, `<prefix>-operations.log` only receives events
///   carrying an `operation` field, the per-device upgrade trail.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = log_file_prefix(service_name, config);
    let mut guards = Vec::new();

    let (console_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(guard);
    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
    };

    let (file_writer, guard) = tracing_appender::non_blocking(daily(
        &config.directory,
        format!("{}-{}.log", prefix, service_name),
    ));
    guards.push(guard);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    let operation_layer = if config.operation_log {
        let (writer, guard) = tracing_appender::non_blocking(daily(
            &config.directory,
            format!("{}-operations.log", prefix),
        ));
        guards.push(guard);
        Some(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .flatten_event(true)
                .with_writer(writer)
                .with_filter(filter_fn(|metadata| {
                    metadata.is_event() && metadata.fields().field("operation").is_some()
                }))
                .boxed(),
        )
    } else {
        None
    };

    // Only the first initialisation installs a subscriber; keep its writers alive.
    let installed = tracing_subscriber::registry()
        .with(log_filter())
        .with(console_layer)
        .with(file_layer)
        .with(operation_layer)
        .try_init()
        .is_ok();
    if installed {
        let _ = GUARDS.set(guards);
    }

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        prefix = %prefix,
        format = ?config.format,
        operation_log = config.operation_log,
        "tracing initialised"
    );
    Ok(())
}
