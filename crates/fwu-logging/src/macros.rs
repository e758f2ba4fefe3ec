//! ---
//! fwu_section: "03-persistence-logging"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Structured logging adapters and sinks."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---

#[doc(hidden)]
#[macro_export]
macro_rules! __fwu_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            device = ctx.device.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with upgrade context.
#[macro_export]
macro_rules! fwu_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with upgrade context.
#[macro_export]
macro_rules! fwu_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with upgrade context.
#[macro_export]
macro_rules! fwu_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with upgrade context.
#[macro_export]
macro_rules! fwu_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fwu_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
