//! Tagged event records.
//!
//! Mirrors `original_source/src/logger.c`'s three severities (`LOG_EVENT_INFO`,
//! `LOG_EVENT_SUCCESS`, `LOG_EVENT_ERROR`) but routes them through `tracing`
//! instead of a pipe read by a GTK window; the GUI is an external collaborator
//! that can install its own `tracing` subscriber/layer to render them.

/// Severity of a tagged event record (spec §7: "Info/Success/Error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Info,
    Success,
    Error,
}

/// Emit an info-level event.
#[macro_export]
macro_rules! event_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

/// Emit a success-level event. `tracing` has no dedicated level for this, so
/// it rides on `info!` tagged with `event = "success"`.
#[macro_export]
macro_rules! event_success {
    ($($arg:tt)*) => {
        tracing::info!(event = "success", $($arg)*)
    };
}

/// Emit an error-level event.
#[macro_export]
macro_rules! event_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

/// Install the default subscriber for the `nettalk` binary. A library consumer
/// embedding the core is free to install its own subscriber instead.
pub fn init_default_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
