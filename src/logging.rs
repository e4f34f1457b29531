//! Log output for migration runs.
//!
//! Schemaflow logs through `tracing`. Applications that already install a
//! subscriber need nothing from this module. Otherwise [`init`] installs a
//! `tracing-subscriber` fmt layer configured from the environment:
//!
//! - `SCHEMAFLOW_DEBUG=true|1|yes` - log at debug level
//! - `SCHEMAFLOW_LOG_LEVEL=trace|debug|info|warn|error` - explicit level
//! - `SCHEMAFLOW_LOG_FORMAT=json|pretty|compact` - output format (default: compact)
//!
//! ```rust,no_run
//! schemaflow::logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "SCHEMAFLOW_DEBUG";
const LEVEL_VAR: &str = "SCHEMAFLOW_LOG_LEVEL";
const FORMAT_VAR: &str = "SCHEMAFLOW_LOG_FORMAT";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    Compact,
}

/// Whether `SCHEMAFLOW_DEBUG` asks for debug output.
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// The level from `SCHEMAFLOW_LOG_LEVEL`, falling back to `debug` when
/// debugging is enabled and `info` otherwise.
pub fn log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "info" };
    match env::var(LEVEL_VAR).map(|l| l.to_ascii_lowercase()) {
        Ok(level) => match level.as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// The format from `SCHEMAFLOW_LOG_FORMAT`.
pub fn log_format() -> LogFormat {
    match env::var(FORMAT_VAR).map(|f| f.to_ascii_lowercase()).as_deref() {
        Ok("json") => LogFormat::Json,
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

/// Install the subscriber. Only the first call has an effect.
///
/// Does nothing unless `SCHEMAFLOW_DEBUG` or `SCHEMAFLOW_LOG_LEVEL` is set,
/// or when built without the `tracing-subscriber` feature.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = log_level();
            let filter = EnvFilter::try_new(format!(
                "schemaflow={level},schemaflow_sql={level},schemaflow_migrate={level}"
            ))
            .unwrap_or_else(|_| EnvFilter::new("info"));
            let registry = tracing_subscriber::registry().with(filter);

            // try_init: the host application may have installed its own.
            let installed = match log_format() {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
            };
            if installed.is_ok() {
                tracing::debug!(level, format = ?log_format(), "Schemaflow logging initialized");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_environment() {
        // SAFETY: no other test in this crate reads these variables.
        unsafe {
            env::remove_var(DEBUG_VAR);
            env::remove_var(LEVEL_VAR);
            env::remove_var(FORMAT_VAR);
        }
        assert!(!is_debug_enabled());
        assert_eq!(log_level(), "info");
        assert_eq!(log_format(), LogFormat::Compact);
    }
}
