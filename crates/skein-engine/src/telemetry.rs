//! Tracing subscriber setup for hosts and demos.
//!
//! The libraries only emit `tracing` events. Binaries call
//! [`init_tracing`] once to print them.

use tracing_subscriber::EnvFilter;

use crate::EngineError;

/// Install a global fmt subscriber. `RUST_LOG` wins over
/// `default_directive` when set and valid.
pub fn init_tracing(default_directive: &str) -> Result<(), EngineError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|err| EngineError::Telemetry {
            reason: err.to_string(),
        })
}
