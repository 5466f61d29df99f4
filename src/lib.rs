//! voxhold - keeps an on-device streaming speech recognizer warm.
//!
//! A [`RecognizerManager`] loads one expensive model lazily, shares it across
//! concurrent recognition streams, defers configuration changes until those
//! streams drain, and evicts the model after an idle period.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod error;
pub mod recognizer;
pub mod stt;

// Lifecycle manager
pub use recognizer::{
    ConfigFingerprint, FlagValue, LoadObserver, ManagerState, PrepareOutcome, RecognizerManager,
    RecognizerManagerBuilder, RetentionPolicy, StreamSession,
};

// Backend capability
pub use recognizer::{InferenceBackend, MockBackend, ModelHandle, StreamHandle};
pub use stt::WhisperBackend;

// Error handling
pub use error::{Result, VoxholdError};

// Config
pub use config::Config;

// Audio input
pub use audio::WavClip;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

/// Install a `tracing` fmt subscriber filtered by `VOXHOLD_LOG` (default `warn`).
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_env(defaults::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    if tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .is_err()
    {
        tracing::trace!("logging already initialized");
    }
}
