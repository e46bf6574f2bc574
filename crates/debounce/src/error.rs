//! Error types for debouncer construction and operation

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable debounce configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `delay_ms` was negative in a settings file
    #[error("delay must not be negative (got {0}ms)")]
    NegativeDelay(i64),

    /// A call limit of zero can never be satisfied meaningfully
    #[error("max_calls must be at least 1 (use no limit instead of 0)")]
    ZeroMaxCalls,

    /// A wait limit of zero would fire on every submission
    #[error("max_wait must be greater than zero (use max_calls = 1 to fire on every call)")]
    ZeroMaxWait,

    /// A value does not fit the target representation
    #[error("{0} is out of range")]
    OutOfRange(&'static str),

    /// Settings file could not be read
    #[error("failed to read debounce settings from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Settings file is not valid TOML for [`crate::DebounceSettings`]
    #[error("failed to parse debounce settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors returned by [`crate::Debouncer`]
#[derive(Debug, Error)]
pub enum DebounceError {
    #[error("invalid debounce configuration: {0}")]
    Config(#[from] ConfigError),

    /// The debouncer was shut down; the work was dropped unexecuted
    #[error("debouncer has been shut down")]
    Shutdown,

    /// The timer backend is no longer running; the work was dropped
    #[error("debounce timer has stopped; work was not scheduled")]
    TimerStopped,

    /// The background timer thread could not be started
    #[error("failed to spawn debounce timer thread: {0}")]
    TimerSpawn(#[source] io::Error),

    /// A tokio-backed debouncer was requested outside of a runtime
    #[error("no tokio runtime is available on this thread")]
    NoRuntime,
}
