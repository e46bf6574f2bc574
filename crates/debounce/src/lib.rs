//! Debounced work invocation
//!
//! This crate provides a thread-safe debouncer that collapses bursts of
//! submitted work into a single execution:
//! - Last-write-wins: only the most recent submission runs
//! - Quiet-period firing after a configurable delay
//! - Optional call-count and wait-time limits that force early execution
//! - Pluggable timers (dedicated thread or tokio runtime)
//! - Explicit cancel / shutdown

pub mod config;
pub mod debounce;
pub mod error;
pub mod stats;
pub mod timer;

// Re-exports
pub use config::{DebounceConfig, DebounceSettings};
pub use debounce::Debouncer;
pub use error::{ConfigError, DebounceError};
pub use stats::{DebounceStats, FireReason};
pub use timer::{Task, ThreadTimer, Timer, TimerHandle, TokioTimer};

/// Result type for debouncer operations
pub type Result<T> = std::result::Result<T, DebounceError>;
