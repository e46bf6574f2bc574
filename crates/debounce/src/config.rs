//! Debouncer configuration
//!
//! Two forms are supported:
//! 1. [`DebounceConfig`] - the validated, strongly typed form used at runtime
//! 2. [`DebounceSettings`] - the serde form read from TOML files
//!
//! Settings files follow the "negative means unlimited" convention for the
//! optional limits, so `max_calls = -1` disables the call limit.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime configuration for a [`crate::Debouncer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Quiet period after the last submission before the work fires
    pub delay: Duration,

    /// Force an immediate fire once this many submissions land in one
    /// window (default: unlimited)
    pub max_calls: Option<usize>,

    /// Force an immediate fire once this much time has passed since the
    /// window started (default: unlimited)
    pub max_wait: Option<Duration>,
}

impl DebounceConfig {
    /// Config with the given delay and no limits
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_calls: None,
            max_wait: None,
        }
    }

    pub fn with_max_calls(mut self, max_calls: usize) -> Self {
        self.max_calls = Some(max_calls);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Reject limits that can never behave like a debounce
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_calls == Some(0) {
            return Err(ConfigError::ZeroMaxCalls);
        }
        if self.max_wait == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroMaxWait);
        }
        Ok(())
    }

    /// Call-limit condition, checked first
    pub(crate) fn call_limit_reached(&self, calls: usize) -> bool {
        matches!(self.max_calls, Some(limit) if calls >= limit)
    }

    /// Time-limit condition, checked after the call limit
    pub(crate) fn time_limit_reached(&self, elapsed: Duration) -> bool {
        matches!(self.max_wait, Some(limit) if elapsed >= limit)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DELAY_MS as u64))
    }
}

const DEFAULT_DELAY_MS: i64 = 100;

/// On-disk debounce settings
///
/// ```toml
/// delay_ms = 250
/// max_calls = 10
/// max_wait_ms = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebounceSettings {
    /// Quiet period in milliseconds (default: 100)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: i64,

    /// Call limit per window; absent or negative means unlimited
    #[serde(default)]
    pub max_calls: Option<i64>,

    /// Wait limit per window in milliseconds; absent or negative means unlimited
    #[serde(default)]
    pub max_wait_ms: Option<i64>,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
            max_calls: None,
            max_wait_ms: None,
        }
    }
}

fn default_delay_ms() -> i64 {
    DEFAULT_DELAY_MS
}

impl DebounceSettings {
    /// Parse settings from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Convert and validate in one step
    pub fn into_config(self) -> Result<DebounceConfig, ConfigError> {
        DebounceConfig::try_from(self)
    }
}

impl TryFrom<DebounceSettings> for DebounceConfig {
    type Error = ConfigError;

    fn try_from(settings: DebounceSettings) -> Result<Self, Self::Error> {
        if settings.delay_ms < 0 {
            return Err(ConfigError::NegativeDelay(settings.delay_ms));
        }

        let max_calls = match settings.max_calls {
            Some(n) if n >= 0 => {
                Some(usize::try_from(n).map_err(|_| ConfigError::OutOfRange("max_calls"))?)
            }
            _ => None,
        };

        let config = DebounceConfig {
            delay: Duration::from_millis(settings.delay_ms as u64),
            max_calls,
            max_wait: settings
                .max_wait_ms
                .filter(|ms| *ms >= 0)
                .map(|ms| Duration::from_millis(ms as u64)),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Fails with [`ConfigError::OutOfRange`] when a value does not fit the
/// settings file's `i64` fields. Sub-millisecond durations round up so a
/// non-zero delay never becomes zero.
impl TryFrom<DebounceConfig> for DebounceSettings {
    type Error = ConfigError;

    fn try_from(config: DebounceConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            delay_ms: duration_to_ms(config.delay, "delay")?,
            max_calls: config
                .max_calls
                .map(|n| i64::try_from(n).map_err(|_| ConfigError::OutOfRange("max_calls")))
                .transpose()?,
            max_wait_ms: config
                .max_wait
                .map(|d| duration_to_ms(d, "max_wait"))
                .transpose()?,
        })
    }
}

fn duration_to_ms(duration: Duration, field: &'static str) -> Result<i64, ConfigError> {
    let partial = u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    i64::try_from(duration.as_millis() + partial).map_err(|_| ConfigError::OutOfRange(field))
}
