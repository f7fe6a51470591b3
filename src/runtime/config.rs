//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `clock` | [`ClockMode::Virtual`] |
//! | `max_steps` | 0 (unlimited) |
//! | `waiter_policy` | [`WaiterPolicy::SingleSlot`] |

use crate::channel::WaiterPolicy;
use std::fmt;
use std::str::FromStr;

/// Errors produced while assembling a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("invalid value for {field}: expected {expected}, got {got:?}")]
    InvalidValue {
        /// Variable or key that carried the value.
        field: String,
        /// Human-readable description of the accepted values.
        expected: &'static str,
        /// The raw value.
        got: String,
    },
    /// A config file could not be read.
    #[error("failed to read config file {path}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A config file could not be parsed.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, expected: &'static str, got: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            expected,
            got: got.to_string(),
        }
    }
}

/// Source of time for timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Time only moves when the executor jumps to the next armed timer.
    ///
    /// Runs are deterministic and never sleep.
    #[default]
    Virtual,
    /// Time follows the monotonic wall clock; idle executors sleep.
    Wall,
}

impl FromStr for ClockMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "virtual" | "lab" => Ok(Self::Virtual),
            "wall" | "real" => Ok(Self::Wall),
            _ => Err(ConfigError::invalid("clock", "virtual or wall", s)),
        }
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtual => f.write_str("virtual"),
            Self::Wall => f.write_str("wall"),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeConfig {
    /// Clock driving timers and `schedule_later`.
    pub clock: ClockMode,
    /// Maximum number of scheduler steps per `block_on`/`run_until_idle`
    /// call (0 = unlimited). A step is one task poll or one timer callback.
    pub max_steps: u64,
    /// Waiter policy used by [`Handle::channel`](super::Handle::channel).
    pub waiter_policy: WaiterPolicy,
}

impl RuntimeConfig {
    /// Returns true if `steps` has reached the configured limit.
    #[must_use]
    pub const fn step_limit_reached(&self, steps: u64) -> bool {
        self.max_steps != 0 && steps >= self.max_steps
    }
}
