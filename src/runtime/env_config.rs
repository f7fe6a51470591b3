//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`max_steps(10_000)`)
//! 2. **Environment variables**: values from `COOPSYNC_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `COOPSYNC_CLOCK` | `virtual`/`wall` | `clock` |
//! | `COOPSYNC_MAX_STEPS` | `u64` | `max_steps` |
//! | `COOPSYNC_WAITER_POLICY` | `single`/`queued` | `waiter_policy` |

use crate::runtime::config::{ConfigError, RuntimeConfig};

/// Environment variable name for the clock mode.
pub const ENV_CLOCK: &str = "COOPSYNC_CLOCK";
/// Environment variable name for the scheduler step limit.
pub const ENV_MAX_STEPS: &str = "COOPSYNC_MAX_STEPS";
/// Environment variable name for the default channel waiter policy.
pub const ENV_WAITER_POLICY: &str = "COOPSYNC_WAITER_POLICY";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_CLOCK) {
        config.clock = val.parse().map_err(|_| {
            ConfigError::invalid(ENV_CLOCK, "virtual or wall", &val)
        })?;
    }
    if let Some(val) = read_env(ENV_MAX_STEPS) {
        config.max_steps = parse_u64(ENV_MAX_STEPS, &val)?;
    }
    if let Some(val) = read_env(ENV_WAITER_POLICY) {
        config.waiter_policy = val.parse().map_err(|_| {
            ConfigError::invalid(ENV_WAITER_POLICY, "single or queued", &val)
        })?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(var_name, "unsigned integer", val))
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [runtime]
/// clock = "virtual"
/// max_steps = 100000
///
/// [channel]
/// waiter_policy = "queued"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Executor settings.
    #[serde(default)]
    pub runtime: RuntimeToml,
    /// Channel defaults.
    #[serde(default)]
    pub channel: ChannelToml,
}

/// Runtime section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeToml {
    /// `"virtual"` or `"wall"`.
    pub clock: Option<String>,
    /// Step limit (0 = unlimited).
    pub max_steps: Option<u64>,
}

/// Channel section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ChannelToml {
    /// `"single"` or `"queued"`.
    pub waiter_policy: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields present in the TOML override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    config: &mut RuntimeConfig,
    toml: &RuntimeTomlConfig,
) -> Result<(), ConfigError> {
    if let Some(ref v) = toml.runtime.clock {
        config.clock = v
            .parse()
            .map_err(|_| ConfigError::invalid("runtime.clock", "virtual or wall", v))?;
    }
    if let Some(v) = toml.runtime.max_steps {
        config.max_steps = v;
    }
    if let Some(ref v) = toml.channel.waiter_policy {
        config.waiter_policy = v.parse().map_err(|_| {
            ConfigError::invalid("channel.waiter_policy", "single or queued", v)
        })?;
    }
    Ok(())
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
