//! Runtime builder.

use crate::channel::WaiterPolicy;
use crate::error::Result;
use crate::runtime::config::{ClockMode, RuntimeConfig};
use crate::runtime::env_config;
use crate::runtime::Runtime;
use crate::tracing_compat::debug;

/// Builder for constructing a runtime with custom configuration.
///
/// Builder calls always win over environment variables and config files,
/// regardless of the order in which they are made.
#[derive(Debug, Clone, Default)]
pub struct RuntimeBuilder {
    clock: Option<ClockMode>,
    max_steps: Option<u64>,
    waiter_policy: Option<WaiterPolicy>,
    read_env: bool,
    #[cfg(feature = "config-file")]
    config_file: Option<std::path::PathBuf>,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock mode.
    #[must_use]
    pub fn clock(mut self, clock: ClockMode) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use the virtual clock (the default).
    #[must_use]
    pub fn virtual_clock(self) -> Self {
        self.clock(ClockMode::Virtual)
    }

    /// Use the wall clock.
    #[must_use]
    pub fn wall_clock(self) -> Self {
        self.clock(ClockMode::Wall)
    }

    /// Set the step limit (0 = unlimited).
    #[must_use]
    pub fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Set the waiter policy used by [`Handle::channel`](super::Handle::channel).
    #[must_use]
    pub fn waiter_policy(mut self, policy: WaiterPolicy) -> Self {
        self.waiter_policy = Some(policy);
        self
    }

    /// Apply `COOPSYNC_*` environment variables when building.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.read_env = true;
        self
    }

    /// Load defaults from a TOML file when building.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn config_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Resolves the final configuration without building a runtime.
    pub fn config(&self) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig::default();

        #[cfg(feature = "config-file")]
        if let Some(path) = &self.config_file {
            let toml = env_config::parse_toml_file(path)?;
            env_config::apply_toml_config(&mut config, &toml)?;
        }

        if self.read_env {
            env_config::apply_env_overrides(&mut config)?;
        }

        if let Some(clock) = self.clock {
            config.clock = clock;
        }
        if let Some(steps) = self.max_steps {
            config.max_steps = steps;
        }
        if let Some(policy) = self.waiter_policy {
            config.waiter_policy = policy;
        }
        Ok(config)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime> {
        let config = self.config()?;
        debug!(
            clock = %config.clock,
            max_steps = config.max_steps,
            waiter_policy = ?config.waiter_policy,
            "runtime configured"
        );
        Ok(Runtime::with_config(config))
    }
}
