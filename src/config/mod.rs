//! Configuration management for the presence registry.
//!
//! Provides hierarchical configuration loading with priority:
//! 1. Default values (hardcoded)
//! 2. Config file named by `CONFIG_PATH`
//! 3. Environment variables with `PRESENCE__` prefix (highest priority)

mod cache;
mod heartbeat;
mod registry;
pub use cache::*;
pub use heartbeat::*;
pub use registry::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Root configuration for a [`crate::PresenceService`]
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct PresenceConfig {
    /// Path layout and announcement defaults
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Soft-state renewal timing
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Path cache sizing
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Debug for PresenceConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PresenceConfig")
            .field("registry", &self.registry)
            .field("heartbeat", &self.heartbeat)
            .field("cache", &self.cache)
            .finish()
    }
}

impl PresenceConfig {
    /// Loads defaults, then `CONFIG_PATH` (if set), then `PRESENCE__*`
    /// environment variables. Does not validate.
    ///
    /// ```ignore
    /// std::env::set_var("PRESENCE__HEARTBEAT__INTERVAL_MS", "15000");
    /// let cfg = PresenceConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("PRESENCE")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Merges an extra TOML file over the current values; environment
    /// variables still win. Does not validate.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("PRESENCE")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(self) -> Result<Self> {
        self.registry.validate()?;
        self.heartbeat.validate()?;
        self.cache.validate()?;
        Ok(self)
    }
}
