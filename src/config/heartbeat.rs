use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::MIN_HEARTBEAT_INTERVAL_MS;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HeartbeatConfig {
    /// Renewal interval for announced nodes. An entry synced less than this
    /// long ago is skipped unless dirty.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Period of the reconciliation task. Defaults to `interval_ms`.
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            tick_interval_ms: None,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.unwrap_or(self.interval_ms))
    }

    pub(super) fn validate(&self) -> Result<()> {
        if self.interval_ms < MIN_HEARTBEAT_INTERVAL_MS {
            return Err(Error::Config(ConfigError::Message(format!(
                "heartbeat.interval_ms {}ms is too short, minimum is {}ms",
                self.interval_ms, MIN_HEARTBEAT_INTERVAL_MS
            ))));
        }

        if let Some(tick) = self.tick_interval_ms {
            if tick < 100 {
                return Err(Error::Config(ConfigError::Message(
                    "heartbeat.tick_interval_ms must be at least 100ms".into(),
                )));
            }
        }

        Ok(())
    }
}

fn default_interval_ms() -> u64 {
    30_000
}
