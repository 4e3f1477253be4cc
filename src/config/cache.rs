use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Total number of paths retained before LRU eviction
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Independent LRU segments; paths hash to one segment each
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            shards: default_shards(),
        }
    }
}

impl CacheConfig {
    pub(super) fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config(ConfigError::Message("cache.capacity must be > 0".into())));
        }
        if self.shards == 0 {
            return Err(Error::Config(ConfigError::Message("cache.shards must be > 0".into())));
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    1024
}
fn default_shards() -> usize {
    16
}
