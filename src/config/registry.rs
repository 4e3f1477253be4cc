use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Acl;
use crate::CreateMode;
use crate::Error;
use crate::PathScheme;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Root under which `presence/` lives
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Create mode of announced leaf nodes; session-scoped nodes are reaped
    /// by the store when the owning process disappears
    #[serde(default = "default_create_mode")]
    pub announce_create_mode: CreateMode,

    /// ACL attached to every node the registry creates
    #[serde(default = "default_acl")]
    pub default_acl: Vec<Acl>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            announce_create_mode: default_create_mode(),
            default_acl: default_acl(),
        }
    }
}

impl RegistryConfig {
    pub(super) fn validate(&self) -> Result<()> {
        PathScheme::new(self.base_path.clone())
            .map_err(|e| Error::Config(ConfigError::Message(format!("registry.base_path: {e}"))))?;
        Ok(())
    }
}

fn default_base_path() -> String {
    "/reign".to_string()
}
fn default_create_mode() -> CreateMode {
    CreateMode::Ephemeral
}
fn default_acl() -> Vec<Acl> {
    vec![Acl::open_unsafe()]
}
