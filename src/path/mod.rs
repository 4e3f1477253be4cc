//! Presence path naming: `<base_path>/presence/<cluster>/<service>[/<node>]`.


use crate::constants::PATH_SEPARATOR;
use crate::constants::PRESENCE_PATH_TYPE;
use crate::Error;
use crate::Result;

/// Identity components recovered from an absolute presence path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresencePath {
    pub cluster_id: String,
    pub service_id: Option<String>,
    pub node_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PathScheme {
    base_path: String,
}

impl PathScheme {
    pub fn new(base_path: impl Into<String>) -> Result<Self> {
        let base_path = base_path.into();
        if !base_path.starts_with(PATH_SEPARATOR) || (base_path.len() > 1 && base_path.ends_with(PATH_SEPARATOR)) {
            return Err(Error::InvalidPath(format!(
                "base path must be absolute without trailing separator: {base_path}"
            )));
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Non-empty and free of separators
    pub fn is_valid_token(token: &str) -> bool {
        !token.is_empty() && !token.contains(PATH_SEPARATOR)
    }

    pub fn join_tokens(tokens: &[&str]) -> String {
        tokens.join("/")
    }

    /// Splits an absolute or relative path, dropping empty segments.
    pub fn tokenize(path: &str) -> Vec<&str> {
        path.split(PATH_SEPARATOR).filter(|t| !t.is_empty()).collect()
    }

    /// Parent of an absolute path; `None` for the root or a single segment.
    pub fn parent(path: &str) -> Option<&str> {
        match path.rfind(PATH_SEPARATOR) {
            Some(0) | None => None,
            Some(idx) => Some(&path[..idx]),
        }
    }

    pub fn presence_root(&self) -> String {
        format!("{}/{}", self.root_prefix(), PRESENCE_PATH_TYPE)
    }

    pub fn cluster_path(
        &self,
        cluster_id: &str,
    ) -> Result<String> {
        Self::check_tokens(&[cluster_id])?;
        Ok(format!("{}/{}", self.presence_root(), cluster_id))
    }

    pub fn service_path(
        &self,
        cluster_id: &str,
        service_id: &str,
    ) -> Result<String> {
        Self::check_tokens(&[cluster_id, service_id])?;
        Ok(format!("{}/{}/{}", self.presence_root(), cluster_id, service_id))
    }

    pub fn node_path(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> Result<String> {
        Self::check_tokens(&[cluster_id, service_id, node_id])?;
        Ok(format!(
            "{}/{}/{}/{}",
            self.presence_root(),
            cluster_id,
            service_id,
            node_id
        ))
    }

    /// Recovers (cluster, service, node) from an absolute path under the
    /// presence root. Paths outside the root or deeper than a node yield `None`.
    pub fn parse_presence_path(
        &self,
        path: &str,
    ) -> Option<PresencePath> {
        let root = self.presence_root();
        let rest = path.strip_prefix(&root)?.strip_prefix(PATH_SEPARATOR)?;
        let tokens = Self::tokenize(rest);
        match tokens.as_slice() {
            [cluster] => Some(PresencePath {
                cluster_id: cluster.to_string(),
                service_id: None,
                node_id: None,
            }),
            [cluster, service] => Some(PresencePath {
                cluster_id: cluster.to_string(),
                service_id: Some(service.to_string()),
                node_id: None,
            }),
            [cluster, service, node] => Some(PresencePath {
                cluster_id: cluster.to_string(),
                service_id: Some(service.to_string()),
                node_id: Some(node.to_string()),
            }),
            _ => None,
        }
    }

    fn root_prefix(&self) -> &str {
        if self.base_path == "/" {
            ""
        } else {
            &self.base_path
        }
    }

    fn check_tokens(tokens: &[&str]) -> Result<()> {
        for token in tokens {
            if !Self::is_valid_token(token) {
                return Err(Error::InvalidPath(format!("invalid path token: '{token}'")));
            }
        }
        Ok(())
    }
}
