use tracing::debug;
use tracing::warn;

use super::Acl;
use super::CreateMode;
use super::StoreClient;
use super::StoreResult;
use crate::PathScheme;

/// Upserts `path` with `leaf_data`.
///
/// 1. `set_data` (cheapest when the node already exists)
/// 2. `create` of the leaf alone when the node is missing
/// 3. walk the path token by token when a parent is missing: ancestors are
///    created `Persistent` with no data, only the leaf gets `mode` and data
///
/// `NodeExists` at any step is treated as success, so concurrent announcers
/// racing on shared ancestors converge. Returns the path written.
pub async fn update_path<S>(
    store: &S,
    path: &str,
    leaf_data: &[u8],
    acl: &[Acl],
    mode: CreateMode,
) -> StoreResult<String>
where
    S: StoreClient + ?Sized,
{
    match store.set_data(path, leaf_data, None).await {
        Ok(_) => return Ok(path.to_string()),
        Err(e) if e.is_no_node() => {
            debug!(%path, "update_path: node does not exist for data update");
        }
        Err(e) => {
            warn!(%path, error = %e, "update_path: data update failed");
            return Err(e);
        }
    }

    match store.create(path, leaf_data, acl, mode).await {
        Ok(created) => {
            debug!(path = %created, "Created path directly");
            return Ok(created);
        }
        Err(e) if e.is_node_exists() => {
            debug!(%path, "Path already exists");
            return Ok(path.to_string());
        }
        Err(e) if e.is_no_node() => {
            debug!(%path, "Parent path does not exist");
        }
        Err(e) => {
            warn!(%path, error = %e, "Error while building path");
            return Err(e);
        }
    }

    let tokens = PathScheme::tokenize(path);
    let mut path_created = String::new();
    for (i, token) in tokens.iter().enumerate() {
        let path_to_create = format!("{path_created}/{token}");
        let is_leaf = i == tokens.len() - 1;
        let (node_data, node_mode): (&[u8], CreateMode) = if is_leaf {
            (leaf_data, mode)
        } else {
            (&[], CreateMode::Persistent)
        };

        match store.create(&path_to_create, node_data, acl, node_mode).await {
            Ok(created) => path_created = created,
            Err(e) if e.is_node_exists() => {
                debug!(path = %path_to_create, "Path already exists");
                path_created = path_to_create;
            }
            Err(e) => {
                warn!(path = %path_to_create, error = %e, "Error while building path");
                return Err(e);
            }
        }
    }

    debug!(path = %path_created, "Created path by building parent nodes");
    Ok(path_created)
}
