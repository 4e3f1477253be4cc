//! Cache-first reads of service member lists and node attributes.
//!
//! Every store read arms a watch, so a cached entry stays valid until the
//! [`crate::WatchDispatcher`] sees the path change. A read that loses the
//! race with that invalidation is returned to the caller but not cached. Absence is never cached:
//! a missing path arms an existence watch and reports [`Lookup::NotFound`].

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use super::Lookup;
use super::NodeInfo;
use super::ServiceInfo;
use crate::AttributeSerializer;
use crate::Error;
use crate::PathCache;
use crate::PathScheme;
use crate::StoreClient;
use crate::StoreError;

/// Retries after an existence watch finds the path already re-created
const MAX_READ_ATTEMPTS: usize = 2;

pub struct PresenceResolver {
    scheme: PathScheme,
    store: Arc<dyn StoreClient>,
    cache: Arc<PathCache>,
    serializer: Arc<dyn AttributeSerializer>,
}

enum Read<T> {
    Value(T),
    Missing,
}

impl PresenceResolver {
    pub fn new(
        scheme: PathScheme,
        store: Arc<dyn StoreClient>,
        cache: Arc<PathCache>,
        serializer: Arc<dyn AttributeSerializer>,
    ) -> Self {
        Self {
            scheme,
            store,
            cache,
            serializer,
        }
    }

    pub fn scheme(&self) -> &PathScheme {
        &self.scheme
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    /// Service ids registered under `cluster_id`, sorted.
    pub async fn cluster(
        &self,
        cluster_id: &str,
        use_cache: bool,
    ) -> Lookup<Vec<String>> {
        let path = match self.scheme.cluster_path(cluster_id) {
            Ok(path) => path,
            Err(e) => return Lookup::Error(e),
        };

        let cached = if use_cache {
            self.cache.get(&path).and_then(|e| e.children.clone())
        } else {
            None
        };
        let mut service_ids = match cached {
            Some(children) => children,
            None => match self.read_children(&path).await {
                Ok(Read::Value(children)) => children,
                Ok(Read::Missing) => return Lookup::NotFound,
                Err(e) => return Lookup::Error(e.into()),
            },
        };
        service_ids.sort();
        Lookup::Found(service_ids)
    }

    pub async fn service(
        &self,
        cluster_id: &str,
        service_id: &str,
        use_cache: bool,
    ) -> Lookup<ServiceInfo> {
        let path = match self.scheme.service_path(cluster_id, service_id) {
            Ok(path) => path,
            Err(e) => return Lookup::Error(e),
        };

        if use_cache {
            if let Some(children) = self.cache.get(&path).and_then(|e| e.children.clone()) {
                return Lookup::Found(ServiceInfo::new(cluster_id, service_id, children));
            }
        }

        match self.read_children(&path).await {
            Ok(Read::Value(children)) => Lookup::Found(ServiceInfo::new(cluster_id, service_id, children)),
            Ok(Read::Missing) => Lookup::NotFound,
            Err(e) => Lookup::Error(e.into()),
        }
    }

    pub async fn node(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
        use_cache: bool,
    ) -> Lookup<NodeInfo> {
        let path = match self.scheme.node_path(cluster_id, service_id, node_id) {
            Ok(path) => path,
            Err(e) => return Lookup::Error(e),
        };

        let cached = if use_cache {
            self.cache.get(&path).and_then(|e| e.data.clone())
        } else {
            None
        };
        let data = match cached {
            Some(data) => data,
            None => match self.read_data(&path).await {
                Ok(Read::Value(data)) => data,
                Ok(Read::Missing) => return Lookup::NotFound,
                Err(e) => return Lookup::Error(e.into()),
            },
        };

        match self.serializer.deserialize(&data) {
            Ok(attributes) => Lookup::Found(NodeInfo::new(cluster_id, service_id, node_id, attributes)),
            Err(e) => {
                warn!(%path, error = %e, "could not decode node attributes");
                Lookup::Error(Error::Serialization(e))
            }
        }
    }

    /// Children of an arbitrary path, straight from the store. Empty on any
    /// error.
    pub async fn children(
        &self,
        path: &str,
    ) -> Vec<String> {
        match self.store.get_children(path, false).await {
            Ok((children, _)) => children,
            Err(e) if e.is_no_node() => Vec::new(),
            Err(e) => {
                warn!(%path, error = %e, "could not list children");
                Vec::new()
            }
        }
    }

    /// Arms a one-shot existence watch. Returns whether the path exists.
    pub async fn watch_existence(
        &self,
        path: &str,
    ) -> Result<bool, StoreError> {
        match self.store.exists(path, true).await {
            Ok(stat) => Ok(stat.is_some()),
            Err(e) => {
                warn!(%path, error = %e, "could not arm existence watch");
                Err(e)
            }
        }
    }

    async fn read_children(
        &self,
        path: &str,
    ) -> Result<Read<Vec<String>>, StoreError> {
        for _ in 0..MAX_READ_ATTEMPTS {
            let epoch = self.cache.epoch(path);
            match self.store.get_children(path, true).await {
                Ok((children, stat)) => {
                    self.cache
                        .put_if_current(path, epoch, stat.cversion, None, Some(children.clone()));
                    return Ok(Read::Value(children));
                }
                Err(e) if e.is_no_node() => {
                    debug!(%path, "path absent, watching for creation");
                    if !self.watch_existence(path).await? {
                        return Ok(Read::Missing);
                    }
                }
                Err(e) => {
                    warn!(%path, error = %e, "could not read children");
                    return Err(e);
                }
            }
        }
        Ok(Read::Missing)
    }

    async fn read_data(
        &self,
        path: &str,
    ) -> Result<Read<Vec<u8>>, StoreError> {
        for _ in 0..MAX_READ_ATTEMPTS {
            let epoch = self.cache.epoch(path);
            match self.store.get_data(path, true).await {
                Ok((data, stat)) => {
                    self.cache.put_if_current(path, epoch, stat.version, Some(data.clone()), None);
                    return Ok(Read::Value(data));
                }
                Err(e) if e.is_no_node() => {
                    debug!(%path, "node path absent");
                    if !self.watch_existence(path).await? {
                        return Ok(Read::Missing);
                    }
                }
                Err(e) => {
                    warn!(%path, error = %e, "could not read node data");
                    return Err(e);
                }
            }
        }
        Ok(Read::Missing)
    }
}
