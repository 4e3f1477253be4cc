//! Views that follow a path for as long as they live.

use std::sync::Arc;

use super::NodeInfo;
use super::ObserverHandle;
use super::PathSubscription;
use super::ServiceInfo;

/// Member list of one service, refreshed by the watch dispatcher.
///
/// Reads never touch the store. After [`UpdatingServiceInfo::destroy`] (or
/// drop) the view stops following and keeps its last value.
pub struct UpdatingServiceInfo {
    subscription: Arc<PathSubscription<ServiceInfo>>,
    handle: ObserverHandle,
}

impl UpdatingServiceInfo {
    pub(crate) fn new(
        subscription: Arc<PathSubscription<ServiceInfo>>,
        handle: ObserverHandle,
    ) -> Self {
        Self { subscription, handle }
    }

    pub fn cluster_id(&self) -> &str {
        &self.subscription.target().cluster_id
    }

    pub fn service_id(&self) -> &str {
        self.subscription.target().service_id.as_deref().unwrap_or_default()
    }

    /// Latest member list; `None` while the service path is absent or
    /// could not be read.
    pub fn get(&self) -> Option<ServiceInfo> {
        self.subscription.current()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.get().map(|info| info.node_ids).unwrap_or_default()
    }

    pub fn is_following(&self) -> bool {
        self.handle.is_active()
    }

    pub fn destroy(&self) {
        self.handle.destroy();
    }
}

/// Attributes of one node, refreshed by the watch dispatcher.
pub struct UpdatingNodeInfo {
    subscription: Arc<PathSubscription<NodeInfo>>,
    handle: ObserverHandle,
}

impl UpdatingNodeInfo {
    pub(crate) fn new(
        subscription: Arc<PathSubscription<NodeInfo>>,
        handle: ObserverHandle,
    ) -> Self {
        Self { subscription, handle }
    }

    pub fn cluster_id(&self) -> &str {
        &self.subscription.target().cluster_id
    }

    pub fn service_id(&self) -> &str {
        self.subscription.target().service_id.as_deref().unwrap_or_default()
    }

    pub fn node_id(&self) -> &str {
        self.subscription.target().node_id.as_deref().unwrap_or_default()
    }

    /// Latest published attributes; `None` while the node is absent.
    pub fn get(&self) -> Option<NodeInfo> {
        self.subscription.current()
    }

    pub fn attribute(
        &self,
        key: &str,
    ) -> Option<String> {
        self.get().and_then(|info| info.attribute(key).map(str::to_string))
    }

    pub fn is_following(&self) -> bool {
        self.handle.is_active()
    }

    pub fn destroy(&self) {
        self.handle.destroy();
    }
}
