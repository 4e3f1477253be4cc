//! Presence registry: announcement, discovery and change notification for
//! `(cluster, service, node)` identities.
//!
//! ```text
//! announce/hide/show ──> AnnouncementTable <── HeartbeatScheduler ──> store writes
//! lookup/observe ──> PresenceResolver ──> PathCache / store reads (+ watch)
//!                           ▲
//! store watch events ──> WatchDispatcher ──> ObserverRegistry ──> callbacks
//! ```

mod announcement;
mod dispatcher;
mod heartbeat;
mod lookup;
mod observer;
mod service;
mod updating;
pub use announcement::*;
pub use dispatcher::*;
pub use heartbeat::*;
pub use lookup::*;
pub use observer::*;
pub use service::*;
pub use updating::*;

#[cfg(test)]
mod lookup_test;
#[cfg(test)]
mod service_test;

use std::collections::HashSet;

use crate::Attributes;
use crate::Error;

/// Published attributes of one node.
///
/// Equality compares the attribute map only, so a rewrite of an identical
/// payload is not seen as a change.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub cluster_id: String,
    pub service_id: String,
    pub node_id: String,
    pub attributes: Attributes,
}

impl NodeInfo {
    pub fn new(
        cluster_id: impl Into<String>,
        service_id: impl Into<String>,
        node_id: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            service_id: service_id.into(),
            node_id: node_id.into(),
            attributes,
        }
    }

    pub fn attribute(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl PartialEq for NodeInfo {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.attributes == other.attributes
    }
}

impl Eq for NodeInfo {}

/// Member list of one service. Equality ignores member order.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub cluster_id: String,
    pub service_id: String,
    pub node_ids: Vec<String>,
}

impl ServiceInfo {
    pub fn new(
        cluster_id: impl Into<String>,
        service_id: impl Into<String>,
        node_ids: Vec<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            service_id: service_id.into(),
            node_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    pub fn contains(
        &self,
        node_id: &str,
    ) -> bool {
        self.node_ids.iter().any(|n| n == node_id)
    }
}

impl PartialEq for ServiceInfo {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.node_ids.len() == other.node_ids.len()
            && self.node_ids.iter().collect::<HashSet<_>>() == other.node_ids.iter().collect::<HashSet<_>>()
    }
}

impl Eq for ServiceInfo {}

/// Outcome of a lookup: the caller can tell a confirmed absence from a
/// failed read.
#[derive(Debug)]
pub enum Lookup<T> {
    Found(T),
    /// The path does not exist; an existence watch is armed
    NotFound,
    /// Store or decode failure
    Error(Error),
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Lookup::NotFound)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Lookup::Error(_))
    }

    /// Collapses absence and failure into `None`
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::Error(_) => None,
        }
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}
