//! Store client abstraction consumed by the registry.
//!
//! The backing store is a hierarchical namespace of versioned nodes with
//! one-shot watches. Reads with `watch = true` arm a watch that fires exactly
//! once; watch notifications are pushed into a [`WatchEventSender`] owned by
//! whoever constructed the client and consumed by the
//! [`crate::WatchDispatcher`].

mod mem_store;
mod path_updater;
pub use mem_store::*;
pub use path_updater::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Inbound side of the watch event channel
pub type WatchEventSender = mpsc::UnboundedSender<WatchedEvent>;
pub type WatchEventReceiver = mpsc::UnboundedReceiver<WatchedEvent>;

/// Node metadata returned alongside reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Store-assigned data version, bumped on every data write
    pub version: u64,
    /// Number of children changes; bumped on child create/delete
    pub cversion: u64,
    /// Last modification time in unix millis
    pub mtime_ms: u64,
    /// Owning session for session-scoped nodes
    pub ephemeral_owner: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    Persistent,
    /// Session-scoped; removed by the store when the creating session ends
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub scheme: String,
    pub id: String,
    pub perms: u32,
}

impl Acl {
    pub const PERM_ALL: u32 = 0x1f;

    /// world:anyone with every permission
    pub fn open_unsafe() -> Self {
        Self {
            scheme: "world".to_string(),
            id: "anyone".to_string(),
            perms: Self::PERM_ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Session state change only; no path
    None,
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Expired,
}

/// A single watch notification as delivered by the store client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub path: Option<String>,
    pub kind: EventKind,
    pub state: ConnectionState,
}

impl WatchedEvent {
    pub fn node(
        path: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            path: Some(path.into()),
            kind,
            state: ConnectionState::Connected,
        }
    }

    pub fn session(state: ConnectionState) -> Self {
        Self {
            path: None,
            kind: EventKind::None,
            state,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Reads node data. With `watch`, arms a data watch (fires
    /// `DataChanged` or `Deleted`). Fails with `NoNode` when absent, in which
    /// case no watch is left behind.
    async fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> StoreResult<(Vec<u8>, Stat)>;

    /// Writes node data. `expected_version = None` skips the version check.
    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        expected_version: Option<u64>,
    ) -> StoreResult<Stat>;

    /// Lists child names. With `watch`, arms a child watch (fires
    /// `ChildrenChanged` or `Deleted`).
    async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> StoreResult<(Vec<String>, Stat)>;

    /// Creates a node. Fails with `NodeExists`, or `NoNode` when the parent
    /// is missing. Returns the created path.
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> StoreResult<String>;

    async fn delete(
        &self,
        path: &str,
        expected_version: Option<u64>,
    ) -> StoreResult<()>;

    /// Stats a node. With `watch`, arms a watch whether or not the node
    /// exists (fires `Created` if absent, `DataChanged`/`Deleted` if present).
    async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> StoreResult<Option<Stat>>;
}
