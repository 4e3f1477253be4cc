//! In-memory [`StoreClient`] with ZooKeeper-style one-shot watches.
//!
//! A single tree is shared by any number of sessions. Each session owns a
//! watch event channel and the session-scoped nodes it created; expiring a
//! session reaps those nodes and notifies other sessions' watches.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::ops::Bound;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use super::Acl;
use super::ConnectionState;
use super::CreateMode;
use super::EventKind;
use super::Stat;
use super::StoreClient;
use super::StoreResult;
use super::WatchEventReceiver;
use super::WatchEventSender;
use super::WatchedEvent;
use crate::utils::time::now_millis;
use crate::PathScheme;
use crate::StoreError;

struct MemNode {
    data: Vec<u8>,
    stat: Stat,
}

struct Session {
    events: WatchEventSender,
    connected: bool,
}

#[derive(Default)]
struct WatchTable {
    data: HashMap<String, HashSet<u64>>,
    child: HashMap<String, HashSet<u64>>,
    exist: HashMap<String, HashSet<u64>>,
}

impl WatchTable {
    fn remove_session(
        &mut self,
        session_id: u64,
    ) {
        for table in [&mut self.data, &mut self.child, &mut self.exist] {
            table.retain(|_, sessions| {
                sessions.remove(&session_id);
                !sessions.is_empty()
            });
        }
    }
}

struct TreeState {
    nodes: BTreeMap<String, MemNode>,
    watches: WatchTable,
    sessions: HashMap<u64, Session>,
}

impl TreeState {
    fn fire(
        &mut self,
        watchers: Option<HashSet<u64>>,
        path: &str,
        kind: EventKind,
    ) {
        let Some(watchers) = watchers else {
            return;
        };
        for session_id in watchers {
            if let Some(session) = self.sessions.get(&session_id) {
                trace!(session_id, %path, ?kind, "firing watch");
                let _ = session.events.send(WatchedEvent::node(path, kind));
            }
        }
    }

    fn children_of(
        &self,
        path: &str,
    ) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range::<String, _>((Bound::Excluded(&prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn remove_node(
        &mut self,
        path: &str,
    ) {
        self.nodes.remove(path);
        let data_watchers = self.watches.data.remove(path);
        let child_watchers = self.watches.child.remove(path);
        let mut deleted: HashSet<u64> = HashSet::new();
        deleted.extend(data_watchers.into_iter().flatten());
        deleted.extend(child_watchers.into_iter().flatten());
        self.fire(Some(deleted), path, EventKind::Deleted);

        if let Some(parent) = parent_of(path) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.stat.cversion += 1;
            }
            let watchers = self.watches.child.remove(parent);
            self.fire(watchers, parent, EventKind::ChildrenChanged);
        }
    }
}

struct MemTree {
    state: Mutex<TreeState>,
    next_session: AtomicU64,
}

#[derive(Clone)]
pub struct MemStore {
    tree: Arc<MemTree>,
    session_id: u64,
}

impl MemStore {
    /// Creates an empty tree and a first session on it.
    pub fn new() -> (Self, WatchEventReceiver) {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            MemNode {
                data: Vec::new(),
                stat: Stat::default(),
            },
        );
        let tree = Arc::new(MemTree {
            state: Mutex::new(TreeState {
                nodes,
                watches: WatchTable::default(),
                sessions: HashMap::new(),
            }),
            next_session: AtomicU64::new(1),
        });
        Self::open_session(tree)
    }

    /// Opens another session on the same tree, as a second process would.
    pub fn connect_session(&self) -> (Self, WatchEventReceiver) {
        Self::open_session(self.tree.clone())
    }

    fn open_session(tree: Arc<MemTree>) -> (Self, WatchEventReceiver) {
        let session_id = tree.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        tree.state.lock().sessions.insert(
            session_id,
            Session {
                events: tx,
                connected: true,
            },
        );
        debug!(session_id, "MemStore session opened");
        (Self { tree, session_id }, rx)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Simulates session expiry: session-scoped nodes owned by this session
    /// are deleted, its watches are dropped, and it observes `Expired`
    /// followed by `Connected` on a fresh session.
    pub fn expire_session(&self) {
        let mut state = self.tree.state.lock();
        let owned: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == Some(self.session_id))
            .map(|(k, _)| k.clone())
            .collect();
        state.watches.remove_session(self.session_id);
        for path in owned.iter().rev() {
            state.remove_node(path);
        }
        if let Some(session) = state.sessions.get_mut(&self.session_id) {
            session.connected = true;
            let _ = session.events.send(WatchedEvent::session(ConnectionState::Expired));
            let _ = session.events.send(WatchedEvent::session(ConnectionState::Connected));
        }
        debug!(session_id = self.session_id, reaped = owned.len(), "MemStore session expired");
    }

    /// Operations fail with `ConnectionLoss` until [`MemStore::reconnect`].
    /// Watches survive.
    pub fn disconnect(&self) {
        self.set_connected(false, ConnectionState::Disconnected);
    }

    pub fn reconnect(&self) {
        self.set_connected(true, ConnectionState::Connected);
    }

    fn set_connected(
        &self,
        connected: bool,
        state_event: ConnectionState,
    ) {
        let mut state = self.tree.state.lock();
        if let Some(session) = state.sessions.get_mut(&self.session_id) {
            session.connected = connected;
            let _ = session.events.send(WatchedEvent::session(state_event));
        }
    }

    /// Reads data without arming a watch or checking connectivity.
    pub fn peek(
        &self,
        path: &str,
    ) -> Option<(Vec<u8>, Stat)> {
        let state = self.tree.state.lock();
        state.nodes.get(path).map(|n| (n.data.clone(), n.stat))
    }

    fn lock_connected(&self) -> StoreResult<parking_lot::MutexGuard<'_, TreeState>> {
        let state = self.tree.state.lock();
        let connected = state.sessions.get(&self.session_id).is_some_and(|s| s.connected);
        if connected {
            Ok(state)
        } else {
            Err(StoreError::ConnectionLoss)
        }
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    Some(PathScheme::parent(path).unwrap_or("/"))
}

fn check_version(
    path: &str,
    stat: &Stat,
    expected: Option<u64>,
) -> StoreResult<()> {
    match expected {
        Some(expected) if expected != stat.version => Err(StoreError::BadVersion {
            path: path.to_string(),
            expected,
            actual: stat.version,
        }),
        _ => Ok(()),
    }
}

fn no_node(path: &str) -> StoreError {
    StoreError::NoNode { path: path.to_string() }
}

#[async_trait]
impl StoreClient for MemStore {
    async fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> StoreResult<(Vec<u8>, Stat)> {
        let mut state = self.lock_connected()?;
        let (data, stat) = match state.nodes.get(path) {
            Some(node) => (node.data.clone(), node.stat),
            None => return Err(no_node(path)),
        };
        if watch {
            state.watches.data.entry(path.to_string()).or_default().insert(self.session_id);
        }
        Ok((data, stat))
    }

    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        expected_version: Option<u64>,
    ) -> StoreResult<Stat> {
        let mut state = self.lock_connected()?;
        let node = state.nodes.get_mut(path).ok_or_else(|| no_node(path))?;
        check_version(path, &node.stat, expected_version)?;
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mtime_ms = now_millis();
        let stat = node.stat;

        let watchers = state.watches.data.remove(path);
        state.fire(watchers, path, EventKind::DataChanged);
        Ok(stat)
    }

    async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> StoreResult<(Vec<String>, Stat)> {
        let mut state = self.lock_connected()?;
        let stat = match state.nodes.get(path) {
            Some(node) => node.stat,
            None => return Err(no_node(path)),
        };
        let children = state.children_of(path);
        if watch {
            state.watches.child.entry(path.to_string()).or_default().insert(self.session_id);
        }
        Ok((children, stat))
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        _acl: &[Acl],
        mode: CreateMode,
    ) -> StoreResult<String> {
        let mut state = self.lock_connected()?;
        if path == "/" || state.nodes.contains_key(path) {
            return Err(StoreError::NodeExists { path: path.to_string() });
        }
        let parent = parent_of(path).ok_or_else(|| no_node(path))?;
        let parent_node = state.nodes.get_mut(parent).ok_or_else(|| no_node(parent))?;
        if parent_node.stat.ephemeral_owner.is_some() {
            return Err(StoreError::Other(format!("ephemeral nodes may not have children: {parent}")));
        }
        parent_node.stat.cversion += 1;

        let ephemeral_owner = match mode {
            CreateMode::Ephemeral => Some(self.session_id),
            CreateMode::Persistent => None,
        };
        state.nodes.insert(
            path.to_string(),
            MemNode {
                data: data.to_vec(),
                stat: Stat {
                    version: 0,
                    cversion: 0,
                    mtime_ms: now_millis(),
                    ephemeral_owner,
                },
            },
        );

        let watchers = state.watches.exist.remove(path);
        state.fire(watchers, path, EventKind::Created);
        let parent = parent.to_string();
        let watchers = state.watches.child.remove(&parent);
        state.fire(watchers, &parent, EventKind::ChildrenChanged);
        Ok(path.to_string())
    }

    async fn delete(
        &self,
        path: &str,
        expected_version: Option<u64>,
    ) -> StoreResult<()> {
        let mut state = self.lock_connected()?;
        let stat = state.nodes.get(path).map(|n| n.stat).ok_or_else(|| no_node(path))?;
        check_version(path, &stat, expected_version)?;
        if !state.children_of(path).is_empty() {
            return Err(StoreError::NotEmpty { path: path.to_string() });
        }
        state.remove_node(path);
        Ok(())
    }

    async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> StoreResult<Option<Stat>> {
        let mut state = self.lock_connected()?;
        let stat = state.nodes.get(path).map(|n| n.stat);
        if watch {
            let table = if stat.is_some() {
                &mut state.watches.data
            } else {
                &mut state.watches.exist
            };
            table.entry(path.to_string()).or_default().insert(self.session_id);
        }
        Ok(stat)
    }
}
