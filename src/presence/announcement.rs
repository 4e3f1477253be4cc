use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::NodeInfo;
use crate::Attributes;
use crate::Error;
use crate::Result;

/// Sync state of one announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Must be reconciled on the next tick regardless of elapsed time
    Dirty,
    /// Last successful reconciliation, jitter included
    SyncedAt(Instant),
}

/// Desired visibility and attributes of one locally owned node
#[derive(Debug, Clone)]
pub struct Announcement {
    pub path: String,
    pub hidden: bool,
    pub node_info: NodeInfo,
    pub sync: SyncState,
    /// Bumped on every desired-state change. A sync started under an older
    /// generation must not mark the entry clean.
    pub generation: u64,
}

impl Announcement {
    pub fn is_dirty(&self) -> bool {
        self.sync == SyncState::Dirty
    }

    pub fn last_synced_at(&self) -> Option<Instant> {
        match self.sync {
            SyncState::Dirty => None,
            SyncState::SyncedAt(at) => Some(at),
        }
    }

    /// Dirty, or last synced at least `interval` ago
    pub fn is_due(
        &self,
        now: Instant,
        interval: std::time::Duration,
    ) -> bool {
        match self.sync {
            SyncState::Dirty => true,
            SyncState::SyncedAt(at) => now.saturating_duration_since(at) >= interval,
        }
    }
}

/// Snapshot of one due announcement handed to the heartbeat
#[derive(Debug, Clone)]
pub struct PendingSync {
    pub path: String,
    pub hidden: bool,
    pub attributes: Attributes,
    pub generation: u64,
}

/// Announcements keyed by node path.
///
/// Each entry is updated under its own map shard lock, so unrelated
/// identities never contend.
#[derive(Debug, Default)]
pub struct AnnouncementTable {
    entries: DashMap<String, Announcement>,
}

impl AnnouncementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the desired state of `path`. Always dirties.
    pub fn announce(
        &self,
        path: &str,
        node_info: NodeInfo,
        visible: bool,
    ) {
        match self.entries.entry(path.to_string()) {
            Entry::Occupied(mut occupied) => {
                let a = occupied.get_mut();
                a.hidden = !visible;
                a.node_info = node_info;
                a.sync = SyncState::Dirty;
                a.generation += 1;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Announcement {
                    path: path.to_string(),
                    hidden: !visible,
                    node_info,
                    sync: SyncState::Dirty,
                    generation: 0,
                });
            }
        }
        debug!(%path, visible, "announcement updated");
    }

    /// Changes visibility. Only an actual change dirties the entry, so
    /// repeated hides cost a single delete.
    ///
    /// Returns whether the entry changed.
    pub fn set_hidden(
        &self,
        path: &str,
        hidden: bool,
    ) -> Result<bool> {
        let mut entry = self
            .entries
            .get_mut(path)
            .ok_or_else(|| Error::AnnouncementNotFound { path: path.to_string() })?;
        if entry.hidden == hidden {
            return Ok(false);
        }
        entry.hidden = hidden;
        entry.sync = SyncState::Dirty;
        entry.generation += 1;
        debug!(%path, hidden, "announcement visibility changed");
        Ok(true)
    }

    pub fn remove(
        &self,
        path: &str,
    ) -> Option<Announcement> {
        self.entries.remove(path).map(|(_, a)| a)
    }

    pub fn get(
        &self,
        path: &str,
    ) -> Option<Announcement> {
        self.entries.get(path).map(|a| a.clone())
    }

    /// Forces every entry to be republished on the next tick. Syncs already
    /// in flight are superseded and cannot mark their entry clean.
    pub fn mark_all_dirty(&self) -> usize {
        let mut count = 0;
        for mut entry in self.entries.iter_mut() {
            entry.sync = SyncState::Dirty;
            entry.generation += 1;
            count += 1;
        }
        count
    }

    /// Entries that need reconciling at `now`
    pub fn due(
        &self,
        now: Instant,
        interval: std::time::Duration,
    ) -> Vec<PendingSync> {
        self.entries
            .iter()
            .filter(|a| a.is_due(now, interval))
            .map(|a| PendingSync {
                path: a.path.clone(),
                hidden: a.hidden,
                attributes: a.node_info.attributes.clone(),
                generation: a.generation,
            })
            .collect()
    }

    /// Records a successful sync unless the entry changed meanwhile.
    pub fn mark_synced(
        &self,
        path: &str,
        generation: u64,
        at: Instant,
    ) -> bool {
        match self.entries.get_mut(path) {
            Some(mut entry) if entry.generation == generation => {
                entry.sync = SyncState::SyncedAt(at);
                true
            }
            _ => false,
        }
    }

    /// Whether any visible local announcement belongs to `cluster_id`
    pub fn is_member_of(
        &self,
        cluster_id: &str,
    ) -> bool {
        self.entries
            .iter()
            .any(|a| !a.hidden && a.node_info.cluster_id == cluster_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
