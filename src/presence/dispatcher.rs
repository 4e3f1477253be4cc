//! Single consumer of store watch events.
//!
//! For a node event the dispatcher first keeps the [`crate::PathCache`]
//! honest (the fired watch was the only thing keeping the entry valid), then
//! re-reads the observed value and signals observers:
//!
//! | event            | re-read | signal                        |
//! |------------------|---------|-------------------------------|
//! | ChildrenChanged  | yes     | always                        |
//! | Created          | yes     | always                        |
//! | DataChanged      | yes     | only if the value changed     |
//! | Deleted          | no      | always, with `None`           |
//!
//! Cluster, service and node subscriptions follow the same rules. Session
//! events fan out to every observer as `state_unknown` / `state_reset`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::AnnouncementTable;
use super::Lookup;
use super::NodeInfo;
use super::ObserverRegistry;
use super::PathSubscription;
use super::PresenceResolver;
use super::ServiceInfo;
use crate::ConnectionState;
use crate::EventKind;
use crate::PresencePath;
use crate::WatchEventReceiver;
use crate::WatchedEvent;

#[derive(Debug, Default)]
struct LinkState {
    /// Observers were told `state_unknown` and await `state_reset`
    unknown: bool,
    /// The session expired since the last `Connected`; all watches are gone
    expired: bool,
}

pub struct WatchDispatcher {
    resolver: Arc<PresenceResolver>,
    observers: Arc<ObserverRegistry>,
    announcements: Arc<AnnouncementTable>,
    resync: Option<Arc<Notify>>,
    link: Mutex<LinkState>,
}

impl WatchDispatcher {
    pub fn new(
        resolver: Arc<PresenceResolver>,
        observers: Arc<ObserverRegistry>,
        announcements: Arc<AnnouncementTable>,
        resync: Option<Arc<Notify>>,
    ) -> Self {
        Self {
            resolver,
            observers,
            announcements,
            resync,
            link: Mutex::new(LinkState::default()),
        }
    }

    /// Processes events one at a time until the channel closes or `shutdown`
    /// fires.
    pub async fn run(
        self: Arc<Self>,
        mut events: WatchEventReceiver,
        shutdown: CancellationToken,
    ) -> crate::Result<()> {
        info!("watch dispatcher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("watch dispatcher shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("watch event channel closed");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn handle_event(
        &self,
        event: WatchedEvent,
    ) {
        trace!(?event, "watch event");
        match event.path {
            Some(path) if event.kind != EventKind::None => self.handle_node_event(&path, event.kind).await,
            _ => self.handle_session_event(event.state).await,
        }
    }

    async fn handle_node_event(
        &self,
        path: &str,
        kind: EventKind,
    ) {
        // the watch that validated this entry has fired
        self.resolver.cache().remove(path);

        if let Some(subscription) = self.observers.cluster(path) {
            if let Some(force) = self.plan(path, kind, &subscription).await {
                let fresh = self.fresh_cluster(subscription.target()).await;
                Self::apply(path, kind, &subscription, fresh, force);
            }
        } else if let Some(subscription) = self.observers.service(path) {
            if let Some(force) = self.plan(path, kind, &subscription).await {
                let fresh = self.fresh_service(subscription.target()).await;
                Self::apply(path, kind, &subscription, fresh, force);
            }
        } else if let Some(subscription) = self.observers.node(path) {
            if let Some(force) = self.plan(path, kind, &subscription).await {
                let fresh = self.fresh_node(subscription.target()).await;
                Self::apply(path, kind, &subscription, fresh, force);
            }
        } else {
            trace!(%path, ?kind, "no observer for path");
        }
    }

    /// Decides whether the event calls for a re-read, and whether the result
    /// is signalled unconditionally. A deletion is signalled here.
    async fn plan<T>(
        &self,
        path: &str,
        kind: EventKind,
        subscription: &PathSubscription<T>,
    ) -> Option<bool>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        match kind {
            EventKind::Created | EventKind::ChildrenChanged => Some(true),
            EventKind::DataChanged => Some(false),
            EventKind::Deleted => {
                let delivered = subscription.deliver(None, true);
                debug!(%path, delivered, "observed path deleted");
                // keep following the path so a re-creation is seen
                match self.resolver.watch_existence(path).await {
                    Ok(true) => Some(true),
                    _ => None,
                }
            }
            EventKind::None => None,
        }
    }

    fn apply<T>(
        path: &str,
        kind: EventKind,
        subscription: &PathSubscription<T>,
        fresh: Lookup<T>,
        force: bool,
    ) where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let delivered = match fresh {
            Lookup::Found(value) => subscription.deliver(Some(value), force),
            Lookup::NotFound => subscription.deliver(None, force),
            Lookup::Error(e) => {
                warn!(%path, error = %e, "could not refresh observed path");
                0
            }
        };
        debug!(%path, ?kind, delivered, "watch event dispatched");
    }

    async fn fresh_cluster(
        &self,
        target: &PresencePath,
    ) -> Lookup<Vec<String>> {
        self.resolver.cluster(&target.cluster_id, false).await
    }

    async fn fresh_service(
        &self,
        target: &PresencePath,
    ) -> Lookup<ServiceInfo> {
        let service_id = target.service_id.as_deref().unwrap_or_default();
        self.resolver.service(&target.cluster_id, service_id, false).await
    }

    async fn fresh_node(
        &self,
        target: &PresencePath,
    ) -> Lookup<NodeInfo> {
        let service_id = target.service_id.as_deref().unwrap_or_default();
        let node_id = target.node_id.as_deref().unwrap_or_default();
        self.resolver.node(&target.cluster_id, service_id, node_id, false).await
    }

    async fn handle_session_event(
        &self,
        state: ConnectionState,
    ) {
        match state {
            ConnectionState::Disconnected => {
                if self.mark_unknown(false) {
                    info!("store connection lost, observers notified");
                    self.observers.notify_state_unknown();
                }
            }
            ConnectionState::Expired => {
                self.resolver.cache().clear();
                let dirty = self.announcements.mark_all_dirty();
                info!(dirty, "store session expired, cache cleared");
                if let Some(resync) = &self.resync {
                    resync.notify_one();
                }
                if self.mark_unknown(true) {
                    self.observers.notify_state_unknown();
                }
            }
            ConnectionState::Connected => {
                let (was_unknown, was_expired) = {
                    let mut link = self.link.lock();
                    let previous = (link.unknown, link.expired);
                    *link = LinkState::default();
                    previous
                };
                if !was_unknown {
                    return;
                }
                info!(was_expired, "store connection restored");
                self.observers.notify_state_reset();
                if was_expired {
                    self.rearm_all().await;
                }
            }
        }
    }

    /// Returns true on the transition into the unknown state
    fn mark_unknown(
        &self,
        expired: bool,
    ) -> bool {
        let mut link = self.link.lock();
        link.expired |= expired;
        !std::mem::replace(&mut link.unknown, true)
    }

    /// Watches died with the session: re-read every observed path to arm
    /// new ones and catch up on anything missed.
    async fn rearm_all(&self) {
        for (path, subscription) in self.observers.clusters() {
            let fresh = self.fresh_cluster(subscription.target()).await;
            Self::apply(&path, EventKind::None, &subscription, fresh, false);
        }
        for (path, subscription) in self.observers.services() {
            let fresh = self.fresh_service(subscription.target()).await;
            Self::apply(&path, EventKind::None, &subscription, fresh, false);
        }
        for (path, subscription) in self.observers.nodes() {
            let fresh = self.fresh_node(subscription.target()).await;
            Self::apply(&path, EventKind::None, &subscription, fresh, false);
        }
    }
}
