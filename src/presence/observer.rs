//! Typed observer callbacks and their per-path registrations.
//!
//! A path may carry any number of observers. They share one current value,
//! which is updated before callbacks run so the next event compares against
//! what was last delivered. Each registration is owned by an
//! [`ObserverHandle`]; once destroyed, no further callback is made even if an
//! event for the path is already being dispatched.

use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwap;
use dashmap::DashMap;
#[cfg(test)]
use mockall::mock;
use parking_lot::Mutex;
use tracing::error;
use tracing::trace;

use super::NodeInfo;
use super::ServiceInfo;
use crate::metrics::NOTIFY_STATE_RESET;
use crate::metrics::NOTIFY_STATE_UNKNOWN;
use crate::metrics::NOTIFY_UPDATED;
use crate::metrics::OBSERVER_NOTIFICATIONS;
use crate::PresencePath;

pub trait PresenceObserver<T: 'static>: Send + Sync + 'static {
    /// New value for the observed path; `None` once it disappears.
    fn updated(
        &self,
        value: Option<T>,
    );

    /// The store connection dropped; values may be stale until
    /// [`PresenceObserver::state_reset`].
    fn state_unknown(&self) {}

    fn state_reset(&self) {}
}

#[cfg(test)]
mock! {
    pub PresenceObserver<T: Send + Sync + 'static> {}

    impl<T: Send + Sync + 'static> PresenceObserver<T> for PresenceObserver<T> {
        fn updated(&self, value: Option<T>);
        fn state_unknown(&self);
        fn state_reset(&self);
    }
}

struct ObserverSlot<T: 'static> {
    id: u64,
    active: Arc<AtomicBool>,
    observer: Arc<dyn PresenceObserver<T>>,
}

struct Current<T> {
    value: Option<T>,
    /// Values stored by `deliver` so far
    deliveries: u64,
}

/// Observers of one path plus the value last delivered to them
pub struct PathSubscription<T: 'static> {
    target: PresencePath,
    current: Mutex<Current<T>>,
    observers: ArcSwap<Vec<Arc<ObserverSlot<T>>>>,
}

impl<T> PathSubscription<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn new(target: PresencePath) -> Self {
        Self {
            target,
            current: Mutex::new(Current {
                value: None,
                deliveries: 0,
            }),
            observers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn target(&self) -> &PresencePath {
        &self.target
    }

    pub fn current(&self) -> Option<T> {
        self.current.lock().value.clone()
    }

    pub fn set_current(
        &self,
        value: Option<T>,
    ) {
        self.current.lock().value = value;
    }

    /// Delivery counter, taken before a baseline read for
    /// [`PathSubscription::init_current`].
    pub fn deliveries(&self) -> u64 {
        self.current.lock().deliveries
    }

    /// Sets the baseline from a lookup unless a delivery happened since
    /// `seen` was taken; a delivered value is never older than the lookup
    /// that raced it. Returns whether the baseline was written.
    pub fn init_current(
        &self,
        seen: u64,
        value: Option<T>,
    ) -> bool {
        let mut current = self.current.lock();
        if current.deliveries != seen {
            trace!(path = ?self.target, "value delivered during lookup, keeping it");
            return false;
        }
        current.value = value;
        true
    }

    pub fn observer_count(&self) -> usize {
        self.observers.load().len()
    }

    /// Stores `value` and notifies every live observer. Unless `force`, an
    /// equal value is swallowed. Returns the number of callbacks made.
    pub fn deliver(
        &self,
        value: Option<T>,
        force: bool,
    ) -> usize {
        {
            let mut current = self.current.lock();
            if !force && current.value == value {
                trace!(path = ?self.target, "value unchanged, not signalling");
                return 0;
            }
            current.value = value.clone();
            current.deliveries += 1;
        }

        let mut delivered = 0;
        for slot in self.observers.load().iter() {
            // removal must win even against an in-flight event
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            let value = value.clone();
            if catch_unwind(AssertUnwindSafe(|| slot.observer.updated(value))).is_err() {
                error!(path = ?self.target, observer_id = slot.id, "observer panicked in updated()");
            }
            OBSERVER_NOTIFICATIONS.with_label_values(&[NOTIFY_UPDATED]).inc();
            delivered += 1;
        }
        delivered
    }

    fn each_active(
        &self,
        kind: &str,
        f: impl Fn(&dyn PresenceObserver<T>),
    ) {
        for slot in self.observers.load().iter() {
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| f(slot.observer.as_ref()))).is_err() {
                error!(path = ?self.target, observer_id = slot.id, kind, "observer panicked");
            }
            OBSERVER_NOTIFICATIONS.with_label_values(&[kind]).inc();
        }
    }

    fn push(
        &self,
        slot: Arc<ObserverSlot<T>>,
    ) {
        self.observers.rcu(|list| {
            let mut next = Vec::with_capacity(list.len() + 1);
            next.extend(list.iter().cloned());
            next.push(slot.clone());
            next
        });
    }

    /// Returns whether the list is empty afterwards
    fn retain_without(
        &self,
        id: u64,
    ) -> bool {
        self.observers.rcu(|list| list.iter().filter(|s| s.id != id).cloned().collect::<Vec<_>>());
        self.observers.load().is_empty()
    }
}

/// Path-keyed observer registrations for clusters, services and nodes.
/// A cluster subscription carries the cluster's service ids.
#[derive(Default)]
pub struct ObserverRegistry {
    clusters: DashMap<String, Arc<PathSubscription<Vec<String>>>>,
    services: DashMap<String, Arc<PathSubscription<ServiceInfo>>>,
    nodes: DashMap<String, Arc<PathSubscription<NodeInfo>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_cluster(
        self: &Arc<Self>,
        path: &str,
        target: PresencePath,
        observer: Arc<dyn PresenceObserver<Vec<String>>>,
    ) -> (Arc<PathSubscription<Vec<String>>>, ObserverHandle) {
        Self::register(self, &self.clusters, path, target, observer)
    }

    pub fn register_service(
        self: &Arc<Self>,
        path: &str,
        target: PresencePath,
        observer: Arc<dyn PresenceObserver<ServiceInfo>>,
    ) -> (Arc<PathSubscription<ServiceInfo>>, ObserverHandle) {
        Self::register(self, &self.services, path, target, observer)
    }

    pub fn register_node(
        self: &Arc<Self>,
        path: &str,
        target: PresencePath,
        observer: Arc<dyn PresenceObserver<NodeInfo>>,
    ) -> (Arc<PathSubscription<NodeInfo>>, ObserverHandle) {
        Self::register(self, &self.nodes, path, target, observer)
    }

    fn register<T>(
        this: &Arc<Self>,
        map: &DashMap<String, Arc<PathSubscription<T>>>,
        path: &str,
        target: PresencePath,
        observer: Arc<dyn PresenceObserver<T>>,
    ) -> (Arc<PathSubscription<T>>, ObserverHandle)
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let id = this.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let slot = Arc::new(ObserverSlot {
            id,
            active: active.clone(),
            observer,
        });

        // push under the shard lock so a concurrent removal of the last
        // observer cannot drop the subscription we are joining
        let entry = map
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(PathSubscription::new(target)));
        entry.push(slot);
        let subscription = entry.clone();
        drop(entry);

        trace!(%path, observer_id = id, "observer registered");
        let handle = ObserverHandle {
            id,
            path: path.to_string(),
            active,
            registry: Arc::downgrade(this),
        };
        (subscription, handle)
    }

    pub fn cluster(
        &self,
        path: &str,
    ) -> Option<Arc<PathSubscription<Vec<String>>>> {
        self.clusters.get(path).map(|s| s.clone())
    }

    pub fn service(
        &self,
        path: &str,
    ) -> Option<Arc<PathSubscription<ServiceInfo>>> {
        self.services.get(path).map(|s| s.clone())
    }

    pub fn node(
        &self,
        path: &str,
    ) -> Option<Arc<PathSubscription<NodeInfo>>> {
        self.nodes.get(path).map(|s| s.clone())
    }

    pub fn clusters(&self) -> Vec<(String, Arc<PathSubscription<Vec<String>>>)> {
        self.clusters.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn services(&self) -> Vec<(String, Arc<PathSubscription<ServiceInfo>>)> {
        self.services.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn nodes(&self) -> Vec<(String, Arc<PathSubscription<NodeInfo>>)> {
        self.nodes.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn is_observed(
        &self,
        path: &str,
    ) -> bool {
        self.clusters.contains_key(path) || self.services.contains_key(path) || self.nodes.contains_key(path)
    }

    /// Number of observed paths
    pub fn len(&self) -> usize {
        self.clusters.len() + self.services.len() + self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_state_unknown(&self) {
        for (_, s) in self.clusters() {
            s.each_active(NOTIFY_STATE_UNKNOWN, |o| o.state_unknown());
        }
        for (_, s) in self.services() {
            s.each_active(NOTIFY_STATE_UNKNOWN, |o| o.state_unknown());
        }
        for (_, s) in self.nodes() {
            s.each_active(NOTIFY_STATE_UNKNOWN, |o| o.state_unknown());
        }
    }

    pub fn notify_state_reset(&self) {
        for (_, s) in self.clusters() {
            s.each_active(NOTIFY_STATE_RESET, |o| o.state_reset());
        }
        for (_, s) in self.services() {
            s.each_active(NOTIFY_STATE_RESET, |o| o.state_reset());
        }
        for (_, s) in self.nodes() {
            s.each_active(NOTIFY_STATE_RESET, |o| o.state_reset());
        }
    }

    fn unregister(
        &self,
        path: &str,
        id: u64,
    ) {
        self.clusters.remove_if(path, |_, s| s.retain_without(id));
        self.services.remove_if(path, |_, s| s.retain_without(id));
        self.nodes.remove_if(path, |_, s| s.retain_without(id));
        trace!(%path, observer_id = id, "observer unregistered");
    }
}

/// Owns one observer registration; dropping it unregisters the observer.
pub struct ObserverHandle {
    id: u64,
    path: String,
    active: Arc<AtomicBool>,
    registry: Weak<ObserverRegistry>,
}

impl ObserverHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops callbacks immediately and removes the registration.
    /// Idempotent.
    pub fn destroy(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.path, self.id);
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}
