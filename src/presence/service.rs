//! Public entry point tying the presence components together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::AnnouncementTable;
use super::HeartbeatScheduler;
use super::Lookup;
use super::NodeInfo;
use super::ObserverHandle;
use super::ObserverRegistry;
use super::PathSubscription;
use super::PresenceObserver;
use super::PresenceResolver;
use super::ServiceInfo;
use super::TickReport;
use super::UpdatingNodeInfo;
use super::UpdatingServiceInfo;
use super::WatchDispatcher;
use crate::constants::WAIT_MAX_POLL_MS;
use crate::constants::WAIT_MIN_POLL_MS;
use crate::utils::async_task::spawn_task;
use crate::Attributes;
use crate::AttributeSerializer;
use crate::BincodeAttributeSerializer;
use crate::Error;
use crate::PathCache;
use crate::PathScheme;
use crate::PresenceConfig;
use crate::PresencePath;
use crate::Result;
use crate::StoreClient;
use crate::WatchEventReceiver;

/// Presence registry bound to one store session.
///
/// `announce`, `hide` and `show` only record desired state; the heartbeat
/// task (or [`PresenceService::flush`]) writes it to the store. Lookups are
/// cache-first and eventually consistent.
///
/// ```ignore
/// let (store, events) = MemStore::new();
/// let presence = PresenceService::new(PresenceConfig::default(), Arc::new(store), events)?;
/// presence.start()?;
/// presence.announce("c1", "s1", "n1", Some(attrs), true)?;
/// ```
pub struct PresenceService {
    config: PresenceConfig,
    scheme: PathScheme,
    store: Arc<dyn StoreClient>,
    cache: Arc<PathCache>,
    resolver: Arc<PresenceResolver>,
    announcements: Arc<AnnouncementTable>,
    observers: Arc<ObserverRegistry>,
    heartbeat: Arc<HeartbeatScheduler>,
    dispatcher: Arc<WatchDispatcher>,
    events: Mutex<Option<WatchEventReceiver>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PresenceService {
    pub fn new(
        config: PresenceConfig,
        store: Arc<dyn StoreClient>,
        events: WatchEventReceiver,
    ) -> Result<Self> {
        Self::with_serializer(config, store, events, Arc::new(BincodeAttributeSerializer))
    }

    pub fn with_serializer(
        config: PresenceConfig,
        store: Arc<dyn StoreClient>,
        events: WatchEventReceiver,
        serializer: Arc<dyn AttributeSerializer>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let scheme = PathScheme::new(config.registry.base_path.clone())?;
        let cache = Arc::new(PathCache::from_config(&config.cache));
        let resolver = Arc::new(PresenceResolver::new(
            scheme.clone(),
            store.clone(),
            cache.clone(),
            serializer.clone(),
        ));
        let announcements = Arc::new(AnnouncementTable::new());
        let observers = ObserverRegistry::new();
        let heartbeat = Arc::new(HeartbeatScheduler::new(
            store.clone(),
            announcements.clone(),
            serializer,
            config.heartbeat.clone(),
            config.registry.clone(),
        ));
        let dispatcher = Arc::new(WatchDispatcher::new(
            resolver.clone(),
            observers.clone(),
            announcements.clone(),
            Some(heartbeat.resync_handle()),
        ));

        Ok(Self {
            config,
            scheme,
            store,
            cache,
            resolver,
            announcements,
            observers,
            heartbeat,
            dispatcher,
            events: Mutex::new(Some(events)),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the watch dispatcher and the heartbeat. Must be called inside
    /// a tokio runtime, once.
    pub fn start(&self) -> Result<()> {
        let events = self
            .events
            .lock()
            .take()
            .ok_or_else(|| Error::Fatal("presence service already started".to_string()))?;

        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown.clone();
        let dispatcher_task = spawn_task("watch_dispatcher", move || dispatcher.run(events, shutdown));

        let heartbeat = self.heartbeat.clone();
        let shutdown = self.shutdown.clone();
        let heartbeat_task = spawn_task("heartbeat", move || heartbeat.run(shutdown));

        self.tasks.lock().extend([dispatcher_task, heartbeat_task]);
        lazy_static::initialize(&crate::metrics::REGISTRY);
        info!(base_path = %self.scheme.base_path(), "presence service started");
        Ok(())
    }

    /// Stops background tasks and waits for them to exit. Published nodes
    /// stay until the store session ends.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "presence task did not stop cleanly");
            }
        }
        info!("presence service stopped");
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn path_scheme(&self) -> &PathScheme {
        &self.scheme
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Arc<WatchDispatcher> {
        &self.dispatcher
    }

    // ---------------------------------------------------------------
    // Announcements

    /// Records the desired state of a local node; published on the next
    /// heartbeat tick.
    pub fn announce(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
        attributes: Option<Attributes>,
        visible: bool,
    ) -> Result<()> {
        let path = self.scheme.node_path(cluster_id, service_id, node_id)?;
        let node_info = NodeInfo::new(cluster_id, service_id, node_id, attributes.unwrap_or_default());
        self.announcements.announce(&path, node_info, visible);
        Ok(())
    }

    pub fn hide(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> Result<()> {
        let path = self.scheme.node_path(cluster_id, service_id, node_id)?;
        self.announcements.set_hidden(&path, true)?;
        Ok(())
    }

    pub fn show(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> Result<()> {
        let path = self.scheme.node_path(cluster_id, service_id, node_id)?;
        self.announcements.set_hidden(&path, false)?;
        Ok(())
    }

    /// Alias of [`PresenceService::show`]
    pub fn unhide(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> Result<()> {
        self.show(cluster_id, service_id, node_id)
    }

    /// Forgets the announcement and deletes the node right away.
    pub async fn dead(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> Result<()> {
        let path = self.scheme.node_path(cluster_id, service_id, node_id)?;
        self.announcements.remove(&path);
        match self.store.delete(&path, None).await {
            Ok(()) => {
                debug!(%path, "node declared dead");
                Ok(())
            }
            Err(e) if e.is_no_node() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one heartbeat reconciliation now
    pub async fn flush(&self) -> TickReport {
        self.heartbeat.tick().await
    }

    /// Any visible local announcement in `cluster_id`
    pub fn is_member_of(
        &self,
        cluster_id: &str,
    ) -> bool {
        self.announcements.is_member_of(cluster_id)
    }

    /// Whether this process announces `(cluster, service, node)` visibly
    pub fn is_member_of_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> bool {
        self.scheme
            .node_path(cluster_id, service_id, node_id)
            .ok()
            .and_then(|path| self.announcements.get(&path))
            .is_some_and(|a| !a.hidden)
    }

    // ---------------------------------------------------------------
    // Discovery

    pub async fn get_clusters(&self) -> Vec<String> {
        self.resolver.children(&self.scheme.presence_root()).await
    }

    pub async fn get_services(
        &self,
        cluster_id: &str,
    ) -> Vec<String> {
        match self.scheme.cluster_path(cluster_id) {
            Ok(path) => self.resolver.children(&path).await,
            Err(_) => Vec::new(),
        }
    }

    pub async fn lookup_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        use_cache: bool,
    ) -> Lookup<ServiceInfo> {
        self.resolver.service(cluster_id, service_id, use_cache).await
    }

    pub async fn lookup_service_info(
        &self,
        cluster_id: &str,
        service_id: &str,
    ) -> Option<ServiceInfo> {
        self.lookup_service(cluster_id, service_id, true).await.into_option()
    }

    /// Looks up a service and subscribes `observer` to later changes. The
    /// looked-up value becomes the baseline for change detection unless a
    /// change was already delivered while the lookup ran.
    pub async fn lookup_service_with_observer(
        &self,
        cluster_id: &str,
        service_id: &str,
        observer: Arc<dyn PresenceObserver<ServiceInfo>>,
        use_cache: bool,
    ) -> Result<(Lookup<ServiceInfo>, ObserverHandle)> {
        let (result, _, handle) = self
            .subscribe_service(cluster_id, service_id, observer, use_cache)
            .await?;
        Ok((result, handle))
    }

    pub async fn observe_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        observer: Arc<dyn PresenceObserver<ServiceInfo>>,
    ) -> Result<ObserverHandle> {
        let (_, handle) = self
            .lookup_service_with_observer(cluster_id, service_id, observer, true)
            .await?;
        Ok(handle)
    }

    pub async fn lookup_node(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
        use_cache: bool,
    ) -> Lookup<NodeInfo> {
        self.resolver.node(cluster_id, service_id, node_id, use_cache).await
    }

    pub async fn lookup_node_info(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> Option<NodeInfo> {
        self.lookup_node(cluster_id, service_id, node_id, true).await.into_option()
    }

    pub async fn lookup_node_with_observer(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
        observer: Arc<dyn PresenceObserver<NodeInfo>>,
        use_cache: bool,
    ) -> Result<(Lookup<NodeInfo>, ObserverHandle)> {
        let (result, _, handle) = self
            .subscribe_node(cluster_id, service_id, node_id, observer, use_cache)
            .await?;
        Ok((result, handle))
    }

    pub async fn observe_node(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
        observer: Arc<dyn PresenceObserver<NodeInfo>>,
    ) -> Result<ObserverHandle> {
        let (_, handle) = self
            .lookup_node_with_observer(cluster_id, service_id, node_id, observer, true)
            .await?;
        Ok(handle)
    }

    /// Subscribes `observer` to the list of service ids in `cluster_id`.
    pub async fn observe_cluster(
        &self,
        cluster_id: &str,
        observer: Arc<dyn PresenceObserver<Vec<String>>>,
    ) -> Result<ObserverHandle> {
        let path = self.scheme.cluster_path(cluster_id)?;
        let target = PresencePath {
            cluster_id: cluster_id.to_string(),
            service_id: None,
            node_id: None,
        };
        let (subscription, handle) = self.observers.register_cluster(&path, target, observer);
        let seen = subscription.deliveries();
        let result = self.resolver.cluster(cluster_id, true).await;
        install_baseline(&subscription, seen, &result);
        Ok(handle)
    }

    /// Member list of a service that keeps itself current until destroyed.
    pub async fn updating_service_info(
        &self,
        cluster_id: &str,
        service_id: &str,
    ) -> Result<UpdatingServiceInfo> {
        let (_, subscription, handle) = self
            .subscribe_service(cluster_id, service_id, Arc::new(Follow), true)
            .await?;
        Ok(UpdatingServiceInfo::new(subscription, handle))
    }

    /// Attributes of a node that keep themselves current until destroyed.
    pub async fn updating_node_info(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
    ) -> Result<UpdatingNodeInfo> {
        let (_, subscription, handle) = self
            .subscribe_node(cluster_id, service_id, node_id, Arc::new(Follow), true)
            .await?;
        Ok(UpdatingNodeInfo::new(subscription, handle))
    }

    async fn subscribe_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        observer: Arc<dyn PresenceObserver<ServiceInfo>>,
        use_cache: bool,
    ) -> Result<(Lookup<ServiceInfo>, Arc<PathSubscription<ServiceInfo>>, ObserverHandle)> {
        let path = self.scheme.service_path(cluster_id, service_id)?;
        let target = PresencePath {
            cluster_id: cluster_id.to_string(),
            service_id: Some(service_id.to_string()),
            node_id: None,
        };
        let (subscription, handle) = self.observers.register_service(&path, target, observer);
        let seen = subscription.deliveries();
        let result = self.lookup_service(cluster_id, service_id, use_cache).await;
        install_baseline(&subscription, seen, &result);
        Ok((result, subscription, handle))
    }

    async fn subscribe_node(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
        observer: Arc<dyn PresenceObserver<NodeInfo>>,
        use_cache: bool,
    ) -> Result<(Lookup<NodeInfo>, Arc<PathSubscription<NodeInfo>>, ObserverHandle)> {
        let path = self.scheme.node_path(cluster_id, service_id, node_id)?;
        let target = PresencePath {
            cluster_id: cluster_id.to_string(),
            service_id: Some(service_id.to_string()),
            node_id: Some(node_id.to_string()),
        };
        let (subscription, handle) = self.observers.register_node(&path, target, observer);
        let seen = subscription.deliveries();
        let result = self.lookup_node(cluster_id, service_id, node_id, use_cache).await;
        install_baseline(&subscription, seen, &result);
        Ok((result, subscription, handle))
    }

    /// Waits for the service to have at least one member. A negative
    /// `timeout_ms` waits forever; zero checks once.
    pub async fn wait_until_service_available(
        &self,
        cluster_id: &str,
        service_id: &str,
        timeout_ms: i64,
    ) -> Option<ServiceInfo> {
        let wake = Arc::new(Notify::new());
        let observer = Arc::new(WakeObserver { wake: wake.clone() });
        let (first, _handle) = self
            .lookup_service_with_observer(cluster_id, service_id, observer, true)
            .await
            .ok()?;
        if let Lookup::Found(info) = first {
            if !info.is_empty() {
                return Some(info);
            }
        }

        let waiter = Waiter::new(timeout_ms);
        while waiter.park(&wake).await {
            if let Some(info) = self.lookup_service_info(cluster_id, service_id).await {
                if !info.is_empty() {
                    return Some(info);
                }
            }
        }
        None
    }

    /// Waits for the node to be published. A negative `timeout_ms` waits
    /// forever; zero checks once.
    pub async fn wait_until_node_available(
        &self,
        cluster_id: &str,
        service_id: &str,
        node_id: &str,
        timeout_ms: i64,
    ) -> Option<NodeInfo> {
        let wake = Arc::new(Notify::new());
        let observer = Arc::new(WakeObserver { wake: wake.clone() });
        let (first, _handle) = self
            .lookup_node_with_observer(cluster_id, service_id, node_id, observer, true)
            .await
            .ok()?;
        if let Lookup::Found(info) = first {
            return Some(info);
        }

        let waiter = Waiter::new(timeout_ms);
        while waiter.park(&wake).await {
            if let Some(info) = self.lookup_node_info(cluster_id, service_id, node_id).await {
                return Some(info);
            }
        }
        None
    }
}

impl Drop for PresenceService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Registration is done on behalf of the subscription owner, callbacks are
/// ignored; the owner reads the subscription's current value.
struct Follow;

impl<T: 'static> PresenceObserver<T> for Follow {
    fn updated(
        &self,
        _value: Option<T>,
    ) {
    }
}

/// Installs a lookup result as baseline unless a delivery raced it. An
/// errored lookup leaves the value unknown.
fn install_baseline<T>(
    subscription: &PathSubscription<T>,
    seen: u64,
    result: &Lookup<T>,
) where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let installed = match result {
        Lookup::Found(value) => subscription.init_current(seen, Some(value.clone())),
        Lookup::NotFound => subscription.init_current(seen, None),
        Lookup::Error(_) => return,
    };
    if !installed {
        debug!(path = ?subscription.target(), "baseline superseded by a delivered change");
    }
}

/// Wakes a waiter whenever the observed value changes
struct WakeObserver {
    wake: Arc<Notify>,
}

impl<T: 'static> PresenceObserver<T> for WakeObserver {
    fn updated(
        &self,
        _value: Option<T>,
    ) {
        self.wake.notify_one();
    }

    fn state_reset(&self) {
        self.wake.notify_one();
    }
}

/// Bounded polling between observer wake-ups
struct Waiter {
    deadline: Option<Instant>,
    poll: Duration,
}

impl Waiter {
    fn new(timeout_ms: i64) -> Self {
        let deadline = u64::try_from(timeout_ms)
            .ok()
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let quarter = u64::try_from(timeout_ms).map(|ms| ms / 4).unwrap_or(WAIT_MAX_POLL_MS);
        let poll = Duration::from_millis(quarter.clamp(WAIT_MIN_POLL_MS, WAIT_MAX_POLL_MS));
        Self { deadline, poll }
    }

    /// Sleeps until woken, the poll period passes, or the deadline. Returns
    /// false once the deadline has passed.
    async fn park(
        &self,
        wake: &Notify,
    ) -> bool {
        let now = Instant::now();
        let sleep_for = match self.deadline {
            Some(deadline) if deadline <= now => return false,
            Some(deadline) => self.poll.min(deadline - now),
            None => self.poll,
        };
        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
        }
        true
    }
}
