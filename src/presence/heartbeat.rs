//! Periodic reconciliation of the announcement table against the store.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::AnnouncementTable;
use super::PendingSync;
use crate::metrics::HEARTBEAT_SYNC;
use crate::metrics::SYNC_DELETED;
use crate::metrics::SYNC_FAILED;
use crate::metrics::SYNC_PUBLISHED;
use crate::update_path;
use crate::AttributeSerializer;
use crate::HeartbeatConfig;
use crate::RegistryConfig;
use crate::StoreClient;
use crate::StoreError;

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub published: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Entries changed while their sync was in flight; retried next tick
    pub superseded: usize,
}

pub struct HeartbeatScheduler {
    store: Arc<dyn StoreClient>,
    table: Arc<AnnouncementTable>,
    serializer: Arc<dyn AttributeSerializer>,
    heartbeat: HeartbeatConfig,
    registry: RegistryConfig,
    /// Serializes ticks between the background loop and `flush`
    tick_lock: Mutex<()>,
    resync: Arc<Notify>,
}

impl HeartbeatScheduler {
    pub fn new(
        store: Arc<dyn StoreClient>,
        table: Arc<AnnouncementTable>,
        serializer: Arc<dyn AttributeSerializer>,
        heartbeat: HeartbeatConfig,
        registry: RegistryConfig,
    ) -> Self {
        Self {
            store,
            table,
            serializer,
            heartbeat,
            registry,
            tick_lock: Mutex::new(()),
            resync: Arc::new(Notify::new()),
        }
    }

    /// Notified to run a tick ahead of schedule, e.g. after session expiry
    pub fn resync_handle(&self) -> Arc<Notify> {
        self.resync.clone()
    }

    /// Reconciles every due announcement once. A failing entry is logged and
    /// left due; it never stops the rest of the pass.
    pub async fn tick(&self) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let pending = self.table.due(Instant::now(), self.heartbeat.interval());
        if pending.is_empty() {
            return report;
        }
        debug!(due = pending.len(), "heartbeat tick");

        for entry in pending {
            let outcome = if entry.hidden {
                self.remove(&entry).await
            } else {
                self.publish(&entry).await
            };

            match outcome {
                Ok(label) => {
                    HEARTBEAT_SYNC.with_label_values(&[label]).inc();
                    let next = Instant::now() + self.jitter();
                    if !self.table.mark_synced(&entry.path, entry.generation, next) {
                        debug!(path = %entry.path, "announcement changed during sync");
                        report.superseded += 1;
                    } else if entry.hidden {
                        report.deleted += 1;
                    } else {
                        report.published += 1;
                    }
                }
                Err(e) => {
                    HEARTBEAT_SYNC.with_label_values(&[SYNC_FAILED]).inc();
                    warn!(path = %entry.path, error = %e, "announcement sync failed, retrying next tick");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Runs ticks until `shutdown` fires. A panicking tick is logged and the
    /// loop carries on.
    pub async fn run(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> crate::Result<()> {
        let period = self.heartbeat.tick_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?period, "heartbeat started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("heartbeat shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.resync.notified() => {
                    debug!("heartbeat resync requested");
                }
            }

            if let Err(panic) = AssertUnwindSafe(self.tick()).catch_unwind().await {
                error!(?panic, "heartbeat tick panicked");
            }
        }
        Ok(())
    }

    async fn remove(
        &self,
        entry: &PendingSync,
    ) -> Result<&'static str, crate::Error> {
        match self.store.delete(&entry.path, None).await {
            Ok(()) => Ok(SYNC_DELETED),
            Err(StoreError::NoNode { .. }) => Ok(SYNC_DELETED),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(
        &self,
        entry: &PendingSync,
    ) -> Result<&'static str, crate::Error> {
        let data = self.serializer.serialize(&entry.attributes)?;
        update_path(
            self.store.as_ref(),
            &entry.path,
            &data,
            &self.registry.default_acl,
            self.registry.announce_create_mode,
        )
        .await?;
        Ok(SYNC_PUBLISHED)
    }

    /// Uniform in `[0, interval / 2]`
    fn jitter(&self) -> Duration {
        let max = self.heartbeat.interval_ms / 2;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
