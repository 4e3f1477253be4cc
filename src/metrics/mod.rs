//! Prometheus collectors for the presence registry.
//!
//! Collectors are process-wide. They are registered once into the crate
//! [`struct@REGISTRY`] on first use, and can be added to any other registry
//! with [`register_custom_metrics`].

#[cfg(test)]
mod metrics_test;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::proto::MetricFamily;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    pub static ref CACHE_HITS: IntCounter =
        IntCounter::new("presence_cache_hits", "Path cache lookups served from cache")
            .expect("metric can not be created");

    pub static ref CACHE_MISSES: IntCounter =
        IntCounter::new("presence_cache_misses", "Path cache lookups that fell through")
            .expect("metric can not be created");

    /// outcome = published | deleted | failed
    pub static ref HEARTBEAT_SYNC: IntCounterVec = IntCounterVec::new(
        Opts::new("presence_heartbeat_sync", "Announcement reconciliations by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    /// kind = updated | state_unknown | state_reset
    pub static ref OBSERVER_NOTIFICATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("presence_observer_notifications", "Observer callbacks delivered"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry).expect("collector can be registered");
        registry
    };
}

pub(crate) const SYNC_PUBLISHED: &str = "published";
pub(crate) const SYNC_DELETED: &str = "deleted";
pub(crate) const SYNC_FAILED: &str = "failed";

pub(crate) const NOTIFY_UPDATED: &str = "updated";
pub(crate) const NOTIFY_STATE_UNKNOWN: &str = "state_unknown";
pub(crate) const NOTIFY_STATE_RESET: &str = "state_reset";

/// Registers every presence collector into `registry`.
/// Fails with `AlreadyReg` when called twice on the same registry.
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(CACHE_HITS.clone()))?;
    registry.register(Box::new(CACHE_MISSES.clone()))?;
    registry.register(Box::new(HEARTBEAT_SYNC.clone()))?;
    registry.register(Box::new(OBSERVER_NOTIFICATIONS.clone()))?;
    Ok(())
}

/// Snapshot of every presence collector in [`struct@REGISTRY`], ready for a
/// text encoder.
pub fn gather() -> Vec<MetricFamily> {
    REGISTRY.gather()
}
