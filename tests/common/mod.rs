use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use d_presence::Attributes;
use d_presence::MemStore;
use d_presence::PresenceConfig;
use d_presence::PresenceObserver;
use d_presence::PresenceService;
use parking_lot::Mutex;

pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

pub fn test_config() -> PresenceConfig {
    let mut config = PresenceConfig::default();
    config.registry.base_path = "/it".to_string();
    config.heartbeat.interval_ms = HEARTBEAT_INTERVAL_MS;
    config
}

/// One process: a presence service on its own session of the shared tree
pub fn start_process(tree: &MemStore) -> (PresenceService, MemStore) {
    let (session, events) = tree.connect_session();
    let service = PresenceService::new(test_config(), Arc::new(session.clone()), events)
        .expect("valid test config");
    service.start().expect("first start");
    (service, session)
}

pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>()
}

pub async fn heartbeats(n: u64) {
    tokio::time::sleep(Duration::from_millis(n * HEARTBEAT_INTERVAL_MS + 100)).await;
}

pub struct Collect<T> {
    pub values: Mutex<Vec<Option<T>>>,
    pub unknown: Mutex<usize>,
    pub reset: Mutex<usize>,
}

impl<T> Collect<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(Vec::new()),
            unknown: Mutex::new(0),
            reset: Mutex::new(0),
        })
    }
}

impl<T: Send + Sync + 'static> PresenceObserver<T> for Collect<T> {
    fn updated(
        &self,
        value: Option<T>,
    ) {
        self.values.lock().push(value);
    }

    fn state_unknown(&self) {
        *self.unknown.lock() += 1;
    }

    fn state_reset(&self) {
        *self.reset.lock() += 1;
    }
}
