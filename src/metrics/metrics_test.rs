use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("dpresence".to_string()), None).unwrap();
    register_custom_metrics(&registry).unwrap();
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    HEARTBEAT_SYNC.with_label_values(&[SYNC_PUBLISHED]).inc();
    OBSERVER_NOTIFICATIONS.with_label_values(&[NOTIFY_UPDATED]).inc();
    let metrics = registry.gather();

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(metric_names.contains(&"dpresence_presence_cache_hits"));
    assert!(metric_names.contains(&"dpresence_presence_heartbeat_sync"));
    assert!(metric_names.contains(&"dpresence_presence_observer_notifications"));
}

#[test]
fn test_double_registration_is_rejected() {
    let registry = create_test_registry();
    assert!(register_custom_metrics(&registry).is_err());
}

#[test]
fn test_counter_increment() {
    let before = HEARTBEAT_SYNC.with_label_values(&[SYNC_FAILED]).get();

    HEARTBEAT_SYNC.with_label_values(&[SYNC_FAILED]).inc();
    HEARTBEAT_SYNC.with_label_values(&[SYNC_FAILED]).inc();

    // other tests share the collector, so compare against a baseline
    let value = HEARTBEAT_SYNC.with_label_values(&[SYNC_FAILED]).get();
    assert!(value >= before + 2);
}

#[test]
fn test_crate_registry_holds_every_collector() {
    CACHE_MISSES.inc();
    HEARTBEAT_SYNC.with_label_values(&[SYNC_DELETED]).inc();
    OBSERVER_NOTIFICATIONS.with_label_values(&[NOTIFY_STATE_RESET]).inc();

    let families = gather();
    let names: Vec<_> = families.iter().map(|m| m.get_name()).collect();
    assert!(names.contains(&"presence_cache_hits"));
    assert!(names.contains(&"presence_cache_misses"));
    assert!(names.contains(&"presence_heartbeat_sync"));
    assert!(names.contains(&"presence_observer_notifications"));

    // collectors are already in the crate registry
    assert!(register_custom_metrics(&REGISTRY).is_err());
}
