use std::sync::Arc;
use std::time::Duration;

use super::dispatcher_test::drain;
use super::dispatcher_test::RacingStore;
use super::observer_test::Recorder;
use super::*;
use crate::Attributes;
use crate::Error;
use crate::MemStore;
use crate::MockStoreClient;
use crate::PresenceConfig;
use crate::Stat;
use crate::StoreError;

fn config() -> PresenceConfig {
    let mut config = PresenceConfig::default();
    config.registry.base_path = "/r".to_string();
    config
}

fn attrs(port: &str) -> Attributes {
    [("port".to_string(), port.to_string())].into()
}

fn mem_service() -> (PresenceService, MemStore) {
    let (store, events) = MemStore::new();
    let service = PresenceService::new(config(), Arc::new(store.clone()), events).unwrap();
    (service, store)
}

#[tokio::test]
async fn test_new_rejects_invalid_config() {
    let (store, events) = MemStore::new();
    let mut bad = config();
    bad.registry.base_path = "relative".to_string();
    assert!(matches!(
        PresenceService::new(bad, Arc::new(store), events),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (service, _store) = mem_service();
    service.start().unwrap();
    assert!(matches!(service.start(), Err(Error::Fatal(_))));
    service.shutdown().await;
}

#[tokio::test]
async fn test_announce_does_no_io_until_flush() {
    let (service, store) = mem_service();
    service.announce("c1", "s1", "n1", Some(attrs("1234")), true).unwrap();
    assert!(store.peek("/r/presence/c1/s1/n1").is_none());

    let report = service.flush().await;
    assert_eq!(report.published, 1);

    let node = service.lookup_node_info("c1", "s1", "n1").await.unwrap();
    assert_eq!(node.attribute("port"), Some("1234"));
    assert_eq!(service.get_clusters().await, vec!["c1"]);
    assert_eq!(service.get_services("c1").await, vec!["s1"]);
    assert!(service.get_services("c2").await.is_empty());
    assert!(service.is_member_of("c1"));
    assert!(service.is_member_of_service("c1", "s1", "n1"));
    assert!(!service.is_member_of_service("c1", "s1", "n2"));
}

#[tokio::test]
async fn test_invalid_identity_is_rejected() {
    let (service, _store) = mem_service();
    assert!(matches!(
        service.announce("c1", "", "n1", None, true),
        Err(Error::InvalidPath(_))
    ));
    assert!(matches!(
        service.hide("c1", "s1", "n1"),
        Err(Error::AnnouncementNotFound { .. })
    ));
    assert!(service.lookup_node("c/1", "s1", "n1", true).await.is_error());
}

/// # Case 1: hide twice through the service
///
/// ## Validation criteria
/// 1. a single delete reaches the store
/// 2. the node is no longer a visible member
#[tokio::test]
async fn test_hide_case1() {
    let mut store = MockStoreClient::new();
    store.expect_set_data().times(1).returning(|_, _, _| Ok(Stat::default()));
    store
        .expect_delete()
        .times(1)
        .returning(|p, _| Err(StoreError::NoNode { path: p.to_string() }));
    let (_tx, events) = tokio::sync::mpsc::unbounded_channel();
    let service = PresenceService::new(config(), Arc::new(store), events).unwrap();

    service.announce("c1", "s1", "n1", None, true).unwrap();
    service.flush().await;
    service.hide("c1", "s1", "n1").unwrap();
    service.hide("c1", "s1", "n1").unwrap();
    let report = service.flush().await;

    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, 0);
    assert!(!service.is_member_of_service("c1", "s1", "n1"));
    assert_eq!(service.flush().await, TickReport::default());
}

#[tokio::test]
async fn test_dead_deletes_immediately_and_forgets() {
    let (service, store) = mem_service();
    service.announce("c1", "s1", "n1", None, true).unwrap();
    service.flush().await;
    assert!(store.peek("/r/presence/c1/s1/n1").is_some());

    service.dead("c1", "s1", "n1").await.unwrap();
    assert!(store.peek("/r/presence/c1/s1/n1").is_none());
    assert!(!service.is_member_of("c1"));
    assert_eq!(service.flush().await, TickReport::default());

    // already gone
    service.dead("c1", "s1", "n1").await.unwrap();
}

#[tokio::test]
async fn test_dead_surfaces_store_failure() {
    let (service, store) = mem_service();
    store.disconnect();
    assert!(matches!(
        service.dead("c1", "s1", "n1").await,
        Err(Error::Store(StoreError::ConnectionLoss))
    ));
}

#[tokio::test]
async fn test_observe_node_end_to_end() {
    let (service, store) = mem_service();
    service.start().unwrap();
    let (peer_store, peer_events) = store.connect_session();
    let peer = PresenceService::new(config(), Arc::new(peer_store), peer_events).unwrap();

    let recorder: Arc<Recorder<NodeInfo>> = Arc::new(Recorder::default());
    let handle = service.observe_node("c1", "s1", "n1", recorder.clone()).await.unwrap();

    peer.announce("c1", "s1", "n1", Some(attrs("1234")), true).unwrap();
    peer.flush().await;
    wait_for(|| recorder.updates.lock().len() == 1).await;

    peer.announce("c1", "s1", "n1", Some(attrs("9999")), true).unwrap();
    peer.flush().await;
    wait_for(|| recorder.updates.lock().len() == 2).await;

    let last = recorder.updates.lock().last().cloned().flatten().unwrap();
    assert_eq!(last.attribute("port"), Some("9999"));

    drop(handle);
    peer.hide("c1", "s1", "n1").unwrap();
    peer.flush().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.updates.lock().len(), 2);

    service.shutdown().await;
}

#[tokio::test]
async fn test_wait_until_node_available() {
    let (service, store) = mem_service();
    service.start().unwrap();
    let (peer_store, peer_events) = store.connect_session();
    let peer = PresenceService::new(config(), Arc::new(peer_store), peer_events).unwrap();

    assert!(service.wait_until_node_available("c1", "s1", "n1", 0).await.is_none());

    let publisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.announce("c1", "s1", "n1", Some(attrs("1234")), true).unwrap();
        peer.flush().await;
        peer
    });

    let node = service.wait_until_node_available("c1", "s1", "n1", 10_000).await.unwrap();
    assert_eq!(node.attribute("port"), Some("1234"));

    let service_info = service.wait_until_service_available("c1", "s1", 1_000).await.unwrap();
    assert_eq!(service_info.node_ids, vec!["n1"]);

    publisher.await.unwrap();
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_until_service_available_times_out() {
    let (service, _store) = mem_service();
    service.start().unwrap();

    let started = tokio::time::Instant::now();
    assert!(service.wait_until_service_available("c1", "s1", 3_000).await.is_none());
    assert!(started.elapsed() >= Duration::from_millis(3_000));

    service.shutdown().await;
}

fn ports(recorder: &Recorder<NodeInfo>) -> Vec<Option<String>> {
    recorder
        .updates
        .lock()
        .iter()
        .map(|u| u.as_ref().and_then(|n| n.attribute("port")).map(str::to_string))
        .collect()
}

/// # Case 1: change delivered while the observer's baseline lookup runs
///
/// ## Setup
/// 1. n1 holds port=1111
/// 2. after the lookup reads 1111, a peer writes 2222 and the change is
///    dispatched before the lookup returns
///
/// ## Validation criteria
/// 1. the lookup returns 1111, the observer sees 2222
/// 2. a later write back to 1111 is a real change and is signalled
#[tokio::test]
async fn test_lookup_with_observer_case1() {
    let (store, events) = MemStore::new();
    let (peer_store, peer_events) = store.connect_session();
    let peer = Arc::new(PresenceService::new(config(), Arc::new(peer_store), peer_events).unwrap());
    peer.announce("c1", "s1", "n1", Some(attrs("1111")), true).unwrap();
    peer.flush().await;

    let racing = RacingStore::new(store.clone());
    let (_tx, unused) = tokio::sync::mpsc::unbounded_channel();
    let service = PresenceService::new(config(), racing.clone(), unused).unwrap();
    let dispatcher = service.dispatcher().clone();
    let events = Arc::new(tokio::sync::Mutex::new(events));
    {
        let peer = peer.clone();
        let dispatcher = dispatcher.clone();
        let events = events.clone();
        racing.after_next_read(async move {
            peer.announce("c1", "s1", "n1", Some(attrs("2222")), true).unwrap();
            peer.flush().await;
            assert_eq!(drain(&dispatcher, &events).await, 1);
        });
    }

    let recorder: Arc<Recorder<NodeInfo>> = Arc::new(Recorder::default());
    let (first, _handle) = service
        .lookup_node_with_observer("c1", "s1", "n1", recorder.clone(), true)
        .await
        .unwrap();
    assert_eq!(first.into_option().unwrap().attribute("port"), Some("1111"));
    assert_eq!(ports(&recorder), vec![Some("2222".to_string())]);

    peer.announce("c1", "s1", "n1", Some(attrs("1111")), true).unwrap();
    peer.flush().await;
    drain(&dispatcher, &events).await;
    assert_eq!(ports(&recorder), vec![Some("2222".to_string()), Some("1111".to_string())]);
}

#[tokio::test]
async fn test_observe_cluster_end_to_end() {
    let (service, store) = mem_service();
    service.start().unwrap();
    let (peer_store, peer_events) = store.connect_session();
    let peer = PresenceService::new(config(), Arc::new(peer_store), peer_events).unwrap();

    let recorder: Arc<Recorder<Vec<String>>> = Arc::new(Recorder::default());
    let handle = service.observe_cluster("c1", recorder.clone()).await.unwrap();
    assert!(recorder.updates.lock().is_empty());

    let last = |recorder: &Arc<Recorder<Vec<String>>>| recorder.updates.lock().last().cloned().flatten();
    let s1 = vec!["s1".to_string()];
    let s1_s2 = vec!["s1".to_string(), "s2".to_string()];

    peer.announce("c1", "s1", "n1", None, true).unwrap();
    peer.flush().await;
    wait_for(|| last(&recorder) == Some(s1.clone())).await;

    peer.announce("c1", "s2", "n1", None, true).unwrap();
    peer.flush().await;
    wait_for(|| last(&recorder) == Some(s1_s2.clone())).await;

    handle.destroy();
    let seen = recorder.updates.lock().len();
    peer.announce("c1", "s3", "n1", None, true).unwrap();
    peer.flush().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.updates.lock().len(), seen);

    assert!(service.observe_cluster("c/1", recorder).await.is_err());
    service.shutdown().await;
}

#[tokio::test]
async fn test_updating_views_follow_the_store() {
    let (service, store) = mem_service();
    service.start().unwrap();
    let (peer_store, peer_events) = store.connect_session();
    let peer = PresenceService::new(config(), Arc::new(peer_store), peer_events).unwrap();
    peer.announce("c1", "s1", "n1", Some(attrs("1234")), true).unwrap();
    peer.flush().await;

    let members = service.updating_service_info("c1", "s1").await.unwrap();
    let n1 = service.updating_node_info("c1", "s1", "n1").await.unwrap();
    assert_eq!((members.cluster_id(), members.service_id()), ("c1", "s1"));
    assert_eq!(n1.node_id(), "n1");
    assert_eq!(members.node_ids(), vec!["n1"]);
    assert_eq!(n1.attribute("port").as_deref(), Some("1234"));

    peer.announce("c1", "s1", "n2", None, true).unwrap();
    peer.announce("c1", "s1", "n1", Some(attrs("9999")), true).unwrap();
    peer.flush().await;
    wait_for(|| members.node_ids().len() == 2).await;
    wait_for(|| n1.attribute("port").as_deref() == Some("9999")).await;

    n1.destroy();
    assert!(!n1.is_following());
    assert!(members.is_following());
    peer.hide("c1", "s1", "n1").unwrap();
    peer.flush().await;
    wait_for(|| members.node_ids() == vec!["n2"]).await;
    // a destroyed view keeps its last value
    assert_eq!(n1.attribute("port").as_deref(), Some("9999"));

    service.shutdown().await;
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
