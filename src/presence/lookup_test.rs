use std::sync::Arc;

use super::*;
use crate::Attributes;
use crate::AttributeSerializer;
use crate::BincodeAttributeSerializer;
use crate::CreateMode;
use crate::Error;
use crate::EventKind;
use crate::MemStore;
use crate::MockStoreClient;
use crate::PathCache;
use crate::PathScheme;
use crate::Stat;
use crate::StoreClient;
use crate::StoreError;
use crate::WatchedEvent;

const SERVICE: &str = "/r/presence/c1/s1";
const NODE: &str = "/r/presence/c1/s1/n1";

fn resolver(store: Arc<dyn StoreClient>) -> PresenceResolver {
    PresenceResolver::new(
        PathScheme::new("/r").unwrap(),
        store,
        Arc::new(PathCache::new(64, 4)),
        Arc::new(BincodeAttributeSerializer),
    )
}

fn encoded(port: &str) -> Vec<u8> {
    let attributes: Attributes = [("port".to_string(), port.to_string())].into();
    BincodeAttributeSerializer.serialize(&attributes).unwrap()
}

/// # Case 1: cache miss then hit
///
/// ## Validation criteria
/// 1. first lookup reads the store with a watch and fills the cache
/// 2. second lookup is served from cache
#[tokio::test]
async fn test_service_lookup_case1() {
    let mut store = MockStoreClient::new();
    store
        .expect_get_children()
        .withf(|path, watch| path == SERVICE && *watch)
        .times(1)
        .returning(|_, _| Ok((vec!["n1".to_string(), "n2".to_string()], Stat::default())));
    let resolver = resolver(Arc::new(store));

    let first = resolver.service("c1", "s1", true).await.into_option().unwrap();
    assert_eq!(first.node_ids, vec!["n1", "n2"]);

    let second = resolver.service("c1", "s1", true).await.into_option().unwrap();
    assert_eq!(second, first);
    assert_eq!(resolver.cache().hit_count(), 1);
    assert_eq!(resolver.cache().miss_count(), 1);
}

/// # Case 2: service path absent
///
/// ## Validation criteria
/// 1. NotFound, not an error
/// 2. an existence watch is armed
/// 3. absence is not cached
#[tokio::test]
async fn test_service_lookup_case2() {
    let mut store = MockStoreClient::new();
    store
        .expect_get_children()
        .times(2)
        .returning(|p, _| Err(StoreError::NoNode { path: p.to_string() }));
    store
        .expect_exists()
        .withf(|path, watch| path == SERVICE && *watch)
        .times(2)
        .returning(|_, _| Ok(None));
    let resolver = resolver(Arc::new(store));

    assert!(resolver.service("c1", "s1", true).await.is_not_found());
    assert!(resolver.service("c1", "s1", true).await.is_not_found());
    assert!(resolver.cache().is_empty());
}

/// # Case 3: transient store failure
///
/// ## Validation criteria
/// 1. Error, distinguishable from NotFound
/// 2. no existence watch attempted
#[tokio::test]
async fn test_service_lookup_case3() {
    let mut store = MockStoreClient::new();
    store
        .expect_get_children()
        .returning(|_, _| Err(StoreError::ConnectionLoss));
    store.expect_exists().times(0);
    let resolver = resolver(Arc::new(store));

    let result = resolver.service("c1", "s1", true).await;
    assert!(matches!(result, Lookup::Error(Error::Store(StoreError::ConnectionLoss))));
}

/// # Case 4: node created between the failed read and the existence check
///
/// ## Validation criteria
/// 1. the read is retried and the node found
#[tokio::test]
async fn test_node_lookup_case4() {
    let mut store = MockStoreClient::new();
    let mut reads = 0;
    store.expect_get_data().times(2).returning(move |p, _| {
        reads += 1;
        if reads == 1 {
            Err(StoreError::NoNode { path: p.to_string() })
        } else {
            Ok((encoded("1234"), Stat::default()))
        }
    });
    store.expect_exists().times(1).returning(|_, _| Ok(Some(Stat::default())));
    let resolver = resolver(Arc::new(store));

    let node = resolver.node("c1", "s1", "n1", true).await.into_option().unwrap();
    assert_eq!(node.attribute("port"), Some("1234"));
    assert!(resolver.cache().contains(NODE));
}

/// # Case 5: undecodable payload
///
/// ## Validation criteria
/// 1. Error(Serialization)
#[tokio::test]
async fn test_node_lookup_case5() {
    let mut store = MockStoreClient::new();
    store
        .expect_get_data()
        .returning(|_, _| Ok((vec![0xff, 0xff, 0xff], Stat::default())));
    let resolver = resolver(Arc::new(store));

    let result = resolver.node("c1", "s1", "n1", true).await;
    assert!(matches!(result, Lookup::Error(Error::Serialization(_))));
}

#[tokio::test]
async fn test_invalid_token_is_an_error() {
    let resolver = resolver(Arc::new(MockStoreClient::new()));
    assert!(matches!(
        resolver.node("c1", "s/1", "n1", true).await,
        Lookup::Error(Error::InvalidPath(_))
    ));
    assert!(matches!(resolver.service("", "s1", true).await, Lookup::Error(Error::InvalidPath(_))));
}

#[tokio::test]
async fn test_lookup_arms_watches_against_mem_store() {
    let (store, mut rx) = MemStore::new();
    let resolver = resolver(Arc::new(store.clone()));

    assert!(resolver.node("c1", "s1", "n1", true).await.is_not_found());

    crate::update_path(&store, NODE, &encoded("1234"), &[], CreateMode::Ephemeral)
        .await
        .unwrap();
    assert_eq!(rx.try_recv().unwrap(), WatchedEvent::node(NODE, EventKind::Created));

    let node = resolver.node("c1", "s1", "n1", true).await.into_option().unwrap();
    assert_eq!(node.attribute("port"), Some("1234"));
    let members = resolver.service("c1", "s1", false).await.into_option().unwrap();
    assert_eq!(members.node_ids, vec!["n1"]);

    store.set_data(NODE, &encoded("9999"), None).await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), WatchedEvent::node(NODE, EventKind::DataChanged));
}

#[tokio::test]
async fn test_children_is_empty_on_error() {
    let (store, _rx) = MemStore::new();
    let resolver = resolver(Arc::new(store.clone()));
    assert!(resolver.children("/nowhere").await.is_empty());

    store.create("/r", b"", &[], CreateMode::Persistent).await.unwrap();
    store.create("/r/a", b"", &[], CreateMode::Persistent).await.unwrap();
    assert_eq!(resolver.children("/r").await, vec!["a"]);
}
