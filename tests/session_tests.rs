// ABOUTME: Tests for the relay session table
// ABOUTME: Verifies creation through the registry, lookup, eviction and resume options

use coder_agent::backends::mock::MockAdapter;
use coder_agent::{AdapterRegistry, StartOpts};
use headless_coder::relay::sessions::SessionStore;

fn registry() -> AdapterRegistry {
    let registry = AdapterRegistry::new();
    registry.register("mock", MockAdapter::echo().factory());
    registry
}

#[tokio::test]
async fn test_session_create_and_get() {
    let registry = registry();
    let store = SessionStore::new();
    assert!(store.is_empty());

    let session = store
        .create(&registry, "mock", StartOpts::default())
        .await
        .unwrap();
    assert_eq!(session.provider, "mock");
    assert!(session.thread.id().is_some());
    assert_eq!(store.len(), 1);

    let loaded = store.get(&session.id).unwrap();
    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.thread.id(), session.thread.id());
}

#[tokio::test]
async fn test_session_ids_are_unique() {
    let registry = registry();
    let store = SessionStore::new();

    let a = store.create(&registry, "mock", StartOpts::default()).await.unwrap();
    let b = store.create(&registry, "mock", StartOpts::default()).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_unknown_provider_stores_nothing() {
    let registry = registry();
    let store = SessionStore::new();

    let err = store
        .create(&registry, "missing", StartOpts::default())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_evict_removes_session() {
    let registry = registry();
    let store = SessionStore::new();
    let session = store.create(&registry, "mock", StartOpts::default()).await.unwrap();

    assert!(store.evict(&session.id).is_some());
    assert!(store.get(&session.id).is_none());
    assert!(store.evict(&session.id).is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_resume_option_sets_thread_id() {
    let registry = registry();
    let store = SessionStore::new();
    let opts = StartOpts {
        resume: Some("existing-thread".to_string()),
        ..Default::default()
    };

    let session = store.create(&registry, "mock", opts).await.unwrap();
    assert_eq!(session.thread.id(), Some("existing-thread"));
}

#[tokio::test]
async fn test_clones_share_the_table() {
    let registry = registry();
    let store = SessionStore::new();
    let other = store.clone();

    let session = store.create(&registry, "mock", StartOpts::default()).await.unwrap();
    assert!(other.get(&session.id).is_some());
}
