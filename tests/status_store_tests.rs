//! Behaviour every status store must share, run against each implementation

use std::sync::Arc;
use std::time::Duration;
use zonepool::config::StatusStoreConfig;
use zonepool::model::{Status, ZoneAction};
use zonepool::pool::Nameserver;
use zonepool::status::{self, StatusStore, memory::MemoryStatusStore, sql::SqlStatusStore};

fn ns(host: &str) -> Nameserver {
    Nameserver::new(host, 53)
}

async fn exercise_store(store: &dyn StatusStore, zone_id: &str) {
    store
        .store(zone_id, ZoneAction::Update, &ns("ns1.example.net"), Status::Pending, None)
        .await
        .unwrap();
    store
        .store(zone_id, ZoneAction::Update, &ns("ns2.example.net"), Status::Pending, None)
        .await
        .unwrap();
    // overwrite, not append
    store
        .store(zone_id, ZoneAction::Update, &ns("ns1.example.net"), Status::Success, Some(7))
        .await
        .unwrap();
    store
        .store(zone_id, ZoneAction::Delete, &ns("ns1.example.net"), Status::Error, None)
        .await
        .unwrap();

    let mut rows = store.retrieve(zone_id, ZoneAction::Update).await.unwrap();
    rows.sort_by(|a, b| a.nameserver.cmp(&b.nameserver));
    assert_eq!(rows.len(), 2, "{} keeps one row per nameserver", store.name());
    assert_eq!(rows[0].status, Status::Success);
    assert_eq!(rows[0].serial, Some(7));
    assert_eq!(rows[1].status, Status::Pending);
    assert_eq!(rows[1].serial, None);

    store.clear(zone_id, ZoneAction::Update).await.unwrap();
    assert!(store.retrieve(zone_id, ZoneAction::Update).await.unwrap().is_empty());

    // other actions are untouched by clear
    let delete_rows = store.retrieve(zone_id, ZoneAction::Delete).await.unwrap();
    assert_eq!(delete_rows.len(), 1);
    assert_eq!(delete_rows[0].status, Status::Error);
    store.clear(zone_id, ZoneAction::Delete).await.unwrap();
}

#[tokio::test]
async fn test_memory_store_contract() {
    let store = MemoryStatusStore::new(Duration::from_secs(60));
    exercise_store(&store, "zone-memory").await;
}

#[tokio::test]
async fn test_sql_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("status.db").display());
    let store = SqlStatusStore::connect(&url).await.unwrap();
    exercise_store(&store, "zone-sql").await;
}

#[tokio::test]
async fn test_sql_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("status.db").display());

    {
        let store = SqlStatusStore::connect(&url).await.unwrap();
        store
            .store("zone-1", ZoneAction::Create, &ns("ns1.example.net"), Status::Success, Some(3))
            .await
            .unwrap();
    }

    let reopened = SqlStatusStore::connect(&url).await.unwrap();
    let rows = reopened.retrieve("zone-1", ZoneAction::Create).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].nameserver, ns("ns1.example.net"));
    assert_eq!(rows[0].serial, Some(3));
}

#[tokio::test]
async fn test_sql_store_reaps_old_rows() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("status.db").display());
    let store = SqlStatusStore::connect(&url).await.unwrap();

    store
        .store("zone-1", ZoneAction::Update, &ns("ns1.example.net"), Status::Pending, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.reap_stale(Duration::from_secs(3600)).await.unwrap(), 0);
    assert_eq!(store.reap_stale(Duration::from_millis(5)).await.unwrap(), 1);
    assert!(store.retrieve("zone-1", ZoneAction::Update).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sql_store_close_releases_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("status.db").display());
    let store = SqlStatusStore::connect(&url).await.unwrap();
    store
        .store("zone-1", ZoneAction::Update, &ns("ns1.example.net"), Status::Pending, None)
        .await
        .unwrap();

    store.close().await;
    assert!(store.retrieve("zone-1", ZoneAction::Update).await.is_err());

    // rows written before close are still there for the next process
    let reopened = SqlStatusStore::connect(&url).await.unwrap();
    assert_eq!(reopened.retrieve("zone-1", ZoneAction::Update).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_memory_store_close_is_harmless() {
    let store = MemoryStatusStore::new(Duration::from_secs(60));
    store.close().await;
    exercise_store(&store, "zone-closed").await;
}

#[tokio::test]
async fn test_connect_from_config() {
    let store: Arc<dyn StatusStore> = status::connect(&StatusStoreConfig::Memory { ttl: 30 })
        .await
        .unwrap();
    assert_eq!(store.name(), "memory");
    exercise_store(store.as_ref(), "zone-config").await;
}

#[tokio::test]
async fn test_redis_store_contract() {
    let Ok(url) = std::env::var("ZONEPOOL_TEST_REDIS_URL") else {
        eprintln!("ZONEPOOL_TEST_REDIS_URL not set, skipping Redis status store test");
        return;
    };

    let config = StatusStoreConfig::Redis {
        url,
        key_prefix: format!("zonepool-test:{}", uuid::Uuid::new_v4()),
        ttl: 60,
    };
    let store = status::connect(&config).await.unwrap();
    assert_eq!(store.name(), "redis");
    exercise_store(store.as_ref(), "zone-redis").await;
}
