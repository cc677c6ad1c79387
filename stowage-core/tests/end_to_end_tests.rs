/*!
End-to-end tests: configuration, adapters, stores and migrations together.
*/

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::storage::{AdapterOptions, DeviceBackend, DeviceStorage};
use stowage_core::{
    ManualClock, Migration, PersistentStore, SaveOptions, StorageAdapter, StorageAdapterExt,
    StorageContext, StoreOptions, StowageConfig, StowageError, Value,
};
use tempfile::TempDir;

fn file_config(dir: &std::path::Path) -> StowageConfig {
    let json = serde_json::json!({
        "default_adapter": "device",
        "compression_threshold": 32,
        "adapters": [
            {"name": "device", "backend": "device", "path": dir.join("device.log"),
             "serializer": "composite", "compression": "huffman",
             "encryption": "xor", "key": "correct horse"},
            {"name": "records", "backend": "indexed", "path": dir.join("records"),
             "compression": "lz", "prefix": "rec:"},
            {"name": "prefs", "backend": "local", "path": dir.join("local.json"),
             "quota": 4096},
            {"name": "cache", "backend": "memory", "ttl_ms": 1000}
        ]
    });
    StowageConfig::from_json_str(&json.to_string()).unwrap()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct SavedSearch {
    query: String,
    radius_km: u32,
    remote: bool,
}

#[tokio::test]
async fn test_values_survive_restart_on_every_file_backend() {
    let temp_dir = TempDir::new().unwrap();
    let config = file_config(temp_dir.path());
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
    let profile = Value::object([
        ("updatedAt", Value::date(at)),
        ("skills", Value::Set(vec![Value::from("rust"), Value::from("sql")])),
        ("bio", Value::from("Backend engineer who likes storage engines. ".repeat(4))),
    ]);
    let search = SavedSearch {
        query: "rust".into(),
        radius_km: 25,
        remote: true,
    };

    {
        let context = StorageContext::from_config(&config).await.unwrap();
        let storage = context.storage();
        storage.get_adapter(None).unwrap().set("profile", profile.clone()).await.unwrap();
        storage
            .get_adapter(Some("records"))
            .unwrap()
            .set_as("search", &search)
            .await
            .unwrap();
        storage
            .get_adapter(Some("prefs"))
            .unwrap()
            .set("theme", Value::from("dark"))
            .await
            .unwrap();
    }

    let context = StorageContext::from_config(&config).await.unwrap();
    let storage = context.storage();
    assert_eq!(
        storage.get_adapter(Some("device")).unwrap().get("profile").await,
        Some(profile)
    );
    let restored: Option<SavedSearch> = storage
        .get_adapter(Some("records"))
        .unwrap()
        .get_as("search")
        .await
        .unwrap();
    assert_eq!(restored, Some(search));
    assert_eq!(
        storage.get_adapter(Some("prefs")).unwrap().get("theme").await,
        Some(Value::from("dark"))
    );
    // the memory adapter starts empty again
    assert!(storage.get_adapter(Some("cache")).unwrap().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_key_cannot_read_device_log() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = file_config(temp_dir.path());
    let context = StorageContext::from_config(&config).await.unwrap();
    let adapter = context.storage().get_adapter(None).unwrap();
    adapter.set("secret", Value::from("launch codes")).await.unwrap();
    drop(adapter);
    drop(context);

    config.adapters[0].key = Some("wrong horse".into());
    let context = StorageContext::from_config(&config).await.unwrap();
    let adapter = context.storage().get_adapter(None).unwrap();
    let err = adapter.try_get("secret").await.unwrap_err();
    assert!(matches!(err, StowageError::Encryption { .. }));
    assert_eq!(adapter.get("secret").await, None);
}

#[tokio::test]
async fn test_ttl_through_configured_adapter() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(1_000_000);
    let context = StorageContext::from_config_with_clock(
        &file_config(temp_dir.path()),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    let cache = context.storage().get_adapter(Some("cache")).unwrap();

    cache.set("jobs", Value::from(3i64)).await.unwrap();
    clock.advance(Duration::from_millis(500));
    assert_eq!(cache.get("jobs").await, Some(Value::from(3i64)));

    clock.advance(Duration::from_millis(1_000));
    assert_eq!(cache.get("jobs").await, None);
    assert!(!cache.has("jobs").await.unwrap());
}

#[tokio::test]
async fn test_local_area_quota() {
    let temp_dir = TempDir::new().unwrap();
    let context = StorageContext::from_config(&file_config(temp_dir.path()))
        .await
        .unwrap();
    let prefs = context.storage().get_adapter(Some("prefs")).unwrap();

    let err = prefs
        .set("blob", Value::from("x".repeat(8192)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QUOTA_EXCEEDED");
    assert!(!prefs.has("blob").await.unwrap());
}

#[tokio::test]
async fn test_prefixed_adapters_share_device_log() {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(DeviceBackend::open(temp_dir.path().join("shared.log")).await.unwrap());
    let cart = DeviceStorage::from_shared(backend.clone(), AdapterOptions::default().with_prefix("cart:"));
    let auth = DeviceStorage::from_shared(backend.clone(), AdapterOptions::default().with_prefix("auth:"));

    cart.set("items", Value::from(2i64)).await.unwrap();
    auth.set("token", Value::from("abc")).await.unwrap();
    cart.clear().await.unwrap();

    assert!(cart.keys().await.unwrap().is_empty());
    assert_eq!(auth.keys().await.unwrap(), vec!["token".to_string()]);

    let stats = backend.compact().await.unwrap();
    assert_eq!(stats.records_after, 1);
    assert_eq!(auth.get("token").await, Some(Value::from("abc")));
}

/// Version `v` appends `v` to `history`; rolling back pops it
fn history_step(version: u32) -> Migration {
    Migration::new(version, move |data| {
        let Value::Object(mut map) = data else {
            return Err(StowageError::validation("expected an object"));
        };
        let history = map
            .entry("history".to_string())
            .or_insert_with(|| Value::Array(vec![]));
        if let Value::Array(items) = history {
            items.push(Value::from(version as i64));
        }
        Ok(Value::Object(map))
    })
    .with_down(move |data| {
        let Value::Object(mut map) = data else {
            return Err(StowageError::validation("expected an object"));
        };
        if let Some(Value::Array(items)) = map.get_mut("history") {
            items.pop();
        }
        Ok(Value::Object(map))
    })
}

#[tokio::test]
async fn test_store_upgrade_and_rollback_versions_two_to_five() {
    let temp_dir = TempDir::new().unwrap();
    let context = StorageContext::from_config(&file_config(temp_dir.path()))
        .await
        .unwrap();
    let storage = context.storage();
    let migrations: Vec<Migration> = (1..=5).map(history_step).collect();

    let v2: PersistentStore<Value> = storage
        .create_store(
            "account",
            Some("records"),
            StoreOptions::new(2).with_migrations(migrations.clone()),
        )
        .unwrap();
    let original = Value::object([
        ("name", Value::from("Ada")),
        ("history", Value::Array(vec![Value::from(1i64), Value::from(2i64)])),
    ]);
    v2.save(&original).await.unwrap();

    let v5: PersistentStore<Value> = storage
        .create_store(
            "account",
            Some("records"),
            StoreOptions::new(5).with_migrations(migrations.clone()),
        )
        .unwrap();
    let upgraded = v5.load().await.unwrap().unwrap();
    let history: Vec<i64> = upgraded
        .get("history")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .collect();
    assert_eq!(history, vec![1, 2, 3, 4, 5]);
    assert_eq!(v5.migrations().history().len(), 3);

    // a second load finds version 5 and runs nothing
    v5.load().await.unwrap();
    assert_eq!(v5.migrations().history().len(), 3);

    assert_eq!(v2.load().await.unwrap(), Some(original));
}

#[tokio::test]
async fn test_rollback_without_down_keeps_stored_version() {
    let temp_dir = TempDir::new().unwrap();
    let context = StorageContext::from_config(&file_config(temp_dir.path()))
        .await
        .unwrap();
    let storage = context.storage();

    let newer: PersistentStore<Value> = storage
        .create_store(
            "doc",
            Some("records"),
            StoreOptions::new(2)
                .with_migration(history_step(1))
                .with_migration(Migration::new(2, Ok)),
        )
        .unwrap();
    newer.save(&Value::object([("body", Value::from("v2"))])).await.unwrap();

    let older: PersistentStore<Value> = storage
        .create_store(
            "doc",
            Some("records"),
            StoreOptions::new(1)
                .with_migration(history_step(1))
                .with_migration(Migration::new(2, Ok)),
        )
        .unwrap();
    let err = older.load().await.unwrap_err();
    assert!(matches!(
        err,
        StowageError::Migration {
            from_version: 2,
            to_version: 1,
            ..
        }
    ));
    assert_eq!(
        newer.load().await.unwrap(),
        Some(Value::object([("body", Value::from("v2"))]))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduled_writes_overlapping_direct_saves() {
    let temp_dir = TempDir::new().unwrap();
    let context = StorageContext::from_config(&file_config(temp_dir.path()))
        .await
        .unwrap();
    let storage = context.storage();

    for adapter in ["records", "device"] {
        let store: PersistentStore<Vec<u32>> = storage
            .create_store("queue", Some(adapter), StoreOptions::new(1))
            .unwrap();

        for i in 0..40u32 {
            let scheduled_value = vec![i, 0];
            let scheduled = store.save_with(
                &scheduled_value,
                SaveOptions::debounce(Duration::from_millis(1)),
            );
            let direct = async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                store.save(&vec![i, 1]).await
            };
            let (scheduled, direct) = tokio::join!(scheduled, direct);
            scheduled.unwrap();
            direct.unwrap();
        }
        store.flush().await.unwrap();

        // every scheduled timer has fired by now
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.save(&vec![99, 99]).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(vec![99, 99]), "{adapter}");
    }

    // both file backends hold exactly what was last written after a restart
    drop(context);
    let context = StorageContext::from_config(&file_config(temp_dir.path()))
        .await
        .unwrap();
    for adapter in ["records", "device"] {
        let store: PersistentStore<Vec<u32>> = context
            .storage()
            .create_store("queue", Some(adapter), StoreOptions::new(1))
            .unwrap();
        assert_eq!(store.load().await.unwrap(), Some(vec![99, 99]), "{adapter}");
    }
}
