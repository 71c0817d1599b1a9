// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Notification handling integration test
//!
//! 1. **Subscription Setup**: notifications are enabled and the keyspace pattern is subscribed
//! 2. **External Changes**: writes by other clients reach the mirror through notifications
//! 3. **Label Filtering**: events that do not change the hash do not trigger a resync
//! 4. **Debounce**: a burst of notifications is coalesced into few resyncs
//! 5. **Multiple Instances**: two caches of the same hash see each other's writes

use std::time::Duration;

use keyspace_cache::testing::store::TestStore;
use keyspace_cache::testing::types::TestConfig;
use keyspace_cache::testing::util::wait_for_cache_state;
use keyspace_cache::CacheMap;
use keyspace_cache::SyncState;
use keyspace_cache::DEFAULT_NOTIFY_FLAGS;
use pretty_assertions::assert_eq;
use tokio::time::sleep;

#[tokio::test]
async fn test_external_changes() -> anyhow::Result<()> {
    let store = TestStore::new();
    let cache = CacheMap::<TestConfig>::new(store.clone(), store.feed(), "ext", "external")
        .await?;

    assert_eq!(store.notify_flags().await.as_deref(), Some(DEFAULT_NOTIFY_FLAGS));
    assert_eq!(store.stats().await.subscribers, 1);

    store.hset("ext", "k1", "v1").await;
    store.hset("ext", "k2", "v2").await;
    store.hset("other", "k3", "v3").await;

    wait_for_cache_state(&cache, &[("k1", "v1"), ("k2", "v2")])
        .await
        .map_err(anyhow::Error::msg)?;

    store.hset("ext", "k1", "v1x").await;
    store.hdel("ext", &["k2"]).await;

    wait_for_cache_state(&cache, &[("k1", "v1x")])
        .await
        .map_err(anyhow::Error::msg)?;

    // Deleting the last field deletes the hash.
    store.hdel("ext", &["k1"]).await;

    wait_for_cache_state(&cache, &[])
        .await
        .map_err(anyhow::Error::msg)?;

    cache.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_unrelated_events_are_skipped() -> anyhow::Result<()> {
    let store = TestStore::new();
    store.hset("skip", "a", "1").await;

    let cache = CacheMap::<TestConfig>::new(store.clone(), store.feed(), "skip", "skip-events")
        .await?;
    let hkeys = store.stats().await.hkeys;

    store.notify("skip", "expire").await;
    store.notify("skip", "persist").await;

    sleep(Duration::from_millis(400)).await;

    assert_eq!(store.stats().await.hkeys, hkeys, "no resync expected");
    assert_eq!(cache.sync_state(), SyncState::Complete);
    assert_eq!(cache.version().await, 1);

    // A mutating event, even without a data change, triggers a resync.
    store.notify("skip", "hset").await;

    let mut resynced = false;
    for _ in 0..20 {
        if store.stats().await.hkeys > hkeys && cache.sync_state() == SyncState::Complete {
            resynced = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(resynced, "a mutating event must trigger a resync");
    assert_eq!(cache.version().await, 2);

    cache.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_burst_is_debounced() -> anyhow::Result<()> {
    let store = TestStore::new();
    let cache = CacheMap::<TestConfig>::new(store.clone(), store.feed(), "burst", "debounce")
        .await?;
    let hkeys = store.stats().await.hkeys;

    for i in 0..50 {
        store.hset("burst", &format!("f{i}"), &i.to_string()).await;
    }

    sleep(Duration::from_millis(500)).await;

    assert_eq!(cache.keys().await.len(), 50);

    let resyncs = store.stats().await.hkeys - hkeys;
    assert!(
        (1..=3).contains(&resyncs),
        "burst should be coalesced, got {} resyncs",
        resyncs
    );

    cache.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_two_instances_of_one_hash() -> anyhow::Result<()> {
    let store = TestStore::new();

    let cache_a = CacheMap::<TestConfig>::new(store.clone(), store.feed(), "shared", "cache-a")
        .await?;
    let cache_b = CacheMap::<TestConfig>::new(store.clone(), store.feed(), "shared", "cache-b")
        .await?;

    assert_eq!(store.stats().await.subscribers, 2);

    cache_a.set("from_a", "1").await?;
    cache_b.set("from_b", "2").await?;

    // Each instance sees its own write right away...
    assert_eq!(cache_a.get("from_a").await.map(|v| v.into_string()), Some("1".to_string()));
    assert_eq!(cache_b.get("from_b").await.map(|v| v.into_string()), Some("2".to_string()));

    // ...and the other's write through notifications.
    wait_for_cache_state(&cache_a, &[("from_a", "1"), ("from_b", "2")])
        .await
        .map_err(anyhow::Error::msg)?;
    wait_for_cache_state(&cache_b, &[("from_a", "1"), ("from_b", "2")])
        .await
        .map_err(anyhow::Error::msg)?;

    cache_a.destroy().await;

    // The remaining instance is unaffected.
    store.hset("shared", "late", "3").await;
    wait_for_cache_state(&cache_b, &[("from_a", "1"), ("from_b", "2"), ("late", "3")])
        .await
        .map_err(anyhow::Error::msg)?;

    cache_b.destroy().await;
    Ok(())
}
