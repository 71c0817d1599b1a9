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

//! Recovery integration test
//!
//! This test validates that a cache keeps converging when its change feed fails.
//! The key aspects being tested are:
//!
//! 1. **Connection Drop Detection**: the worker notices the closed subscription
//! 2. **Fallback Resync**: changes made while the feed is down still reach the mirror
//! 3. **Re-subscribe**: the subscription is re-established and notifications flow again
//! 4. **No Notifications At All**: a feed that cannot re-subscribe degrades to periodic resync
//! 5. **Resync Failures**: a failing `HKEYS` is retried and the cache recovers

use std::time::Duration;

use keyspace_cache::testing::store::SubscribeFailure;
use keyspace_cache::testing::store::TestStore;
use keyspace_cache::testing::types::TestConfig;
use keyspace_cache::testing::util::retry_check_cache_state;
use keyspace_cache::testing::util::wait_for_cache_state;
use keyspace_cache::CacheMap;
use keyspace_cache::CacheMapConfig;
use tokio::time::sleep;

fn fast_fallback() -> CacheMapConfig {
    CacheMapConfig::default()
        .with_fallback_interval(Duration::from_millis(100))
        .with_max_backoff(Duration::from_millis(400))
}

#[tokio::test]
async fn test_recovery_after_dropped_feed() -> anyhow::Result<()> {
    // 1. Populate the store and start the cache
    let store = TestStore::new();
    store.hset("recovery", "key1", "initial_value1").await;
    store.hset("recovery", "key2", "initial_value2").await;

    let cache = CacheMap::<TestConfig>::with_config(
        store.clone(),
        store.feed(),
        "recovery",
        "recovery-cache",
        fast_fallback(),
    )
    .await?;

    wait_for_cache_state(&cache, &[("key1", "initial_value1"), ("key2", "initial_value2")])
        .await
        .map_err(anyhow::Error::msg)?;

    // 2. Changes from another client arrive through notifications
    store.hset("recovery", "key3", "value3").await;

    wait_for_cache_state(&cache, &[
        ("key1", "initial_value1"),
        ("key2", "initial_value2"),
        ("key3", "value3"),
    ])
    .await
    .map_err(anyhow::Error::msg)?;

    // 3. Simulate a network failure, then write while the feed is down
    store.drop_all_connections().await;

    store.hset("recovery", "key2", "post_failure_value2").await;
    store.hdel("recovery", &["key3"]).await;

    // 4. The fallback resync picks the missed changes up
    retry_check_cache_state(
        &cache,
        &[("key1", "initial_value1"), ("key2", "post_failure_value2")],
        50,
        Duration::from_millis(100),
    )
    .await
    .map_err(anyhow::Error::msg)?;

    // 5. The subscription is re-established
    let mut resubscribed = false;
    for _ in 0..50 {
        if store.stats().await.subscribers == 1 {
            resubscribed = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(resubscribed, "subscription was not re-established");

    // 6. And notifications drive the cache again
    store.hset("recovery", "key4", "final_value4").await;

    wait_for_cache_state(&cache, &[
        ("key1", "initial_value1"),
        ("key2", "post_failure_value2"),
        ("key4", "final_value4"),
    ])
    .await
    .map_err(anyhow::Error::msg)?;

    cache.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_periodic_resync_without_notifications() -> anyhow::Result<()> {
    let store = TestStore::new();
    let cache = CacheMap::<TestConfig>::with_config(
        store.clone(),
        store.feed(),
        "poll",
        "periodic-resync",
        fast_fallback(),
    )
    .await?;

    // Pub/sub goes away for good.
    store
        .set_fail_subscribe(Some(SubscribeFailure::Unsupported))
        .await;
    store.drop_all_connections().await;

    let hkeys_before = store.stats().await.hkeys;

    // Writes through the cache are still observed, as the writer invalidates the mirror.
    cache.set("a", "1").await?;
    assert_eq!(
        cache.get("a").await.map(|v| v.into_string()),
        Some("1".to_string())
    );

    // Writes behind the cache's back are picked up by the periodic resync.
    store.hset("poll", "b", "2").await;

    retry_check_cache_state(
        &cache,
        &[("a", "1"), ("b", "2")],
        50,
        Duration::from_millis(100),
    )
    .await
    .map_err(anyhow::Error::msg)?;

    // Keeps resyncing, and keeps trying to re-subscribe.
    sleep(Duration::from_millis(500)).await;
    let stats = store.stats().await;
    assert!(stats.hkeys >= hkeys_before + 2, "stats: {:?}", stats);
    assert!(stats.psubscribes >= 2, "stats: {:?}", stats);
    assert_eq!(stats.subscribers, 0);

    cache.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_recovery_after_failed_resync() -> anyhow::Result<()> {
    let store = TestStore::new();
    store.hset("flaky", "a", "1").await;

    let cache = CacheMap::<TestConfig>::with_config(
        store.clone(),
        store.feed(),
        "flaky",
        "failed-resync",
        fast_fallback(),
    )
    .await?;

    // Resyncs fail for a while; the mirror keeps its last published content.
    store.set_fail_hkeys(true).await;
    store.hset("flaky", "b", "2").await;

    sleep(Duration::from_millis(400)).await;
    assert!(store.stats().await.hkeys >= 3, "failed resyncs are retried");

    let version = cache.version().await;
    assert_eq!(version, 1, "a failed resync publishes nothing");

    // The server comes back.
    store.set_fail_hkeys(false).await;

    retry_check_cache_state(
        &cache,
        &[("a", "1"), ("b", "2")],
        50,
        Duration::from_millis(100),
    )
    .await
    .map_err(anyhow::Error::msg)?;

    cache.destroy().await;
    Ok(())
}
