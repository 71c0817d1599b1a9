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

//! Partial resync integration test
//!
//! A field that cannot be read is left out of the mirror; the other fields are still published.

use keyspace_cache::testing::store::TestStore;
use keyspace_cache::testing::types::TestConfig;
use keyspace_cache::testing::util::check_cache_state;
use keyspace_cache::testing::util::wait_for_cache_state;
use keyspace_cache::CacheMap;
use keyspace_cache::SyncState;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_unreadable_field_is_skipped() -> anyhow::Result<()> {
    let store = TestStore::new();
    store.hset("p", "a", "1").await;
    store.hset("p", "b", "2").await;
    store.hset("p", "c", "3").await;
    store.set_unreadable("p", "b", true).await;

    // The initial sync succeeds without the unreadable field.
    let cache = CacheMap::<TestConfig>::new(store.clone(), store.feed(), "p", "partial")
        .await?;

    assert_eq!(cache.sync_state(), SyncState::Complete);
    // Every listed field was attempted, the unreadable one included.
    assert_eq!(store.stats().await.hget, 3);
    check_cache_state(&cache, &[("a", "1"), ("c", "3")])
        .await
        .map_err(anyhow::Error::msg)?;
    assert_eq!(cache.get("b").await, None);

    // Later resyncs skip it as well.
    store.hset("p", "d", "4").await;
    wait_for_cache_state(&cache, &[("a", "1"), ("c", "3"), ("d", "4")])
        .await
        .map_err(anyhow::Error::msg)?;

    // Once readable again, the next resync brings it back.
    store.set_unreadable("p", "b", false).await;
    store.notify("p", "hset").await;

    wait_for_cache_state(&cache, &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")])
        .await
        .map_err(anyhow::Error::msg)?;

    cache.destroy().await;
    Ok(())
}
