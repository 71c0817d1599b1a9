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

//! Concurrent write consistency integration test
//!
//! The key aspects being tested are:
//!
//! 1. **Concurrent Writers**: several tasks write distinct fields through one shared cache
//! 2. **Single Wait**: one consistency wait afterwards observes all of them
//! 3. **Monotonic View**: while writes keep coming, readers never observe an older mirror
//!    version after a newer one

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use keyspace_cache::testing::store::TestStore;
use keyspace_cache::testing::types::TestConfig;
use keyspace_cache::CacheMap;
use keyspace_cache::Entry;
use pretty_assertions::assert_eq;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_concurrent_sets() -> anyhow::Result<()> {
    let store = TestStore::new();
    let cache = Arc::new(
        CacheMap::<TestConfig>::new(store.clone(), store.feed(), "M", "concurrent-sets")
            .await?,
    );

    let mut handles = vec![];
    for i in 1..=4 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.set(&format!("f{i}"), format!("v{i}")).await
        }));
    }

    for h in handles {
        h.await??;
    }

    assert!(cache.wait_until_consistent().await);

    assert_eq!(cache.keys().await.len(), 4);

    let mut entries = cache.entries().await;
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    assert_eq!(entries, vec![
        Entry::new("f1", "v1"),
        Entry::new("f2", "v2"),
        Entry::new("f3", "v3"),
        Entry::new("f4", "v4"),
    ]);

    let cache = Arc::try_unwrap(cache).map_err(|_| anyhow::anyhow!("cache still shared"))?;
    cache.destroy().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_monotonic_versions() -> anyhow::Result<()> {
    let store = TestStore::new();
    let cache = Arc::new(
        CacheMap::<TestConfig>::new(store.clone(), store.feed(), "mono", "monotonic")
            .await?,
    );

    let stop = Arc::new(AtomicBool::new(false));

    // A writer behind the cache's back, so resyncs are driven by notifications only.
    let writer = {
        let store = store.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut n = 0u64;
            while !stop.load(Ordering::Relaxed) {
                n += 1;
                store.hset("mono", "counter", &n.to_string()).await;
                if n % 5 == 0 {
                    store.hdel("mono", &["counter"]).await;
                }
                sleep(Duration::from_millis(7)).await;
            }
            n
        })
    };

    let mut readers = vec![];
    for _ in 0..3 {
        let cache = cache.clone();
        let stop = stop.clone();
        readers.push(tokio::spawn(async move {
            let mut last = 0u64;
            let mut reads = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let (version, _value) = cache
                    .access(|m| (m.version, m.data.get("counter").cloned()))
                    .await;
                assert!(
                    version >= last,
                    "mirror went backwards: {} after {}",
                    version,
                    last
                );
                last = version;
                reads += 1;
                sleep(Duration::from_millis(3)).await;
            }
            reads
        }));
    }

    sleep(Duration::from_millis(800)).await;
    stop.store(true, Ordering::Relaxed);

    let written = writer.await?;
    for r in readers {
        assert!(r.await? > 0);
    }

    // Once writes stop, the cache converges to the store.
    sleep(Duration::from_millis(300)).await;
    let expected = store.snapshot("mono").await;
    let got = cache
        .entries()
        .await
        .into_iter()
        .map(|e| (e.key, e.value.into_string()))
        .collect::<std::collections::BTreeMap<_, _>>();
    assert_eq!(got, expected, "after {} writes", written);
    assert!(cache.version().await > 1);

    let cache = Arc::try_unwrap(cache).map_err(|_| anyhow::anyhow!("cache still shared"))?;
    cache.destroy().await;
    Ok(())
}
