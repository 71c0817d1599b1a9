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

//! TestStore: an in-memory remote store for integration tests of the cache.
//!
//! It keeps hashes, publishes keyspace notifications to its feeds the way a real server does,
//! and lets a test inject faults: unreadable fields, failing commands, dropped connections
//! and slow reads.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::errors::ConnectionClosed;
use crate::errors::SubscribeError;
use crate::errors::Unsupported;
use crate::notification::Notification;
use crate::type_config::ChangeFeed;
use crate::type_config::RemoteCollection;

/// The database index used in published channel names.
const DB: u32 = 0;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    pattern: String,
    sender: mpsc::UnboundedSender<Notification>,
}

/// How `psubscribe` should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFailure {
    Connection,
    Unsupported,
}

/// Counters describing how the store was used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// `HKEYS` calls, i.e. resyncs attempted.
    pub hkeys: u64,
    pub hget: u64,
    /// Subscriptions currently registered.
    pub subscribers: usize,
    pub psubscribes: u64,
    pub punsubscribes: u64,
    pub closes: u64,
}

#[derive(Debug, Default)]
pub struct State {
    pub hashes: BTreeMap<String, BTreeMap<String, String>>,

    /// The `notify-keyspace-events` setting; nothing is published while it is `None`.
    pub notify_flags: Option<String>,

    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,

    unreadable_fields: BTreeSet<(String, String)>,
    fail_hkeys: bool,
    fail_enable: bool,
    fail_subscribe: Option<SubscribeFailure>,
    read_delay: Option<Duration>,

    stats: Stats,
}

impl State {
    /// Publish a keyspace notification for `key` to every matching subscriber.
    ///
    /// Subscribers whose receiving end is gone are removed.
    fn publish(&mut self, key: &str, event: &str) {
        if self.notify_flags.is_none() {
            return;
        }

        let channel = format!("__keyspace@{}__:{}", DB, key);

        self.subscribers.retain(|sub| {
            if !glob_match(&sub.pattern, &channel) {
                return true;
            }
            sub.sender
                .send(Notification::new(&channel, event))
                .is_ok()
        });
    }
}

/// An in-memory remote store. Cloning shares the same data.
#[derive(Debug, Clone, Default)]
pub struct TestStore {
    pub state: Arc<Mutex<State>>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new pub/sub connection to this store.
    pub fn feed(&self) -> TestFeed {
        TestFeed {
            store: self.clone(),
            subscription: None,
            closed: false,
        }
    }

    /// `HSET key field value`, as any client would do.
    pub async fn hset(&self, key: &str, field: &str, value: &str) {
        let mut state = self.state.lock().await;

        let is_new = !state.hashes.contains_key(key);
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());

        if is_new {
            state.publish(key, "new");
        }
        state.publish(key, "hset");
    }

    /// `HDEL key field...`, as any client would do. Returns the number of removed fields.
    pub async fn hdel(&self, key: &str, fields: &[&str]) -> u64 {
        let mut state = self.state.lock().await;

        let Some(hash) = state.hashes.get_mut(key) else {
            return 0;
        };

        let removed = fields.iter().filter(|f| hash.remove(**f).is_some()).count() as u64;
        let now_empty = hash.is_empty();

        if removed > 0 {
            state.publish(key, "hdel");
        }
        if now_empty {
            state.hashes.remove(key);
            state.publish(key, "del");
        }
        removed
    }

    /// Publish an arbitrary keyspace event for `key`, without changing any data.
    pub async fn notify(&self, key: &str, event: &str) {
        self.state.lock().await.publish(key, event);
    }

    pub async fn snapshot(&self, key: &str) -> BTreeMap<String, String> {
        let state = self.state.lock().await;
        state.hashes.get(key).cloned().unwrap_or_default()
    }

    pub async fn stats(&self) -> Stats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.subscribers = state.subscribers.len();
        stats
    }

    pub async fn notify_flags(&self) -> Option<String> {
        self.state.lock().await.notify_flags.clone()
    }

    /// Make `HGET key field` fail until reset.
    pub async fn set_unreadable(&self, key: &str, field: &str, unreadable: bool) {
        let mut state = self.state.lock().await;
        let k = (key.to_string(), field.to_string());
        if unreadable {
            state.unreadable_fields.insert(k);
        } else {
            state.unreadable_fields.remove(&k);
        }
    }

    pub async fn set_fail_hkeys(&self, fail: bool) {
        self.state.lock().await.fail_hkeys = fail;
    }

    pub async fn set_fail_enable(&self, fail: bool) {
        self.state.lock().await.fail_enable = fail;
    }

    pub async fn set_fail_subscribe(&self, failure: Option<SubscribeFailure>) {
        self.state.lock().await.fail_subscribe = failure;
    }

    /// Delay every `HGET` by `delay`, to simulate a slow or wedged server.
    pub async fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.read_delay = delay;
    }

    /// Simulate a network failure of every pub/sub connection.
    ///
    /// The subscription senders are dropped, so subscribers see their feed closed.
    pub async fn drop_all_connections(&self) {
        self.state.lock().await.subscribers.clear();
    }
}

#[async_trait::async_trait]
impl RemoteCollection for TestStore {
    async fn fields(&self, key: &str) -> Result<Vec<String>, ConnectionClosed> {
        let mut state = self.state.lock().await;
        state.stats.hkeys += 1;

        if state.fail_hkeys {
            return Err(ConnectionClosed::new_str("HKEYS failed").context(key));
        }

        let fields = state
            .hashes
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        Ok(fields)
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, ConnectionClosed> {
        let delay = {
            let mut state = self.state.lock().await;
            state.stats.hget += 1;
            state.read_delay
        };

        // Sleep without holding the lock, so writers are not blocked.
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let state = self.state.lock().await;

        if state
            .unreadable_fields
            .contains(&(key.to_string(), field.to_string()))
        {
            return Err(
                ConnectionClosed::new_str("HGET failed").context(format!("{} {}", key, field))
            );
        }

        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), ConnectionClosed> {
        self.hset(key, field, value).await;
        Ok(())
    }

    async fn del_fields(&self, key: &str, fields: &[&str]) -> Result<u64, ConnectionClosed> {
        Ok(self.hdel(key, fields).await)
    }
}

/// A pub/sub connection to a [`TestStore`].
#[derive(Debug)]
pub struct TestFeed {
    store: TestStore,
    /// Subscriber id and the receiving end of the subscription.
    subscription: Option<(u64, mpsc::UnboundedReceiver<Notification>)>,
    closed: bool,
}

impl TestFeed {
    fn check_open(&self) -> Result<(), ConnectionClosed> {
        if self.closed {
            return Err(ConnectionClosed::new_str("feed is closed"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChangeFeed for TestFeed {
    async fn enable_notifications(&mut self, flags: &str) -> Result<(), ConnectionClosed> {
        self.check_open()?;

        let mut state = self.store.state.lock().await;
        if state.fail_enable {
            return Err(ConnectionClosed::new_str("CONFIG SET failed"));
        }
        state.notify_flags = Some(flags.to_string());
        Ok(())
    }

    async fn psubscribe(&mut self, pattern: &str) -> Result<(), SubscribeError> {
        self.check_open()?;

        let mut state = self.store.state.lock().await;
        state.stats.psubscribes += 1;

        match state.fail_subscribe {
            Some(SubscribeFailure::Connection) => {
                return Err(ConnectionClosed::new_str("PSUBSCRIBE failed").into());
            }
            Some(SubscribeFailure::Unsupported) => {
                return Err(Unsupported::new("pub/sub disabled").into());
            }
            None => {}
        }

        // Replace a previous subscription of this connection.
        if let Some((old_id, _)) = self.subscription.take() {
            state.subscribers.retain(|s| s.id != old_id);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;

        state.subscribers.push(Subscriber {
            id,
            pattern: pattern.to_string(),
            sender: tx,
        });
        self.subscription = Some((id, rx));
        Ok(())
    }

    async fn next_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notification>, ConnectionClosed> {
        self.check_open()?;

        let Some((_, rx)) = self.subscription.as_mut() else {
            return Err(ConnectionClosed::new_str("not subscribed"));
        };

        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Err(ConnectionClosed::new_str("subscription closed")),
        }
    }

    async fn punsubscribe(&mut self) -> Result<(), ConnectionClosed> {
        self.check_open()?;

        let mut state = self.store.state.lock().await;
        state.stats.punsubscribes += 1;

        if let Some((id, _)) = self.subscription.take() {
            state.subscribers.retain(|s| s.id != id);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionClosed> {
        self.check_open()?;
        self.closed = true;

        let mut state = self.store.state.lock().await;
        state.stats.closes += 1;

        if let Some((id, _)) = self.subscription.take() {
            state.subscribers.retain(|s| s.id != id);
        }
        Ok(())
    }
}

/// Redis style glob matching, supporting `*` and `?`.
pub fn glob_match(pattern: &str, s: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = s.chars().collect();

    // Classic backtracking over the last `*`.
    let (mut pi, mut si) = (0, 0);
    let mut star = None::<(usize, usize)>;

    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((sp, ss)) = star {
            pi = sp + 1;
            si = ss + 1;
            star = Some((sp, ss + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
