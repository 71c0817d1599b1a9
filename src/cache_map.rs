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

use std::fmt;
use std::sync::atomic;
use std::sync::Arc;

use futures::FutureExt;
use log::debug;
use log::error;
use log::info;
use tokio::sync::oneshot;

use crate::config::CacheMapConfig;
use crate::errors::CacheMapError;
use crate::errors::ConnectionClosed;
use crate::errors::SubscribeError;
use crate::notification::keyspace_pattern;
use crate::sync_controller::SyncController;
use crate::sync_controller::SyncState;
use crate::sync_worker::release_feed;
use crate::sync_worker::SyncWorker;
use crate::value::Entry;
use crate::value::Value;
use crate::value_store::Mirror;
use crate::value_store::ValueStore;
use crate::ChangeFeed;
use crate::RemoteCollection;
use crate::TypeConfig;

/// A read-through cache of one remote hash collection.
///
/// Reads are served from an in-memory mirror of the hash.
/// Writes go straight to the remote store and mark the mirror stale;
/// a background worker then rebuilds the mirror, driven by keyspace notifications.
///
/// ## Consistency
///
/// Best effort, eventually consistent:
/// - After [`set`](Self::set) or [`del`](Self::del) returns, the next read on this instance
///   waits for a resync and observes the write.
/// - A change made by another client becomes visible after the notification arrives,
///   plus the debounce delay and one resync.
/// - A reader never waits longer than [`CacheMapConfig::wait_timeout`]; past that it reads
///   whatever the mirror holds.
///   Giving up does not mark the mirror consistent: while a resync is wedged,
///   every read pays the full `wait_timeout` again.
///
/// ## Concurrency Control
///
/// Two independent locks:
///
/// 1. **Sync state** (`watch` channel): written by writers and by the worker,
///    observed by readers waiting for consistency.
/// 2. **Mirror** (`RwLock`): replaced wholesale by the worker under the exclusive lock,
///    read by callers under the shared lock.
///
/// All methods take `&self`; share an instance with `Arc` to use it from several tasks.
///
/// ## Lifecycle
///
/// [`CacheMap::new`] enables notifications, subscribes, performs one synchronous resync
/// and spawns the worker. [`CacheMap::destroy`] stops the worker and releases the subscription.
/// Dropping the instance also stops the worker, which then releases the subscription itself.
pub struct CacheMap<C: TypeConfig> {
    /// The name of the remote hash.
    key: String,

    collection: Arc<C::Collection>,

    store: ValueStore,

    sync: SyncController,

    config: CacheMapConfig,

    /// The sender to cancel the background worker.
    ///
    /// When this sender is dropped, the corresponding receiver becomes ready,
    /// which signals the background task to terminate gracefully.
    worker_cancel_tx: oneshot::Sender<()>,

    /// Receives the feed back from the stopped worker.
    worker_done_rx: oneshot::Receiver<C::Feed>,

    /// A process-wide unique identifier for the cache. Used for debugging purposes.
    uniq: u64,

    /// The name for this cache instance, for debugging.
    name: String,
}

impl<C> fmt::Display for CacheMap<C>
where
    C: TypeConfig,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CacheMap({})({})[uniq={}]",
            self.name, self.key, self.uniq
        )
    }
}

impl<C> CacheMap<C>
where
    C: TypeConfig,
{
    /// Create a cache of the remote hash `key` with the default configuration.
    ///
    /// See [`CacheMap::with_config`].
    pub async fn new(
        collection: C::Collection,
        feed: C::Feed,
        key: impl ToString,
        name: impl ToString,
    ) -> Result<Self, CacheMapError> {
        Self::with_config(collection, feed, key, name, CacheMapConfig::default()).await
    }

    /// Create a cache of the remote hash `key`.
    ///
    /// It does not return until the mirror holds a full copy of the hash,
    /// thus it is safe to read once this method returns.
    ///
    /// # Parameters
    ///
    /// * `collection` - The client to read and write the remote hash.
    /// * `feed` - A dedicated connection for keyspace notifications. The cache owns it from now on.
    /// * `key` - The name of the remote hash.
    /// * `name` - Describes this cache in logs.
    ///
    /// If any startup step fails, the feed is released and the failed step is reported.
    pub async fn with_config(
        collection: C::Collection,
        mut feed: C::Feed,
        key: impl ToString,
        name: impl ToString,
        config: CacheMapConfig,
    ) -> Result<Self, CacheMapError> {
        static UNIQ: atomic::AtomicU64 = atomic::AtomicU64::new(0);
        let uniq = UNIQ.fetch_add(1, atomic::Ordering::SeqCst);

        let key = key.to_string();
        let name = name.to_string();
        let display = format!("CacheMap({})({})[uniq={}]", name, key, uniq);

        let collection = Arc::new(collection);
        let store = ValueStore::default();
        let sync = SyncController::new();
        let pattern = keyspace_pattern(&key);

        info!("{}: starting, subscribe to {}", display, pattern);

        let started = Self::start(
            &collection,
            &mut feed,
            &key,
            &pattern,
            &store,
            &sync,
            &config,
            &display,
        )
        .await
        .map_err(|e| e.context(&display));

        if let Err(e) = started {
            error!("{}: could not start: {}", display, e);
            release_feed(&mut feed, &display).await;
            return Err(e.into_error(key));
        }

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<C::Feed>();

        let cache = CacheMap {
            key,
            collection,
            store,
            sync,
            config,
            worker_cancel_tx: cancel_tx,
            worker_done_rx: done_rx,
            uniq,
            name,
        };

        cache.spawn_worker(feed, pattern, cancel_rx, done_tx);

        info!("{}: started", cache);
        Ok(cache)
    }

    /// The startup steps that must succeed before the worker is spawned.
    #[allow(clippy::too_many_arguments)]
    async fn start(
        collection: &C::Collection,
        feed: &mut C::Feed,
        key: &str,
        pattern: &str,
        store: &ValueStore,
        sync: &SyncController,
        config: &CacheMapConfig,
        name: &str,
    ) -> Result<(), StartupFailure> {
        feed.enable_notifications(&config.notify_flags)
            .await
            .map_err(StartupFailure::EnableNotifications)?;

        feed.psubscribe(pattern)
            .await
            .map_err(|e| StartupFailure::Subscribe(e.context(pattern)))?;

        // Walk the full episode, the same way the worker does.
        sync.schedule();
        sync.begin();

        let n = sync
            .resync(collection, key, store, name)
            .await
            .map_err(StartupFailure::InitialSync)?;

        sync.complete();
        debug!("{}: initial sync loaded {} fields", name, n);

        Ok(())
    }

    /// Write one field to the remote hash.
    ///
    /// Returns as soon as the remote write returns; the mirror is marked stale either way,
    /// because a failed write may still have been applied.
    pub async fn set(&self, field: &str, value: impl ToString) -> Result<(), ConnectionClosed> {
        let value = value.to_string();

        debug!("{}: set start: {}", self, field);
        let res = self.collection.set_field(&self.key, field, &value).await;
        self.sync.invalidate();
        debug!("{}: set end: {}, ok: {}", self, field, res.is_ok());

        res.map_err(|e| e.context(format!("{}: set {}", self, field)))
    }

    /// Read one field from the mirror, waiting for it to be consistent first.
    pub async fn get(&self, field: &str) -> Option<Value> {
        self.wait_until_consistent().await;
        self.store.read(field).await
    }

    /// Delete fields from the remote hash, returning how many existed.
    ///
    /// Deleting no field is a no-op that does not touch the remote store.
    pub async fn del(&self, fields: &[&str]) -> Result<u64, ConnectionClosed> {
        if fields.is_empty() {
            return Ok(0);
        }

        debug!("{}: del start: {:?}", self, fields);
        let res = self.collection.del_fields(&self.key, fields).await;
        self.sync.invalidate();
        debug!("{}: del end: {:?}, res: {:?}", self, fields, res);

        res.map_err(|e| e.context(format!("{}: del {:?}", self, fields)))
    }

    /// All field names in the mirror, in ascending order. Empty if the hash is empty.
    pub async fn keys(&self) -> Vec<String> {
        self.wait_until_consistent().await;
        self.store.keys().await
    }

    /// All fields and values in the mirror, in ascending field order.
    pub async fn entries(&self) -> Vec<Entry> {
        self.wait_until_consistent().await;
        self.store.entries().await
    }

    /// Access the mirror in read-only mode, after waiting for it to be consistent.
    ///
    /// Useful to read several fields from the same published version.
    pub async fn access<T>(&self, f: impl FnOnce(&Mirror) -> T) -> T {
        self.wait_until_consistent().await;
        self.store.access(f).await
    }

    /// Wait until the mirror reflects the last known remote state,
    /// for at most [`CacheMapConfig::wait_timeout`].
    ///
    /// Returns `false` if it gave up waiting; readers then go on with the current mirror.
    pub async fn wait_until_consistent(&self) -> bool {
        if self.sync.state() == SyncState::Complete {
            return true;
        }

        let ok = self
            .sync
            .wait_until_consistent(self.config.wait_timeout)
            .await;

        if ok {
            debug!("{}: wait: sync complete", self);
        } else {
            info!("{}: wait: gave up, reading a possibly stale mirror", self);
        }
        ok
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    /// The number of resyncs published so far, without waiting for consistency.
    pub async fn version(&self) -> u64 {
        self.store.access(|m| m.version).await
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &CacheMapConfig {
        &self.config
    }

    /// Stop the background worker and release the subscription.
    ///
    /// The worker exits its loop and hands the feed back; it is then unsubscribed and closed.
    pub async fn destroy(self) {
        let display = self.to_string();
        info!("{}: destroy", display);

        let CacheMap {
            worker_cancel_tx,
            worker_done_rx,
            ..
        } = self;

        // The worker may be gone already; dropping the sender works as well.
        let _ = worker_cancel_tx.send(());

        match worker_done_rx.await {
            Ok(mut feed) => {
                release_feed(&mut feed, &display).await;
            }
            Err(_) => {
                error!("{}: worker exited without returning the feed", display);
            }
        }
    }

    fn spawn_worker(
        &self,
        feed: C::Feed,
        pattern: String,
        cancel_rx: oneshot::Receiver<()>,
        done_tx: oneshot::Sender<C::Feed>,
    ) {
        let worker_name = format!("{}-worker", self);

        let worker = SyncWorker::<C> {
            key: self.key.clone(),
            pattern,
            collection: self.collection.clone(),
            feed,
            store: self.store.clone(),
            sync: self.sync.clone(),
            config: self.config.clone(),
            name: worker_name.clone(),
        };

        let fu = worker.main(cancel_rx.map(|_| ()), done_tx);

        C::spawn(fu, worker_name);
    }
}

/// A failed startup step, before the key is attached.
enum StartupFailure {
    EnableNotifications(ConnectionClosed),
    Subscribe(SubscribeError),
    InitialSync(ConnectionClosed),
}

impl StartupFailure {
    fn context(self, context: impl fmt::Display) -> Self {
        match self {
            Self::EnableNotifications(e) => Self::EnableNotifications(e.context(context)),
            Self::Subscribe(e) => Self::Subscribe(e.context(context)),
            Self::InitialSync(e) => Self::InitialSync(e.context(context)),
        }
    }

    fn into_error(self, key: String) -> CacheMapError {
        match self {
            Self::EnableNotifications(source) => CacheMapError::EnableNotifications { key, source },
            Self::Subscribe(source) => CacheMapError::Subscribe { key, source },
            Self::InitialSync(source) => CacheMapError::InitialSync { key, source },
        }
    }
}

impl fmt::Display for StartupFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EnableNotifications(e) => write!(f, "enable notifications: {}", e),
            Self::Subscribe(e) => write!(f, "subscribe: {}", e),
            Self::InitialSync(e) => write!(f, "initial sync: {}", e),
        }
    }
}
