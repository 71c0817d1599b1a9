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

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::debug;
use log::error;
use log::info;
use log::warn;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::CacheMapConfig;
use crate::errors::ConnectionClosed;
use crate::notification::Notification;
use crate::sync_controller::SyncController;
use crate::value_store::ValueStore;
use crate::ChangeFeed;
use crate::TypeConfig;

/// What woke the worker loop up.
enum Wakeup {
    Canceled,
    DebounceFired,
    StateChanged,
    Feed(Result<Option<Notification>, ConnectionClosed>),
    FallbackTick,
}

/// The background task of a [`CacheMap`](crate::CacheMap).
///
/// It listens to keyspace notifications, debounces them
/// and rebuilds the mirror when the sync state asks for it.
pub(crate) struct SyncWorker<C: TypeConfig> {
    pub(crate) key: String,

    /// The pattern subscribed to, kept for re-subscribing after a feed error.
    pub(crate) pattern: String,

    pub(crate) collection: Arc<C::Collection>,

    pub(crate) feed: C::Feed,

    pub(crate) store: ValueStore,

    pub(crate) sync: SyncController,

    pub(crate) config: CacheMapConfig,

    /// Contains descriptive information of this worker.
    pub(crate) name: String,
}

impl<C> SyncWorker<C>
where
    C: TypeConfig,
{
    /// Run until `cancel` is ready, then hand the feed back through `done`.
    ///
    /// Each iteration:
    /// - turns a `Needed` state into `Pending` and arms the debounce deadline if it is not armed;
    /// - waits for whichever comes first: cancellation, the debounce deadline,
    ///   a state change made by a writer, or one bounded poll of the change feed.
    ///
    /// If the feed fails, the worker enters degraded mode:
    /// it stops polling, and every fallback interval invalidates the mirror
    /// and tries to re-subscribe.
    ///
    /// If nobody waits on `done` anymore, the worker releases the feed itself,
    /// so the subscription is closed exactly once either way.
    pub(crate) async fn main(
        mut self,
        cancel: impl Future<Output = ()> + Send + 'static,
        done: oneshot::Sender<C::Feed>,
    ) {
        let mut c = std::pin::pin!(cancel);
        let mut state_rx = self.sync.subscribe();

        let mut debounce_at = None::<Instant>;

        // Set while the feed is unusable: when to run the next fallback resync.
        let mut fallback_at = None::<Instant>;
        let mut fallback_delay = self.config.fallback_interval;

        let mut resync_failures = 0u32;

        loop {
            // An armed deadline is kept: later changes join the scheduled resync,
            // so staleness stays bounded by one debounce delay under a steady stream of changes.
            if self.sync.schedule() && debounce_at.is_none() {
                let delay = self.debounce_delay(resync_failures);
                debug!("{}: resync scheduled in {:?}", self.name, delay);
                debounce_at = Some(Instant::now() + delay);
            }

            let poll_timeout = self.config.poll_timeout;

            let wakeup = futures::select! {
                _ = c.as_mut().fuse() => Wakeup::Canceled,

                _ = Self::sleep_until(debounce_at).fuse() => Wakeup::DebounceFired,

                res = state_rx.changed().fuse() => {
                    if res.is_err() {
                        error!("{}: sync state sender dropped", self.name);
                        Wakeup::Canceled
                    } else {
                        Wakeup::StateChanged
                    }
                }

                w = Self::check_subscription(&mut self.feed, fallback_at, poll_timeout).fuse() => w,
            };

            match wakeup {
                Wakeup::Canceled => {
                    info!("{}: worker loop canceled", self.name);
                    break;
                }
                Wakeup::DebounceFired => {
                    debounce_at = None;

                    // Changes detected since the deadline was armed are covered by this resync.
                    self.sync.schedule();
                    if !self.sync.begin() {
                        continue;
                    }

                    let res = self
                        .sync
                        .resync(&*self.collection, &self.key, &self.store, &self.name)
                        .await;

                    match res {
                        Ok(_n) => {
                            resync_failures = 0;
                            if !self.sync.complete() {
                                debug!("{}: invalidated during resync", self.name);
                            }
                        }
                        Err(e) => {
                            resync_failures += 1;
                            warn!(
                                "{}: resync failed({} in a row): {}; retry on next cycle",
                                self.name, resync_failures, e
                            );
                            self.sync.fail();
                        }
                    }
                }
                Wakeup::StateChanged => {}
                Wakeup::Feed(Ok(Some(msg))) => self.handle_message(msg),
                Wakeup::Feed(Ok(None)) => {}
                Wakeup::Feed(Err(e)) => {
                    warn!(
                        "{}: subscription check error: {}; fall back to resync every {:?}",
                        self.name, e, fallback_delay
                    );
                    fallback_at = Some(Instant::now() + fallback_delay);
                }
                Wakeup::FallbackTick => {
                    // Changes may have been missed while the feed was down.
                    self.sync.invalidate();

                    match self.feed.psubscribe(&self.pattern).await {
                        Ok(()) => {
                            info!("{}: subscription re-established", self.name);
                            fallback_at = None;
                            fallback_delay = self.config.fallback_interval;
                        }
                        Err(e) => {
                            fallback_delay = self.config.backoff(fallback_delay);
                            warn!(
                                "{}: re-subscribe failed: {}; next try in {:?}",
                                self.name, e, fallback_delay
                            );
                            fallback_at = Some(Instant::now() + fallback_delay);
                        }
                    }
                }
            }
        }

        info!("{}: worker stopped", self.name);

        if let Err(mut feed) = done.send(self.feed) {
            debug!("{}: owner is gone, release the feed", self.name);
            release_feed(&mut feed, &self.name).await;
        }
    }

    /// One non-blocking step of the notification listener.
    ///
    /// Polls the feed for at most `poll_timeout`;
    /// or, in degraded mode, waits for the fallback deadline.
    async fn check_subscription(
        feed: &mut C::Feed,
        fallback_at: Option<Instant>,
        poll_timeout: Duration,
    ) -> Wakeup {
        if let Some(at) = fallback_at {
            tokio::time::sleep_until(at).await;
            return Wakeup::FallbackTick;
        }

        Wakeup::Feed(feed.next_message(poll_timeout).await)
    }

    fn handle_message(&self, msg: Notification) {
        if msg.is_mutation() {
            debug!("{}: handle: {} {}", self.name, msg.channel, msg.payload);
            self.sync.invalidate();
        } else {
            debug!("{}: skip: {} {}", self.name, msg.channel, msg.payload);
        }
    }

    /// The debounce delay, backed off after consecutive resync failures.
    fn debounce_delay(&self, failures: u32) -> Duration {
        let mut delay = self.config.debounce;
        for _ in 0..failures.min(32) {
            delay = self.config.backoff(delay);
        }
        delay
    }

    async fn sleep_until(at: Option<Instant>) {
        match at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => futures::future::pending::<()>().await,
        }
    }
}

/// Unsubscribe and close a feed, logging instead of failing.
pub(crate) async fn release_feed<F>(feed: &mut F, name: &str)
where
    F: ChangeFeed + Send + ?Sized,
{
    if let Err(e) = feed.punsubscribe().await {
        warn!("{}: unsubscribe error: {}", name, e);
    }
    if let Err(e) = feed.close().await {
        warn!("{}: close feed error: {}", name, e);
    }
    debug!("{}: feed released", name);
}
