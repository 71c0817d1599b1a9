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

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use log::warn;
use tokio::sync::watch;

use crate::errors::ConnectionClosed;
use crate::value::Value;
use crate::value_store::ValueStore;
use crate::RemoteCollection;

/// Where the mirror stands relative to the remote hash.
///
/// Within one staleness episode the state only moves forward:
///
/// ```text
/// Needed --> Pending --> InProgress --> Complete
///   ^                                      |
///   `------------ change detected ---------'
/// ```
///
/// An invalidation may push any state back to `Needed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// A change is known or suspected; a resync must run.
    Needed,
    /// A resync is scheduled and waits for the debounce delay.
    Pending,
    /// A resync is reading the remote hash.
    InProgress,
    /// The mirror reflects the last known remote state.
    Complete,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Owns the sync state machine and performs resyncs.
///
/// The state lives in its own lock domain, a `watch` channel,
/// so that it can change while a resync holds, or waits for, the mirror lock.
/// Every transition is broadcast, which lets readers wait for `Complete` without spinning.
#[derive(Debug, Clone)]
pub(crate) struct SyncController {
    state: Arc<watch::Sender<SyncState>>,
}

impl Default for SyncController {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncController {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::Needed);
        SyncController {
            state: Arc::new(tx),
        }
    }

    pub(crate) fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Any state -> `Needed`: the mirror is assumed stale.
    pub(crate) fn invalidate(&self) {
        self.state.send_replace(SyncState::Needed);
    }

    /// `Needed -> Pending`. Returns `true` if the caller must (re-)arm the debounce timer.
    pub(crate) fn schedule(&self) -> bool {
        self.transit(SyncState::Needed, SyncState::Pending)
    }

    /// `Pending -> InProgress`. Returns `true` if the caller must run a resync now.
    pub(crate) fn begin(&self) -> bool {
        self.transit(SyncState::Pending, SyncState::InProgress)
    }

    /// `InProgress -> Complete`.
    ///
    /// If an invalidation arrived during the resync the state is `Needed` and stays so:
    /// the published mirror may already be stale and another cycle must run.
    pub(crate) fn complete(&self) -> bool {
        self.transit(SyncState::InProgress, SyncState::Complete)
    }

    /// `InProgress -> Needed`, after a failed resync.
    pub(crate) fn fail(&self) -> bool {
        self.transit(SyncState::InProgress, SyncState::Needed)
    }

    fn transit(&self, from: SyncState, to: SyncState) -> bool {
        self.state.send_if_modified(|st| {
            if *st == from {
                *st = to;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the state is `Complete`, for at most `timeout`.
    ///
    /// Returns `false` on timeout. The state is left untouched in that case:
    /// the caller goes on with whatever the mirror holds,
    /// while the worker keeps its pending cycle.
    pub(crate) async fn wait_until_consistent(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();

        let wait = async {
            loop {
                let st = *rx.borrow_and_update();
                if st == SyncState::Complete {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Unreachable: `self` holds the sender.
                    return;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => true,
            Err(_elapsed) => {
                warn!(
                    "sync wait timeout after {:?}, state: {}; reading the current mirror",
                    timeout,
                    self.state()
                );
                false
            }
        }
    }

    /// Rebuild the mirror from the remote hash `key` and publish it.
    ///
    /// A field that cannot be read is skipped, so one bad field does not starve the mirror.
    /// The new mirror is published only after every field is visited.
    /// Failing to list the fields publishes nothing.
    ///
    /// Returns the number of fields published.
    pub(crate) async fn resync<R>(
        &self,
        collection: &R,
        key: &str,
        store: &ValueStore,
        name: &str,
    ) -> Result<usize, ConnectionClosed>
    where
        R: RemoteCollection + Sync + ?Sized,
    {
        debug!("{}: resync start, state: {}", name, self.state());

        let fields = collection
            .fields(key)
            .await
            .map_err(|e| e.context(format!("{}: list fields", name)))?;

        let mut data = BTreeMap::new();

        for field in fields {
            match collection.get_field(key, &field).await {
                Ok(Some(raw)) => {
                    debug!("{}: resync field {}={}", name, field, raw);
                    data.insert(field, Value::from(raw));
                }
                Ok(None) => {
                    debug!("{}: field {} vanished during resync", name, field);
                }
                Err(e) => {
                    warn!("{}: resync skips field {}: {}", name, field, e);
                }
            }
        }

        let n = data.len();
        let version = store.replace(data).await;

        debug!(
            "{}: resync end, {} fields published as version {}",
            name, n, version
        );
        Ok(n)
    }
}
