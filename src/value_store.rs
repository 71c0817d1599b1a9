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
use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::value::Entry;
use crate::value::Value;

/// The local copy of a remote hash collection.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    /// Number of resyncs published so far. Never decreases.
    pub version: u64,
    /// The fields of the remote hash, as of the last published resync.
    pub data: BTreeMap<String, Value>,
}

/// The mirror shared by the readers and the sync worker.
///
/// The mirror is only ever replaced wholesale under the write lock,
/// so a reader never observes a half-built mirror, nor an older one after a newer one.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValueStore {
    mirror: Arc<RwLock<Mirror>>,
}

impl ValueStore {
    /// Publish a freshly built mirror. Returns the new version.
    pub(crate) async fn replace(&self, data: BTreeMap<String, Value>) -> u64 {
        let mut mirror = self.mirror.write().await;

        mirror.version += 1;
        mirror.data = data;

        debug!(
            "ValueStore: published version {} with {} fields",
            mirror.version,
            mirror.data.len()
        );
        mirror.version
    }

    pub(crate) async fn read(&self, field: &str) -> Option<Value> {
        self.access(|m| m.data.get(field).cloned()).await
    }

    pub(crate) async fn keys(&self) -> Vec<String> {
        self.access(|m| m.data.keys().cloned().collect()).await
    }

    pub(crate) async fn entries(&self) -> Vec<Entry> {
        self.access(|m| {
            m.data
                .iter()
                .map(|(k, v)| Entry::new(k, v.clone()))
                .collect()
        })
        .await
    }

    /// Run `f` against the mirror under the shared lock.
    pub(crate) async fn access<T>(&self, f: impl FnOnce(&Mirror) -> T) -> T {
        let mirror = self.mirror.read().await;
        f(&mirror)
    }
}
