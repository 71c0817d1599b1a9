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

use crate::errors::ConnectionClosed;
use crate::errors::SubscribeError;

/// A [`CacheMap`](crate::CacheMap) could not be constructed.
///
/// Each variant names the startup step that failed.
/// The change feed has already been released when this error is returned.
#[derive(thiserror::Error, Debug)]
pub enum CacheMapError {
    #[error("CacheMap({key}): failed to enable keyspace notifications: {source}")]
    EnableNotifications {
        key: String,
        source: ConnectionClosed,
    },

    #[error("CacheMap({key}): failed to subscribe to keyspace notifications: {source}")]
    Subscribe { key: String, source: SubscribeError },

    #[error("CacheMap({key}): initial sync failed: {source}")]
    InitialSync {
        key: String,
        source: ConnectionClosed,
    },
}

impl CacheMapError {
    /// The collection key of the cache that failed to start.
    pub fn key(&self) -> &str {
        match self {
            Self::EnableNotifications { key, .. } => key,
            Self::Subscribe { key, .. } => key,
            Self::InitialSync { key, .. } => key,
        }
    }
}
