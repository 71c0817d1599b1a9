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

#![allow(clippy::uninlined_format_args)]

//! A read-through cache that mirrors one remote hash collection in local memory.
//!
//! Features:
//! - Reads served from memory, without a round trip
//! - Writes sent directly to the remote store
//! - Resync driven by keyspace change notifications, debounced
//! - Periodic fallback resync when notifications are unavailable
//! - Bounded wait for consistency on the read path
//! - Exactly-once teardown of the background worker and the subscription
//!
//! # Sync State Machine
//!
//! ```text
//!            set()/del()/notification
//!      .--------------------------------------.
//!      v                                      |
//!   Needed --schedule--> Pending --debounce--> InProgress --resync--> Complete
//!      ^                                          |
//!      `------------------ failed ----------------'
//! ```
//!
//! Readers wait until the state is `Complete`, for at most a fixed timeout.
//!
//! # Initialization Process
//!
//! When a [`CacheMap`] is created, it:
//! 1. Enables keyspace notifications on the remote store
//! 2. Pattern-subscribes to `__keyspace@*__:<key>`
//! 3. Performs one full resync of the mirror
//! 4. Spawns a background worker that keeps the mirror in sync
//!
//! If a step fails, the subscription is released and an error is returned.
//!
//! ```text
//! | cache_map +---> spawn() -------.
//! |           |                    v                       keyspace notifications
//! |           |   cancel    Sync-Worker (task) <-------------------------------.
//! |           +-----------o    |     |                                         |
//! |           |                |     | resync: HKEYS + HGET per field          |
//! |           | state (watch)  |     |                                         |
//! |           +-+ Needed.. <---'     |                       Remote Data Store |
//! |           |                      v                       <key>: hash       |
//! |           | mirror (RwLock)                               field1 = ..    --'
//! |           +-+ field1 = .. <------'                        field2 = ..
//! |             | field2 = ..                                   ^
//! |                                                             |
//! | set()/del() --------------------- HSET/HDEL ----------------'
//! ```

mod cache_map;
mod config;
mod notification;
mod sync_controller;
mod sync_worker;
mod type_config;
mod value;
mod value_store;

pub use cache_map::CacheMap;
pub use config::CacheMapConfig;
pub use config::DEFAULT_DEBOUNCE;
pub use config::DEFAULT_FALLBACK_INTERVAL;
pub use config::DEFAULT_MAX_BACKOFF;
pub use config::DEFAULT_NOTIFY_FLAGS;
pub use config::DEFAULT_POLL_TIMEOUT;
pub use config::DEFAULT_WAIT_TIMEOUT;
pub use notification::keyspace_pattern;
pub use notification::EventKind;
pub use notification::Notification;
pub use notification::KEYSPACE_CHANNEL_PREFIX;
pub use sync_controller::SyncState;
pub use type_config::ChangeFeed;
pub use type_config::RemoteCollection;
pub use type_config::TypeConfig;
pub use value::Entry;
pub use value::Value;
pub use value::FLOAT_SENTINEL;
pub use value::INT_SENTINEL;
pub use value_store::Mirror;

pub mod errors;

pub mod testing {
    pub mod store;
    pub mod types;
    pub mod util;
}
