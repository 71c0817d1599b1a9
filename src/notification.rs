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

//! Keyspace notifications received from the change feed.
//!
//! A keyspace notification is published on the channel `__keyspace@<db>__:<key>`
//! and its payload is the name of the command, or event, that touched `<key>`.
//! See: <https://redis.io/docs/manual/keyspace-notifications/>

/// The channel prefix of keyspace notifications, matching every database.
pub const KEYSPACE_CHANNEL_PREFIX: &str = "__keyspace@*__:";

/// Build the pattern that subscribes to keyspace notifications of one collection key.
pub fn keyspace_pattern(key: &str) -> String {
    format!("{}{}", KEYSPACE_CHANNEL_PREFIX, key)
}

/// The event a keyspace notification reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    New,
    Set,
    Del,
    HSet,
    HDel,
    HIncrBy,
    HIncrByFloat,
    Expired,
    Evicted,
    RenameFrom,
    RenameTo,
    /// An event that does not change the fields of a hash, e.g. `expire` or `persist`.
    Other(String),
}

impl EventKind {
    pub fn parse(label: &str) -> Self {
        match label {
            "new" => EventKind::New,
            "set" => EventKind::Set,
            "del" => EventKind::Del,
            "hset" => EventKind::HSet,
            "hdel" => EventKind::HDel,
            "hincrby" => EventKind::HIncrBy,
            "hincrbyfloat" => EventKind::HIncrByFloat,
            "expired" => EventKind::Expired,
            "evicted" => EventKind::Evicted,
            "rename_from" => EventKind::RenameFrom,
            "rename_to" => EventKind::RenameTo,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// Whether this event may have changed the fields of the hash,
    /// i.e., the mirror must be rebuilt.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }
}

/// A message received from the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

impl Notification {
    pub fn new(channel: impl ToString, payload: impl ToString) -> Self {
        Notification {
            channel: channel.to_string(),
            payload: payload.to_string(),
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.payload)
    }

    pub fn is_mutation(&self) -> bool {
        self.kind().is_mutation()
    }
}
