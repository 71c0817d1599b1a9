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
use std::future::Future;
use std::time::Duration;

use crate::errors::ConnectionClosed;
use crate::errors::SubscribeError;
use crate::notification::Notification;

pub trait TypeConfig
where
    Self: fmt::Debug,
    Self: Default,
    Self: Send + Sync + 'static,
{
    /// The client that reads and writes the remote hash collection.
    type Collection: RemoteCollection + Send + Sync + 'static;

    /// The connection that delivers keyspace notifications.
    type Feed: ChangeFeed + Send + 'static;

    /// Spawn a future that will run in the background.
    ///
    /// `name` is used for debugging purposes, it can be any string that identifies the future.
    fn spawn<F>(future: F, name: impl ToString)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

/// The four hash commands the cache needs: `HKEYS`, `HGET`, `HSET` and `HDEL`.
///
/// Pure request/response: an implementation keeps no state on behalf of the cache.
#[async_trait::async_trait]
pub trait RemoteCollection {
    /// List the field names of the hash `key`. A missing hash has no fields.
    async fn fields(&self, key: &str) -> Result<Vec<String>, ConnectionClosed>;

    /// Read one field. `None` if the field does not exist.
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, ConnectionClosed>;

    async fn set_field(&self, key: &str, field: &str, value: &str)
        -> Result<(), ConnectionClosed>;

    /// Delete fields, returning how many of them existed.
    async fn del_fields(&self, key: &str, fields: &[&str]) -> Result<u64, ConnectionClosed>;
}

/// A dedicated pub/sub connection to the remote store.
#[async_trait::async_trait]
pub trait ChangeFeed {
    /// Configure the server to publish keyspace notifications,
    /// e.g. `CONFIG SET notify-keyspace-events KEAn`.
    ///
    /// It is a process-wide server setting and must be idempotent.
    async fn enable_notifications(&mut self, flags: &str) -> Result<(), ConnectionClosed>;

    /// Pattern-subscribe to `pattern`.
    ///
    /// It may be called again after [`ChangeFeed::next_message`] returned an error,
    /// to re-establish the subscription.
    async fn psubscribe(&mut self, pattern: &str) -> Result<(), SubscribeError>;

    /// Wait at most `timeout` for the next notification. `Ok(None)` means the timeout elapsed.
    ///
    /// The returned future must be cancel-safe: dropping it must not lose a message.
    async fn next_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notification>, ConnectionClosed>;

    async fn punsubscribe(&mut self) -> Result<(), ConnectionClosed>;

    async fn close(&mut self) -> Result<(), ConnectionClosed>;
}
