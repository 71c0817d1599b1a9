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

use std::time::Duration;

/// Delay used to coalesce a burst of change notifications into one resync.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// How long one "check subscription" step waits for a notification.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// How long a reader waits for the mirror to become consistent.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Period of the fallback resync while the change feed is unavailable.
pub const DEFAULT_FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound of the retry delays after consecutive failures.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// `notify-keyspace-events` flags: keyspace and keyevent channels, all events, new-key events.
pub const DEFAULT_NOTIFY_FLAGS: &str = "KEAn";

/// Tuning of a [`CacheMap`](crate::CacheMap).
///
/// The three timeouts are independent:
/// a read never waits longer than `wait_timeout`, whatever the worker is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMapConfig {
    pub debounce: Duration,
    pub poll_timeout: Duration,
    pub wait_timeout: Duration,
    pub fallback_interval: Duration,
    pub max_backoff: Duration,
    pub notify_flags: String,
}

impl Default for CacheMapConfig {
    fn default() -> Self {
        CacheMapConfig {
            debounce: DEFAULT_DEBOUNCE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            fallback_interval: DEFAULT_FALLBACK_INTERVAL,
            max_backoff: DEFAULT_MAX_BACKOFF,
            notify_flags: DEFAULT_NOTIFY_FLAGS.to_string(),
        }
    }
}

impl CacheMapConfig {
    pub fn with_debounce(mut self, d: Duration) -> Self {
        self.debounce = d;
        self
    }

    pub fn with_poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn with_wait_timeout(mut self, d: Duration) -> Self {
        self.wait_timeout = d;
        self
    }

    pub fn with_fallback_interval(mut self, d: Duration) -> Self {
        self.fallback_interval = d;
        self
    }

    pub fn with_max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    pub fn with_notify_flags(mut self, flags: impl ToString) -> Self {
        self.notify_flags = flags.to_string();
        self
    }

    /// Grow a retry delay by 3/2, capped at `max_backoff`.
    pub(crate) fn backoff(&self, delay: Duration) -> Duration {
        std::cmp::min(delay * 3 / 2, self.max_backoff)
    }
}
