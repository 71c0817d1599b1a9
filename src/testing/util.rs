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

//! Testing utilities for cache state assertions.

use std::time::Duration;

use tokio::time::sleep;

use crate::testing::types::TestConfig;
use crate::CacheMap;

/// Check that the mirror holds exactly `expected` fields and values.
///
/// Returns `Ok(())` on match, `Err(msg)` describing the first mismatch otherwise.
pub async fn check_cache_state(
    cache: &CacheMap<TestConfig>,
    expected: &[(&str, &str)],
) -> Result<(), String> {
    cache
        .access(|mirror| {
            if mirror.data.len() != expected.len() {
                return Err(format!(
                    "Cache size mismatch: expected {}, got {}: {:?}",
                    expected.len(),
                    mirror.data.len(),
                    mirror.data.keys().collect::<Vec<_>>()
                ));
            }

            for (field, want) in expected {
                let got = mirror.data.get(*field).map(|v| v.as_str());
                if got != Some(*want) {
                    return Err(format!(
                        "Cache value mismatch for field '{}': expected {:?}, got {:?}",
                        field, want, got
                    ));
                }
            }

            Ok(())
        })
        .await
}

/// Retry [`check_cache_state`] with configurable attempts and delay.
///
/// Useful for waiting for changes made behind the cache's back, which arrive through notifications.
pub async fn retry_check_cache_state(
    cache: &CacheMap<TestConfig>,
    expected: &[(&str, &str)],
    max_attempts: u32,
    delay: Duration,
) -> Result<(), String> {
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match check_cache_state(cache, expected).await {
            Ok(()) => return Ok(()),
            Err(error_msg) => {
                last_error = error_msg;
                if attempt < max_attempts {
                    sleep(delay).await;
                }
            }
        }
    }

    Err(format!(
        "Cache state check failed after {} attempts. Last error: {}",
        max_attempts, last_error
    ))
}

/// Alias for [`retry_check_cache_state`] with default parameters (40 attempts, 50ms delay).
pub async fn wait_for_cache_state(
    cache: &CacheMap<TestConfig>,
    expected: &[(&str, &str)],
) -> Result<(), String> {
    retry_check_cache_state(cache, expected, 40, Duration::from_millis(50)).await
}
