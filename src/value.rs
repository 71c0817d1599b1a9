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

/// Returned by [`Value::as_int`] when the text is not a decimal integer.
pub const INT_SENTINEL: i64 = i64::MIN;

/// Returned by [`Value::as_float`] when the text is not a float.
pub const FLOAT_SENTINEL: f64 = i64::MIN as f64;

/// A scalar field value as stored in the remote hash.
///
/// The remote store keeps every field as text.
/// The typed accessors never fail: unparseable text yields a documented sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Value {
    raw: String,
}

impl Value {
    pub fn new(raw: impl ToString) -> Self {
        Value {
            raw: raw.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_string(self) -> String {
        self.raw
    }

    /// Whether the text is empty or consists only of whitespace.
    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }

    /// Parse as a decimal integer, or [`INT_SENTINEL`].
    pub fn as_int(&self) -> i64 {
        self.raw.parse::<i64>().unwrap_or(INT_SENTINEL)
    }

    /// Parse as a float, or [`FLOAT_SENTINEL`].
    ///
    /// A finite number too large for `f64`, e.g. `1e400`, is out of range and yields the sentinel.
    /// The spellings `inf`, `infinity` and `nan` are accepted.
    pub fn as_float(&self) -> f64 {
        let Ok(f) = self.raw.parse::<f64>() else {
            return FLOAT_SENTINEL;
        };

        if f.is_infinite() && !self.raw.to_ascii_lowercase().contains("inf") {
            return FLOAT_SENTINEL;
        }
        f
    }

    /// Parse as a boolean; anything unrecognized is `false`.
    ///
    /// Accepted spellings: `1 t T TRUE true True` and `0 f F FALSE false False`.
    pub fn as_bool(&self) -> bool {
        matches!(self.raw.as_str(), "1" | "t" | "T" | "TRUE" | "true" | "True")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<String> for Value {
    fn from(raw: String) -> Self {
        Value { raw }
    }
}

impl From<&str> for Value {
    fn from(raw: &str) -> Self {
        Value::new(raw)
    }
}

/// A field of the cached collection together with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl ToString, value: impl Into<Value>) -> Self {
        Entry {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn unpack(self) -> (String, Value) {
        (self.key, self.value)
    }
}
