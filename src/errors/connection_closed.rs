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
use std::io;

/// Why the connection to the remote store was lost.
#[derive(Debug)]
pub enum Reason {
    /// A transport level failure.
    Io(io::Error),
    /// Any other failure, described as text: a protocol error, a closed subscription, etc.
    Message(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reason::Io(e) => write!(f, "{}", e),
            Reason::Message(s) => write!(f, "{}", s),
        }
    }
}

/// The connection to the remote store, or to its change feed, failed.
///
/// Every collaborator call returns this error for connectivity problems.
/// It carries the reason and a chain of contexts describing when the error occurred.
///
/// ```rust
/// # use keyspace_cache::errors::ConnectionClosed;
/// let err = ConnectionClosed::new_str("connection reset")
///     .context("HKEYS users")
///     .context("resync");
/// assert_eq!(
///     err.to_string(),
///     "remote store connection closed: connection reset; when: (HKEYS users; resync)"
/// );
/// ```
#[derive(thiserror::Error, Debug)]
pub struct ConnectionClosed {
    reason: Reason,

    /// Each context is appended by [`ConnectionClosed::context`].
    when: Vec<String>,
}

impl ConnectionClosed {
    pub fn new_io_error(reason: impl Into<io::Error>) -> Self {
        ConnectionClosed {
            reason: Reason::Io(reason.into()),
            when: vec![],
        }
    }

    pub fn new_str(reason: impl ToString) -> Self {
        ConnectionClosed {
            reason: Reason::Message(reason.to_string()),
            when: vec![],
        }
    }

    /// Append a context describing when the error occurred.
    pub fn context(mut self, context: impl ToString) -> Self {
        self.when.push(context.to_string());
        self
    }

    pub fn reason(&self) -> &Reason {
        &self.reason
    }
}

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "remote store connection closed: {}", self.reason)?;

        if self.when.is_empty() {
            return Ok(());
        }

        write!(f, "; when: (")?;

        for (i, when) in self.when.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", when)?;
        }

        write!(f, ")")
    }
}

impl From<io::Error> for ConnectionClosed {
    fn from(err: io::Error) -> Self {
        ConnectionClosed::new_io_error(err)
    }
}
