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

/// The change feed does not support pattern subscriptions,
/// e.g., the server has pub/sub disabled or the client is a read-only replica proxy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
    reason: String,
    when: Vec<String>,
}

impl Unsupported {
    pub fn new(reason: impl ToString) -> Self {
        Unsupported {
            reason: reason.to_string(),
            when: vec![],
        }
    }

    pub fn context(mut self, context: impl ToString) -> Self {
        self.when.push(context.to_string());
        self
    }
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Unsupported: {}", self.reason)?;

        if !self.when.is_empty() {
            write!(f, "; when: ({})", self.when.join("; "))?;
        }

        Ok(())
    }
}
