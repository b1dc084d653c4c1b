// Copyright 2025 eraflo
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

//! Errors surfaced by the scheduler.
//!
//! Only environmental failures are errors. Lifecycle misuse is a logged
//! no-op and invariant violations panic.

use thiserror::Error;

/// A configuration value could not be accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting held a value that does not parse.
    #[error("invalid value '{value}' for {key}")]
    Invalid {
        /// The offending setting.
        key: &'static str,
        /// The raw value.
        value: String,
    },

    /// The concurrency budget must allow at least one dispatch.
    #[error("concurrency budget must be at least 1")]
    ZeroConcurrencyBudget,

    /// A configuration document failed to parse.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Failures of the scheduler service.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The operating system refused to start a thread.
    #[error("failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        /// Name of the thread that failed to start.
        name: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}
