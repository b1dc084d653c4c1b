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

//! Scheduler configuration.
//!
//! Settings come from defaults, from the process environment
//! (`CADENCE_CONCURRENCY_BUDGET`, `CADENCE_FRAME_CYCLE_TIME_MIN_MS`,
//! `CADENCE_USE_OBJECT_POOL`) or from a RON document.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding [`SchedulerConfig::concurrency_budget`].
pub const ENV_CONCURRENCY_BUDGET: &str = "CADENCE_CONCURRENCY_BUDGET";
/// Environment variable overriding [`SchedulerConfig::frame_cycle_time_min`], in milliseconds.
pub const ENV_FRAME_CYCLE_TIME_MIN_MS: &str = "CADENCE_FRAME_CYCLE_TIME_MIN_MS";
/// Environment variable overriding [`SchedulerConfig::use_object_pool`].
pub const ENV_USE_OBJECT_POOL: &str = "CADENCE_USE_OBJECT_POOL";

/// Who drives the coordinator's ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriveMode {
    /// The coordinator runs on its own thread, spawned on the first
    /// registration and retired when the last view goes away.
    #[default]
    Threaded,
    /// The caller owns the coordinator and calls `run_once` itself.
    Manual,
}

/// Configuration for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of asynchronous dispatches in flight. `1` runs every
    /// worker inline on the coordinator thread.
    pub concurrency_budget: u32,
    /// Minimum frame cycle for views that do not set their own.
    #[serde(with = "millis")]
    pub frame_cycle_time_min: Duration,
    /// Recycle messages and renderer requests through the object pool.
    pub use_object_pool: bool,
    /// Objects retained per pool kind.
    pub pool_capacity: usize,
    /// Ticks between pool sweeps.
    pub sweep_interval: u64,
    /// Threaded or manually driven coordinator.
    pub drive: DriveMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_budget: default_concurrency_budget(),
            frame_cycle_time_min: Duration::ZERO,
            use_object_pool: true,
            pool_capacity: 256,
            sweep_interval: 60,
            drive: DriveMode::Threaded,
        }
    }
}

/// Host CPU count plus one.
pub fn default_concurrency_budget() -> u32 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    u32::try_from(cpus).unwrap_or(u32::MAX - 1) + 1
}

impl SchedulerConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CONCURRENCY_BUDGET) {
            config.concurrency_budget = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_CONCURRENCY_BUDGET,
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = lookup(ENV_FRAME_CYCLE_TIME_MIN_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_FRAME_CYCLE_TIME_MIN_MS,
                value: raw.clone(),
            })?;
            config.frame_cycle_time_min = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup(ENV_USE_OBJECT_POOL) {
            config.use_object_pool = parse_flag(&raw).ok_or_else(|| ConfigError::Invalid {
                key: ENV_USE_OBJECT_POOL,
                value: raw.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parses a RON document. Missing fields keep their defaults.
    pub fn from_ron(source: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig =
            ron::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_budget == 0 {
            return Err(ConfigError::ZeroConcurrencyBudget);
        }
        Ok(())
    }

    /// A manually driven copy of this configuration.
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.drive = DriveMode::Manual;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
