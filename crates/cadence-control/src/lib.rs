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

//! # Cadence Control
//!
//! The frame coordination scheduler. Producers post change messages and
//! lifecycle requests through a [`SchedulerHandle`]; a single
//! [`Coordinator`] turns the dirty state of every registered view and
//! universe into ordered work lists each tick, dispatches them within a
//! concurrency budget, and paces ticks to each view's minimum frame cycle.

#![warn(missing_docs)]

pub mod builder;
pub mod config;
mod context;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod lifecycle;
pub mod monitor;
pub mod pacer;
pub mod registry;
pub mod router;
pub mod service;
pub mod timing;
pub mod worker_thread;

pub use builder::{DispatchRecord, ListEntry, ListSummary, WorkListBuilder, WorkLists};
pub use config::{DriveMode, SchedulerConfig};
pub use coordinator::{Coordinator, TickReport};
pub use error::{ConfigError, SchedulerError};
pub use factory::{RenderTarget, ViewSpec, WorkerFactory};
pub use lifecycle::{LifecycleEffects, LifecycleManager, LifecycleRequest, RendererCleanup};
pub use monitor::{CoordinatorState, Monitor};
pub use pacer::FramePacer;
pub use registry::{Registry, WorkUnit};
pub use router::{MessageRouter, RouteOutcome, ViewQueues};
pub use service::{Scheduler, SchedulerHandle};
pub use timing::{FrameTiming, FrameTimingStore};
pub use worker_thread::WorkerThread;

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::SchedulerConfig;
    use crate::context::SchedulerContext;
    use crate::factory::WorkerFactory;
    use cadence_core::{
        PhysicalEnvId, RendererId, StructureKind, Tick, UnitArgs, UniverseId, ViewId, Worker,
    };
    use std::sync::Arc;

    pub(crate) struct NullWorker;

    impl Worker for NullWorker {
        fn do_work(&self, _tick: Tick, _args: &UnitArgs) {}
    }

    pub(crate) struct NullFactory;

    impl WorkerFactory for NullFactory {
        fn structure(&self, _universe: UniverseId, _kind: StructureKind) -> Arc<dyn Worker> {
            Arc::new(NullWorker)
        }

        fn behavior_scheduler(&self, _universe: UniverseId) -> Arc<dyn Worker> {
            Arc::new(NullWorker)
        }

        fn sound_scheduler(&self, _view: ViewId) -> Arc<dyn Worker> {
            Arc::new(NullWorker)
        }

        fn renderer(&self, _renderer: RendererId) -> Arc<dyn Worker> {
            Arc::new(NullWorker)
        }

        fn input_poller(&self, _env: PhysicalEnvId) -> Arc<dyn Worker> {
            Arc::new(NullWorker)
        }
    }

    /// A manually driven context whose pacer never gets interrupted.
    pub(crate) fn context(budget: u32) -> SchedulerContext {
        let config = SchedulerConfig {
            concurrency_budget: budget,
            ..SchedulerConfig::default()
        }
        .manual();
        SchedulerContext::new(config, crossbeam_channel::never())
    }
}
