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

//! State shared between the coordinator and every producer handle.

use crate::config::SchedulerConfig;
use crate::lifecycle::LifecycleRequest;
use crate::monitor::Monitor;
use crate::router::MessageRouter;
use crate::timing::FrameTimingStore;
use cadence_core::{Clock, MirrorQueue, ObjectPool};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything a producer thread may touch without the coordinator.
///
/// Each member carries its own lock; none is taken while the monitor lock
/// is held.
pub(crate) struct SchedulerContext {
    pub(crate) config: SchedulerConfig,
    pub(crate) clock: Clock,
    pub(crate) pool: Arc<ObjectPool>,
    pub(crate) router: MessageRouter,
    pub(crate) monitor: Arc<Monitor>,
    pub(crate) mirrors: Arc<MirrorQueue>,
    pub(crate) timing: Mutex<FrameTimingStore>,
    pub(crate) requests_tx: Sender<LifecycleRequest>,
    pub(crate) requests_rx: Receiver<LifecycleRequest>,
    pub(crate) shutdown_rx: Receiver<()>,
}

impl SchedulerContext {
    pub(crate) fn new(config: SchedulerConfig, shutdown_rx: Receiver<()>) -> Self {
        let pool = Arc::new(ObjectPool::new(config.use_object_pool, config.pool_capacity));
        let (requests_tx, requests_rx) = crossbeam_channel::unbounded();
        Self {
            clock: Clock::new(),
            router: MessageRouter::new(Arc::clone(&pool)),
            monitor: Arc::new(Monitor::new(config.concurrency_budget)),
            mirrors: Arc::new(MirrorQueue::new()),
            timing: Mutex::new(FrameTimingStore::new()),
            pool,
            requests_tx,
            requests_rx,
            shutdown_rx,
            config,
        }
    }
}
