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

//! The scheduler service and its producer handle.

use crate::config::{DriveMode, SchedulerConfig};
use crate::context::SchedulerContext;
use crate::coordinator::Coordinator;
use crate::error::SchedulerError;
use crate::factory::WorkerFactory;
use crate::lifecycle::LifecycleRequest;
use crate::monitor::CoordinatorState;
use crate::router::RouteOutcome;
use crate::timing::FrameTiming;
use cadence_core::{
    Message, PoolKind, PoolStats, RendererId, RendererRequest, RendererRequestKind, TargetMask,
    ViewId,
};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

const COORDINATOR_THREAD: &str = "cadence-coordinator";

struct Runner {
    factory: Arc<dyn WorkerFactory>,
    drive: DriveMode,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Owns a scheduler instance.
///
/// In threaded mode the coordinator thread is started by the first lifecycle
/// request, retires once nothing is registered, and is started again by the
/// next request. Dropping the scheduler shuts it down and joins the thread.
pub struct Scheduler {
    handle: SchedulerHandle,
    shutdown_tx: Option<Sender<()>>,
    coordinator: Option<Coordinator>,
}

impl Scheduler {
    /// Creates a scheduler. Nothing runs until a view is registered.
    ///
    /// In [`DriveMode::Manual`] the coordinator is kept for the caller to
    /// take with [`Scheduler::take_coordinator`].
    pub fn new(
        config: SchedulerConfig,
        factory: Arc<dyn WorkerFactory>,
    ) -> Result<Self, SchedulerError> {
        let (mut scheduler, coordinator) = Self::build(config, factory)?;
        if scheduler.handle.runner.drive == DriveMode::Manual {
            scheduler.coordinator = Some(coordinator);
        }
        Ok(scheduler)
    }

    /// Creates a manually driven scheduler and hands out its coordinator.
    pub fn manual(
        config: SchedulerConfig,
        factory: Arc<dyn WorkerFactory>,
    ) -> Result<(Self, Coordinator), SchedulerError> {
        Self::build(config.manual(), factory)
    }

    fn build(
        config: SchedulerConfig,
        factory: Arc<dyn WorkerFactory>,
    ) -> Result<(Self, Coordinator), SchedulerError> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let drive = config.drive;
        let ctx = Arc::new(SchedulerContext::new(config, shutdown_rx));
        let coordinator = Coordinator::new(Arc::clone(&ctx), Arc::clone(&factory));
        log::info!(
            "Scheduler: created ({drive:?}, concurrency budget {})",
            ctx.config.concurrency_budget
        );
        let scheduler = Self {
            handle: SchedulerHandle {
                ctx,
                runner: Arc::new(Runner {
                    factory,
                    drive,
                    thread: Mutex::new(None),
                }),
            },
            shutdown_tx: Some(shutdown_tx),
            coordinator: None,
        };
        Ok((scheduler, coordinator))
    }

    /// The coordinator of a manually driven scheduler, once.
    pub fn take_coordinator(&mut self) -> Option<Coordinator> {
        self.coordinator.take()
    }

    /// A cloneable handle for producer threads.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stops the coordinator and joins its thread. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shutdown_tx.is_none() {
            return;
        }
        log::info!("Scheduler: shutting down");
        self.handle.ctx.monitor.shutdown();
        // Disconnecting the channel interrupts a pacer sleep.
        self.shutdown_tx.take();

        let thread = self.handle.runner.thread.lock().take();
        if let Some(thread) = thread {
            if thread.thread().id() == thread::current().id() {
                log::warn!("Scheduler: shut down from its own coordinator thread");
            } else if thread.join().is_err() {
                log::error!("Scheduler: coordinator thread panicked");
            }
        }
        log::info!("Scheduler: stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("handle", &self.handle)
            .field("running", &self.shutdown_tx.is_some())
            .finish()
    }
}

/// Posts messages and requests to a scheduler from any thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    ctx: Arc<SchedulerContext>,
    runner: Arc<Runner>,
}

impl SchedulerHandle {
    /// A message taken from the scheduler's pool.
    pub fn message(&self, kind: u32, target_mask: TargetMask) -> Message {
        self.ctx.router.message(kind, target_mask)
    }

    /// A renderer request taken from the scheduler's pool.
    pub fn request(&self, kind: RendererRequestKind) -> RendererRequest {
        self.ctx.router.request(kind)
    }

    /// Stamps and routes a message, then signals work.
    pub fn post(&self, message: Message) -> RouteOutcome {
        let outcome = self.ctx.router.post(&self.ctx.clock, message);
        self.ctx.monitor.set_work();
        outcome
    }

    /// Routes messages that must be seen as one update: they share a tick.
    pub fn post_batch<I>(&self, messages: I) -> RouteOutcome
    where
        I: IntoIterator<Item = Message>,
    {
        let outcome = self.ctx.router.post_batch(&self.ctx.clock, messages);
        self.ctx.monitor.set_work();
        outcome
    }

    /// Queues a lifecycle request for the coordinator, starting the
    /// coordinator thread if none is running.
    ///
    /// After shutdown the request is dropped with a warning.
    pub fn post_request(&self, request: LifecycleRequest) -> Result<(), SchedulerError> {
        if self.ctx.monitor.is_shutdown() {
            log::warn!("Scheduler: {request:?} posted after shutdown, ignored");
            return Ok(());
        }
        if self.ctx.requests_tx.send(request).is_err() {
            log::warn!("Scheduler: request channel closed");
            return Ok(());
        }
        self.ctx.monitor.set_work();
        self.ensure_running()
    }

    /// Queues a request for a renderer's deferred unit.
    ///
    /// Returns `false` if the renderer is not in use.
    pub fn post_renderer_request(&self, renderer: RendererId, request: RendererRequest) -> bool {
        let queued = self.ctx.router.post_request(&self.ctx.clock, renderer, request);
        if queued {
            self.ctx.monitor.set_work_for_renderer();
        }
        queued
    }

    /// Recent frame times of a view.
    pub fn frame_timing(&self, view: ViewId) -> Option<FrameTiming> {
        self.ctx.timing.lock().snapshot(view)
    }

    /// Counters of one pool.
    pub fn pool_stats(&self, kind: PoolKind) -> PoolStats {
        self.ctx.pool.stats(kind)
    }

    /// What the coordinator is doing.
    pub fn coordinator_state(&self) -> CoordinatorState {
        self.ctx.monitor.state()
    }

    /// Whether a coordinator thread is alive.
    pub fn coordinator_alive(&self) -> bool {
        self.ctx.monitor.coordinator_alive()
    }

    /// The configuration in effect.
    pub fn config(&self) -> &SchedulerConfig {
        &self.ctx.config
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.runner.drive != DriveMode::Threaded || !self.ctx.monitor.claim_coordinator() {
            return Ok(());
        }

        let mut slot = self.runner.thread.lock();
        // A retired coordinator has left its loop; reap it first.
        if let Some(previous) = slot.take() {
            if previous.join().is_err() {
                log::error!("Scheduler: previous coordinator thread panicked");
            }
        }

        let coordinator = Coordinator::new(Arc::clone(&self.ctx), Arc::clone(&self.runner.factory));
        let spawned = thread::Builder::new()
            .name(COORDINATOR_THREAD.to_owned())
            .spawn(move || run_coordinator(coordinator));
        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.ctx.monitor.retire_if(|| true);
                Err(SchedulerError::ThreadSpawn {
                    name: COORDINATOR_THREAD.to_owned(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("drive", &self.runner.drive)
            .field("state", &self.ctx.monitor.state())
            .finish()
    }
}

fn run_coordinator(mut coordinator: Coordinator) {
    log::info!("Coordinator: started");
    while coordinator.wait_for_work() {
        let report = coordinator.run_once();
        if coordinator.try_retire() {
            log::info!("Coordinator: nothing registered, retiring");
            return;
        }
        coordinator.pace(report.elapsed);
    }
    log::info!("Coordinator: stopped");
}
