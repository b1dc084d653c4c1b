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

//! Recording workers shared by the integration tests.

#![allow(dead_code)]

use cadence_control::{Coordinator, Scheduler, SchedulerConfig, ViewSpec, WorkerFactory};
use cadence_core::{
    PhysicalEnvId, RendererId, RendererRequestKind, StructureKind, TargetId, Tick, UnitArgs,
    UnitOp, UniverseId, ViewId, Worker,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start(UnitOp),
    End(UnitOp),
}

/// Everything the recording workers did, in order.
#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<Event>>,
    requests: Mutex<Vec<(RendererId, RendererRequestKind)>>,
    running: AtomicU32,
    peak: AtomicU32,
}

impl Journal {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Operations in the order they started.
    pub fn started(&self) -> Vec<UnitOp> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Start(op) => Some(*op),
                Event::End(_) => None,
            })
            .collect()
    }

    /// Renderer requests serviced by deferred units, in order.
    pub fn requests(&self) -> Vec<(RendererId, RendererRequestKind)> {
        self.requests.lock().clone()
    }

    /// Highest number of workers seen running at once.
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn start(&self, op: UnitOp) {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.events.lock().push(Event::Start(op));
    }

    fn end(&self, op: UnitOp) {
        self.events.lock().push(Event::End(op));
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Logs each dispatch and drains the inbox it owns.
pub struct Recorder {
    journal: Arc<Journal>,
    delay: Duration,
}

impl Worker for Recorder {
    fn do_work(&self, tick: Tick, args: &UnitArgs) {
        self.journal.start(args.op);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match args.op {
            UnitOp::Structure { .. } | UnitOp::SoundScheduler { .. } | UnitOp::Swap { .. } => {
                if let Some(queue) = args.messages() {
                    drop(queue.consume(tick));
                }
            }
            UnitOp::Deferred { renderer } => {
                if let Some(queue) = args.requests() {
                    for request in queue.drain(tick) {
                        self.journal.requests.lock().push((renderer, request.kind));
                        queue.recycle(request);
                    }
                }
            }
            _ => {}
        }
        self.journal.end(args.op);
    }
}

/// Hands out [`Recorder`]s writing to one journal.
pub struct RecordingFactory {
    pub journal: Arc<Journal>,
    pub delay: Duration,
}

impl RecordingFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            journal: Arc::new(Journal::default()),
            delay,
        }
    }

    fn worker(&self) -> Arc<dyn Worker> {
        Arc::new(Recorder {
            journal: Arc::clone(&self.journal),
            delay: self.delay,
        })
    }
}

impl WorkerFactory for RecordingFactory {
    fn structure(&self, _universe: UniverseId, _kind: StructureKind) -> Arc<dyn Worker> {
        self.worker()
    }

    fn behavior_scheduler(&self, _universe: UniverseId) -> Arc<dyn Worker> {
        self.worker()
    }

    fn sound_scheduler(&self, _view: ViewId) -> Arc<dyn Worker> {
        self.worker()
    }

    fn renderer(&self, _renderer: RendererId) -> Arc<dyn Worker> {
        self.worker()
    }

    fn input_poller(&self, _env: PhysicalEnvId) -> Arc<dyn Worker> {
        self.worker()
    }
}

pub fn config(budget: u32) -> SchedulerConfig {
    SchedulerConfig {
        concurrency_budget: budget,
        ..SchedulerConfig::default()
    }
}

/// A manually driven scheduler with recording workers.
pub fn manual(budget: u32, delay: Duration) -> (Scheduler, Coordinator, Arc<Journal>) {
    let factory = RecordingFactory::new(delay);
    let journal = Arc::clone(&factory.journal);
    let (scheduler, coordinator) =
        Scheduler::manual(config(budget), Arc::new(factory)).expect("valid configuration");
    (scheduler, coordinator, journal)
}

/// A view with one on-screen target.
pub fn view(id: u32, universe: u32, renderer: u32) -> ViewSpec {
    ViewSpec::new(ViewId(id), UniverseId(universe)).with_target(TargetId(0), RendererId(renderer))
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
