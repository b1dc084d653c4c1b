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

//! The coordinator: applies lifecycle requests, builds the work lists and
//! walks them once per tick.
//!
//! With a concurrency budget of one every unit runs inline on the
//! coordinator's thread, in list order. Otherwise units are handed to their
//! workers asynchronously and the coordinator only blocks at barriers and
//! when the budget is exhausted. Render entries are preferred; state entries
//! fill the budget while render is held at a barrier, and deferred renderer
//! requests run once every render entry has completed.

use crate::builder::{ListEntry, ListSummary, WorkListBuilder, WorkLists};
use crate::context::SchedulerContext;
use crate::factory::WorkerFactory;
use crate::lifecycle::{LifecycleManager, RendererCleanup};
use crate::pacer::FramePacer;
use crate::registry::Registry;
use cadence_core::{
    BarrierFlags, Category, Completion, CompletionSink, Inbox, Stopwatch, Tick, UnitArgs, UnitId,
    UnitOp, ViewId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Cleanup dispatches are not registry units.
const CLEANUP_UNIT: UnitId = UnitId(0);

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// The tick the work lists were built for.
    pub tick: Tick,
    /// Render list dispatches.
    pub render: usize,
    /// State list dispatches.
    pub state: usize,
    /// Deferred list dispatches.
    pub deferred: usize,
    /// Highest number of asynchronous dispatches outstanding at once.
    pub max_in_flight: u32,
    /// Wall time from the start of the tick to the end of dispatch.
    pub elapsed: Duration,
}

/// Owns the registry and runs ticks.
///
/// In threaded mode the coordinator lives on the scheduler's own thread; in
/// manual mode the caller holds it and calls [`Coordinator::run_once`].
pub struct Coordinator {
    ctx: Arc<SchedulerContext>,
    registry: Registry,
    builder: WorkListBuilder,
    lifecycle: LifecycleManager,
    pacer: FramePacer,
    last_lists: ListSummary,
    open_frames: HashMap<ViewId, Stopwatch>,
    finished_frames: Vec<(ViewId, Duration)>,
    ticks: u64,
}

impl Coordinator {
    pub(crate) fn new(ctx: Arc<SchedulerContext>, factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            pacer: FramePacer::new(ctx.shutdown_rx.clone()),
            ctx,
            registry: Registry::new(),
            builder: WorkListBuilder::new(),
            lifecycle: LifecycleManager::new(factory),
            last_lists: ListSummary::default(),
            open_frames: HashMap::new(),
            finished_frames: Vec::new(),
            ticks: 0,
        }
    }

    /// Runs one tick: pending lifecycle requests, then a build and a full
    /// walk of the work lists.
    pub fn run_once(&mut self) -> TickReport {
        let watch = Stopwatch::new();
        let monitor = Arc::clone(&self.ctx.monitor);
        monitor.take_work();
        monitor.begin_tick();
        self.apply_requests();

        let tick = self.ctx.clock.advance();
        let lists = self.builder.build(&mut self.registry, tick, &self.ctx.mirrors);
        if monitor.cpu_limit() <= 1 {
            self.dispatch_inline(&lists);
        } else {
            self.dispatch_async(&lists);
        }
        self.finish_frames();

        let flushed = self.ctx.mirrors.flush();
        if flushed > 0 {
            log::trace!("Coordinator: flushed {flushed} mirror objects");
        }
        self.ticks += 1;
        let interval = self.ctx.config.sweep_interval;
        if interval > 0 && self.ticks % interval == 0 {
            self.sweep_pool();
        }
        if self.registry.has_continuous_work() {
            monitor.set_work();
        }
        let max_in_flight = monitor.end_tick();

        let report = TickReport {
            tick,
            render: lists.render.len(),
            state: lists.state.len(),
            deferred: lists.deferred.len(),
            max_in_flight,
            elapsed: watch.elapsed(),
        };
        log::trace!("Coordinator: {report:?}");
        self.last_lists = lists.summary();
        report
    }

    /// Blocks until work is posted. Returns `false` on shutdown.
    pub fn wait_for_work(&self) -> bool {
        self.ctx.monitor.check_for_work()
    }

    /// Sleeps what the active views' minimum cycle times still require.
    pub fn pace(&self, elapsed: Duration) -> Duration {
        self.pacer.pace(self.registry.active_min_cycles(), elapsed)
    }

    /// The coordinator's registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// What the last tick dispatched.
    pub fn last_lists(&self) -> &ListSummary {
        &self.last_lists
    }

    /// Gives up the coordinator role when nothing is registered and no
    /// request is waiting. Decided under the monitor lock so a request
    /// posted concurrently either is seen here or starts a new coordinator.
    pub(crate) fn try_retire(&self) -> bool {
        self.registry.is_empty()
            && self
                .ctx
                .monitor
                .retire_if(|| self.ctx.requests_rx.is_empty())
    }

    fn apply_requests(&mut self) {
        while let Ok(request) = self.ctx.requests_rx.try_recv() {
            let effects = self.lifecycle.apply(&mut self.registry, &self.ctx, request);
            for cleanup in effects.cleanups {
                self.run_renderer_cleanup(cleanup);
            }
            if effects.sweep {
                self.sweep_pool();
            }
            if let Some(budget) = effects.concurrency_budget {
                log::info!("Coordinator: concurrency budget set to {budget}");
                self.ctx.monitor.set_cpu_limit(budget);
            }
        }
    }

    /// RUN_RENDERER_CLEANUP: runs the renderer's cleanup on its own worker
    /// and blocks until it reports done.
    fn run_renderer_cleanup(&self, cleanup: RendererCleanup) {
        let RendererCleanup { renderer, worker } = cleanup;
        log::debug!("Coordinator: cleaning up {renderer}");
        let args = UnitArgs::new(
            UnitOp::Cleanup { renderer },
            Inbox::None,
            Arc::clone(&self.ctx.mirrors),
        );
        let sink: Arc<dyn CompletionSink> = self.ctx.monitor.clone();
        self.ctx.monitor.begin_cleanup();
        worker.run_async(
            self.ctx.clock.current(),
            args,
            Completion::new(sink, Category::Cleanup, CLEANUP_UNIT),
        );
        self.ctx.monitor.wait_for_cleanup();
    }

    fn dispatch_inline(&mut self, lists: &WorkLists) {
        for entry in lists.render.iter().chain(&lists.state).chain(&lists.deferred) {
            self.before_dispatch(entry, lists.tick);
            entry.worker.do_work(lists.tick, &entry.args);
            if let Some(view) = stopped_view(entry) {
                self.end_frame(view);
            }
        }
    }

    fn dispatch_async(&mut self, lists: &WorkLists) {
        let monitor = Arc::clone(&self.ctx.monitor);
        let sink: Arc<dyn CompletionSink> = monitor.clone();
        let (mut r, mut s, mut d) = (0, 0, 0);
        // A frame bracket closes once the render barrier after it drains.
        let mut open_frame: Option<ViewId> = None;

        loop {
            let mut guard = monitor.lock();
            let render_ready = !guard.waiting(Category::Render);
            if render_ready {
                if let Some(view) = open_frame.take() {
                    self.end_frame(view);
                }
            }

            let remaining = r < lists.render.len() || s < lists.state.len() || d < lists.deferred.len();
            if remaining && guard.budget_exhausted() {
                guard.wait_for_cpu();
                continue;
            }

            let next = if render_ready && r < lists.render.len() {
                r += 1;
                Some(&lists.render[r - 1])
            } else if !guard.waiting(Category::State) && s < lists.state.len() {
                s += 1;
                Some(&lists.state[s - 1])
            } else if render_ready && r == lists.render.len() && d < lists.deferred.len() {
                d += 1;
                Some(&lists.deferred[d - 1])
            } else {
                None
            };

            let Some(entry) = next else {
                if !remaining && guard.in_flight() == 0 {
                    break;
                }
                guard.wait_for_threads();
                continue;
            };

            guard.begin_dispatch(entry.category, entry.waits());
            drop(guard);

            self.before_dispatch(entry, lists.tick);
            if let Some(view) = stopped_view(entry) {
                open_frame = Some(view);
            }
            let done = Completion::new(Arc::clone(&sink), entry.category, entry.unit);
            entry.worker.run_async(lists.tick, entry.args.clone(), done);
        }

        if let Some(view) = open_frame {
            self.end_frame(view);
        }
    }

    fn before_dispatch(&mut self, entry: &ListEntry, tick: Tick) {
        self.registry.mark_ran(entry.unit, tick);
        log::trace!(
            "Coordinator: {} -> {} {:?}",
            entry.unit,
            entry.worker.name(),
            entry.opts
        );
        if entry.opts.contains(BarrierFlags::START_TIMER) {
            if let Some(view) = entry.args.op.view() {
                self.open_frames.insert(view, Stopwatch::new());
            }
        }
    }

    fn end_frame(&mut self, view: ViewId) {
        if let Some(watch) = self.open_frames.remove(&view) {
            self.finished_frames.push((view, watch.elapsed()));
        }
    }

    fn finish_frames(&mut self) {
        if self.finished_frames.is_empty() {
            return;
        }
        let mut timing = self.ctx.timing.lock();
        for (view, duration) in self.finished_frames.drain(..) {
            timing.record(view, duration);
        }
    }

    fn sweep_pool(&self) {
        let trimmed = self.ctx.pool.sweep();
        if trimmed > 0 {
            log::debug!("Coordinator: pool sweep dropped {trimmed} objects");
        }
    }
}

fn stopped_view(entry: &ListEntry) -> Option<ViewId> {
    if entry.opts.contains(BarrierFlags::STOP_TIMER) {
        entry.args.end_view
    } else {
        None
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("units", &self.registry.len())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ViewSpec;
    use crate::lifecycle::LifecycleRequest;
    use crate::monitor::CoordinatorState;
    use crate::testing::{context, NullFactory};
    use cadence_core::{PhysicalEnvId, RendererId, StructureKind, TargetId, UniverseId, Worker};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Log {
        ops: Mutex<Vec<UnitOp>>,
        running: AtomicU32,
        peak: AtomicU32,
        live: AtomicU32,
    }

    struct Logging(Arc<Log>);

    impl Logging {
        fn spawn(log: &Arc<Log>) -> Arc<dyn Worker> {
            log.live.fetch_add(1, Ordering::SeqCst);
            Arc::new(Logging(Arc::clone(log)))
        }
    }

    impl Drop for Logging {
        fn drop(&mut self) {
            self.0.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Worker for Logging {
        fn do_work(&self, _tick: Tick, args: &UnitArgs) {
            let now = self.0.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            self.0.ops.lock().push(args.op);
            self.0.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct LoggingFactory(Arc<Log>);

    impl WorkerFactory for LoggingFactory {
        fn structure(&self, _universe: UniverseId, _kind: StructureKind) -> Arc<dyn Worker> {
            Logging::spawn(&self.0)
        }
        fn behavior_scheduler(&self, _universe: UniverseId) -> Arc<dyn Worker> {
            Logging::spawn(&self.0)
        }
        fn sound_scheduler(&self, _view: ViewId) -> Arc<dyn Worker> {
            Logging::spawn(&self.0)
        }
        fn renderer(&self, _renderer: RendererId) -> Arc<dyn Worker> {
            Logging::spawn(&self.0)
        }
        fn input_poller(&self, _env: PhysicalEnvId) -> Arc<dyn Worker> {
            Logging::spawn(&self.0)
        }
    }

    fn view(id: u32, renderer: u32) -> ViewSpec {
        ViewSpec::new(ViewId(id), UniverseId(0)).with_target(TargetId(0), RendererId(renderer))
    }

    fn coordinator(budget: u32) -> (Coordinator, Arc<Log>) {
        let log = Arc::new(Log::default());
        let ctx = Arc::new(context(budget));
        let coordinator = Coordinator::new(ctx, Arc::new(LoggingFactory(Arc::clone(&log))));
        (coordinator, log)
    }

    fn send(coordinator: &Coordinator, request: LifecycleRequest) {
        coordinator
            .ctx
            .requests_tx
            .send(request)
            .expect("request channel open");
    }

    #[test]
    fn test_inline_tick_runs_render_then_swap() {
        let (mut coordinator, log) = coordinator(1);
        send(&coordinator, LifecycleRequest::RegisterView(view(1, 0)));
        send(&coordinator, LifecycleRequest::ActivateView(ViewId(1)));
        let report = coordinator.run_once();

        assert_eq!(report.render, 2);
        assert_eq!(report.max_in_flight, 0, "inline dispatch never goes async");
        assert!(report.elapsed >= Duration::from_millis(4), "{report:?}");
        let ops = log.ops.lock().clone();
        assert!(matches!(ops[0], UnitOp::Render { .. }));
        assert!(matches!(ops[1], UnitOp::Swap { .. }));
        assert_eq!(coordinator.ctx.monitor.state(), CoordinatorState::Sleeping);
    }

    #[test]
    fn test_frame_timing_recorded_per_view() {
        let (mut coordinator, _log) = coordinator(1);
        send(&coordinator, LifecycleRequest::RegisterView(view(1, 0)));
        send(&coordinator, LifecycleRequest::ActivateView(ViewId(1)));
        coordinator.run_once();

        let timing = coordinator.ctx.timing.lock().snapshot(ViewId(1));
        let timing = timing.expect("one frame recorded");
        assert_eq!(timing.frames, 1);
        assert!(timing.last_ms >= 4.0, "render and swap both inside the frame");
    }

    #[test]
    fn test_async_dispatch_respects_budget() {
        let (mut coordinator, log) = coordinator(2);
        for id in 1..=4 {
            send(&coordinator, LifecycleRequest::RegisterView(view(id, id)));
            send(&coordinator, LifecycleRequest::ActivateView(ViewId(id)));
        }
        let message = coordinator
            .ctx
            .router
            .message(0, cadence_core::TargetMask::STRUCTURES)
            .with_universe(UniverseId(0));
        coordinator.ctx.router.post(&coordinator.ctx.clock, message);

        let report = coordinator.run_once();
        assert_eq!(report.render, 8);
        assert!(report.max_in_flight <= 2, "{report:?}");
        assert!(log.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(coordinator.ctx.monitor.in_flight(), 0);
        assert_eq!(log.ops.lock().len(), report.render + report.state + report.deferred);
    }

    #[test]
    fn test_second_tick_is_empty_without_changes() {
        let (mut coordinator, _log) = coordinator(1);
        send(&coordinator, LifecycleRequest::RegisterView(view(1, 0)));
        send(&coordinator, LifecycleRequest::ActivateView(ViewId(1)));
        coordinator.run_once();
        let report = coordinator.run_once();
        assert_eq!(report.render + report.state + report.deferred, 0);
        assert!(coordinator.last_lists().is_empty());
    }

    #[test]
    fn test_unregister_runs_renderer_cleanup() {
        let (mut coordinator, log) = coordinator(1);
        send(&coordinator, LifecycleRequest::RegisterView(view(1, 3)));
        coordinator.run_once();
        send(&coordinator, LifecycleRequest::UnregisterView(ViewId(1)));
        coordinator.run_once();

        let ops = log.ops.lock().clone();
        assert_eq!(ops, vec![UnitOp::Cleanup { renderer: RendererId(3) }]);
        assert!(coordinator.registry().is_empty());
        assert!(coordinator.try_retire());
    }

    #[test]
    fn test_torn_down_workers_are_released_with_the_registry() {
        let (mut coordinator, log) = coordinator(2);
        send(&coordinator, LifecycleRequest::RegisterView(view(1, 0)));
        send(&coordinator, LifecycleRequest::ActivateView(ViewId(1)));
        coordinator.run_once();
        assert!(log.live.load(Ordering::SeqCst) > 0);
        let rendered: Vec<UnitOp> = coordinator.last_lists().render.iter().map(|r| r.op).collect();
        assert!(matches!(rendered[..], [UnitOp::Render { .. }, UnitOp::Swap { .. }]));

        send(&coordinator, LifecycleRequest::UnregisterView(ViewId(1)));
        coordinator.run_once();
        assert!(coordinator.registry().is_empty());
        assert_eq!(log.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retire_refused_while_requests_wait() {
        let ctx = Arc::new(context(1));
        let coordinator = Coordinator::new(Arc::clone(&ctx), Arc::new(NullFactory));
        assert!(ctx.monitor.claim_coordinator());
        send(&coordinator, LifecycleRequest::StopView(ViewId(9)));
        assert!(!coordinator.try_retire());
    }

    #[test]
    fn test_budget_request_changes_cpu_limit() {
        let (mut coordinator, _log) = coordinator(1);
        send(&coordinator, LifecycleRequest::SetConcurrencyBudget(4));
        coordinator.run_once();
        assert_eq!(coordinator.ctx.monitor.cpu_limit(), 4);
    }
}
