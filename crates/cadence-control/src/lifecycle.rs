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

//! Creates, activates and tears down work units as views come and go.
//!
//! Requests are queued by any thread and applied by the coordinator between
//! ticks. Every transition is idempotent: asking for a state the view is
//! already in is a logged no-op.

use crate::context::SchedulerContext;
use crate::factory::{ViewSpec, WorkerFactory};
use crate::registry::{PollerEntry, Registry, RendererEntry, UniverseEntry, ViewEntry};
use crate::router::ViewQueues;
use crate::worker_thread::WorkerThread;
use cadence_core::{
    Inbox, PhysicalEnvId, RendererId, RendererRequestKind, StructureKind, UnitId, UnitOp,
    UniverseId, ViewId, Worker,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// A change to the set of scheduled views.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleRequest {
    /// Register a view, creating its units and, on first use, its universe's.
    RegisterView(ViewSpec),
    /// Tear a view down.
    UnregisterView(ViewId),
    /// Let a registered view take part in scheduling.
    ActivateView(ViewId),
    /// Keep a view registered but skip it.
    DeactivateView(ViewId),
    /// Resume rendering a stopped view.
    StartView(ViewId),
    /// Halt rendering; honored at the next work list build.
    StopView(ViewId),
    /// The view's drawing targets changed: registers the view when it first
    /// has a target, unregisters it when it has none, rebuilds its render
    /// units otherwise.
    ReevaluateCanvases(ViewSpec),
    /// Input devices of a physical environment changed.
    InputDeviceChanged(PhysicalEnvId),
    /// Tear down every view of a universe.
    EmptyUniverse(UniverseId),
    /// Enable graphics configuration features on a renderer.
    SetGraphicsConfigFeatures {
        /// Target renderer.
        renderer: RendererId,
        /// Feature bits.
        features: u64,
    },
    /// Release a renderer's native context.
    FreeRendererContext(RendererId),
    /// Change a view's minimum frame cycle.
    SetMinFrameCycleTime {
        /// Target view.
        view: ViewId,
        /// New minimum.
        min: Duration,
    },
    /// Change the concurrency budget.
    SetConcurrencyBudget(u32),
}

/// A renderer whose native resources must be released by the coordinator.
#[derive(Clone)]
pub struct RendererCleanup {
    /// The renderer.
    pub renderer: RendererId,
    /// Its worker.
    pub worker: Arc<dyn Worker>,
}

impl std::fmt::Debug for RendererCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererCleanup")
            .field("renderer", &self.renderer)
            .field("worker", &self.worker.name())
            .finish()
    }
}

/// Work the coordinator must do after applying requests.
#[derive(Debug, Default)]
pub struct LifecycleEffects {
    /// Renderers to clean up, in order.
    pub cleanups: Vec<RendererCleanup>,
    /// A universe went away; its pooled objects should be swept.
    pub sweep: bool,
    /// A new concurrency budget.
    pub concurrency_budget: Option<u32>,
}

impl LifecycleEffects {
    fn merge(&mut self, other: LifecycleEffects) {
        self.cleanups.extend(other.cleanups);
        self.sweep |= other.sweep;
        if other.concurrency_budget.is_some() {
            self.concurrency_budget = other.concurrency_budget;
        }
    }
}

/// Applies lifecycle requests to the registry.
pub struct LifecycleManager {
    factory: Arc<dyn WorkerFactory>,
}

impl LifecycleManager {
    /// Creates a manager obtaining workers from `factory`.
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self { factory }
    }

    pub(crate) fn apply(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        request: LifecycleRequest,
    ) -> LifecycleEffects {
        log::debug!("Lifecycle: applying {request:?}");
        match request {
            LifecycleRequest::RegisterView(spec) => self.register_view(registry, ctx, spec),
            LifecycleRequest::UnregisterView(view) => self.unregister_view(registry, ctx, view),
            LifecycleRequest::ActivateView(view) => {
                self.activate_view(registry, ctx, view);
                LifecycleEffects::default()
            }
            LifecycleRequest::DeactivateView(view) => {
                self.deactivate_view(registry, ctx, view);
                LifecycleEffects::default()
            }
            LifecycleRequest::StartView(view) => {
                self.start_view(registry, ctx, view);
                LifecycleEffects::default()
            }
            LifecycleRequest::StopView(view) => {
                self.stop_view(registry, view);
                LifecycleEffects::default()
            }
            LifecycleRequest::ReevaluateCanvases(spec) => {
                self.reevaluate_canvases(registry, ctx, spec)
            }
            LifecycleRequest::InputDeviceChanged(env) => {
                self.input_device_changed(registry, ctx, env);
                LifecycleEffects::default()
            }
            LifecycleRequest::EmptyUniverse(universe) => {
                self.empty_universe(registry, ctx, universe)
            }
            LifecycleRequest::SetGraphicsConfigFeatures { renderer, features } => {
                let request = ctx
                    .router
                    .request(RendererRequestKind::SetGraphicsConfigFeatures(features));
                ctx.router.post_request(&ctx.clock, renderer, request);
                LifecycleEffects::default()
            }
            LifecycleRequest::FreeRendererContext(renderer) => {
                let mut effects = LifecycleEffects::default();
                match registry.renderers.get(&renderer) {
                    Some(entry) => effects.cleanups.push(RendererCleanup {
                        renderer,
                        worker: Arc::clone(&entry.worker),
                    }),
                    None => log::debug!("Lifecycle: {renderer} has no context to free"),
                }
                effects
            }
            LifecycleRequest::SetMinFrameCycleTime { view, min } => {
                match registry.views.get_mut(&view) {
                    Some(entry) => entry.min_cycle_time = min,
                    None => log::debug!("Lifecycle: {view} is not registered"),
                }
                LifecycleEffects::default()
            }
            LifecycleRequest::SetConcurrencyBudget(budget) => {
                let mut effects = LifecycleEffects::default();
                if budget == 0 {
                    log::warn!("Lifecycle: ignoring a concurrency budget of 0");
                } else {
                    effects.concurrency_budget = Some(budget);
                }
                effects
            }
        }
    }

    /// Registers a view. Re-registering into the same universe does nothing;
    /// into another universe it moves the view.
    pub(crate) fn register_view(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        spec: ViewSpec,
    ) -> LifecycleEffects {
        let mut effects = LifecycleEffects::default();
        if let Some(existing) = registry.views.get(&spec.id) {
            if existing.spec.universe == spec.universe {
                log::debug!("Lifecycle: {} already registered", spec.id);
                return effects;
            }
            effects.merge(self.unregister_view(registry, ctx, spec.id));
        }
        if spec.targets.is_empty() {
            log::warn!("Lifecycle: {} has no drawing target, not registered", spec.id);
            return effects;
        }

        self.ensure_universe(registry, ctx, spec.universe);
        let Some(queues) = ctx.router.add_view(spec.id, spec.universe) else {
            log::error!("Lifecycle: no route for {}", spec.universe);
            return effects;
        };
        if let Some(universe) = registry.universes.get_mut(&spec.universe) {
            universe.views.insert(spec.id);
        }

        let (render, swap) = self.create_render_units(registry, ctx, &spec, &queues);
        let sound_worker = self.spawn(ctx, self.factory.sound_scheduler(spec.id));
        let sound = registry.insert_unit(
            UnitOp::SoundScheduler { view: spec.id },
            sound_worker,
            Inbox::Messages(Arc::clone(&queues.sound)),
        );
        if spec.continuous {
            for id in render.iter().chain(swap.iter()) {
                if let Some(unit) = registry.unit_mut(*id) {
                    unit.continuous = true;
                }
            }
        }
        self.attach_poller(registry, ctx, spec.physical_env, spec.id);

        log::info!("Lifecycle: registered {} in {}", spec.id, spec.universe);
        queues.render.touch(ctx.clock.advance());
        registry.views.insert(
            spec.id,
            ViewEntry {
                min_cycle_time: spec.min_cycle_time.unwrap_or(ctx.config.frame_cycle_time_min),
                spec,
                render,
                swap,
                sound,
                queues,
                active: false,
                running: true,
            },
        );
        registry.mark_dirty();
        effects
    }

    /// Tears a view down, along with its universe and renderers once nothing
    /// else references them.
    pub(crate) fn unregister_view(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        view: ViewId,
    ) -> LifecycleEffects {
        let mut effects = LifecycleEffects::default();
        if !registry.views.contains_key(&view) {
            log::debug!("Lifecycle: {view} is not registered");
            return effects;
        }
        self.deactivate_view(registry, ctx, view);
        let Some(entry) = registry.views.remove(&view) else {
            return effects;
        };

        for id in entry.render.iter().chain(entry.swap.iter()) {
            registry.remove_unit(*id);
        }
        registry.remove_unit(entry.sound);
        ctx.router.remove_view(view);
        ctx.timing.lock().remove(view);

        let renderers: BTreeSet<RendererId> =
            entry.spec.targets.iter().map(|target| target.renderer).collect();
        for renderer in renderers {
            self.release_renderer(registry, ctx, renderer, view, &mut effects);
        }
        self.detach_poller(registry, entry.spec.physical_env, view);

        let universe_id = entry.spec.universe;
        let now_empty = registry.universes.get_mut(&universe_id).is_some_and(|universe| {
            universe.views.remove(&view);
            universe.views.is_empty()
        });
        if now_empty {
            if let Some(universe) = registry.universes.remove(&universe_id) {
                for id in universe.structures.iter().chain([&universe.behavior]) {
                    registry.remove_unit(*id);
                }
            }
            let released = ctx.router.remove_universe(universe_id);
            log::info!("Lifecycle: {universe_id} torn down ({released} queued messages released)");
            effects.sweep = true;
        }

        log::info!("Lifecycle: unregistered {view}");
        registry.mark_dirty();
        effects
    }

    /// Lets a registered view take part in scheduling.
    pub(crate) fn activate_view(&self, registry: &mut Registry, ctx: &SchedulerContext, view: ViewId) {
        let Some(entry) = registry.views.get_mut(&view) else {
            log::debug!("Lifecycle: cannot activate unregistered {view}");
            return;
        };
        if entry.active {
            return;
        }
        entry.active = true;
        let units = view_units(entry);
        let universe_id = entry.spec.universe;
        let env = entry.spec.physical_env;
        let render_queue = Arc::clone(&entry.queues.render);
        registry.set_active(&units, true);

        let now = ctx.clock.advance();
        let mut first_activation = None;
        if let Some(universe) = registry.universes.get_mut(&universe_id) {
            universe.active_views += 1;
            if universe.active_views == 1 {
                universe.reset_conditions = true;
                first_activation = Some(universe_units(universe));
            }
        }
        if let Some(shared) = first_activation {
            log::debug!("Lifecycle: {universe_id} has its first active view");
            registry.set_active(&shared, true);
            if let Some(behavior) = shared.last().and_then(|id| registry.unit_mut(*id)) {
                behavior.touch(now);
            }
        }
        self.refresh_poller(registry, env);
        render_queue.touch(now);
    }

    /// Removes a view from scheduling without destroying its units.
    pub(crate) fn deactivate_view(
        &self,
        registry: &mut Registry,
        _ctx: &SchedulerContext,
        view: ViewId,
    ) {
        let Some(entry) = registry.views.get_mut(&view) else {
            log::debug!("Lifecycle: cannot deactivate unregistered {view}");
            return;
        };
        if !entry.active {
            return;
        }
        entry.active = false;
        let units = view_units(entry);
        let universe_id = entry.spec.universe;
        let env = entry.spec.physical_env;
        registry.set_active(&units, false);

        let mut last_deactivation = None;
        if let Some(universe) = registry.universes.get_mut(&universe_id) {
            universe.active_views = universe.active_views.saturating_sub(1);
            if universe.active_views == 0 {
                last_deactivation = Some(universe_units(universe));
            }
        }
        if let Some(shared) = last_deactivation {
            log::debug!("Lifecycle: {universe_id} has no active view left");
            registry.set_active(&shared, false);
        }
        self.refresh_poller(registry, env);
    }

    /// Resumes a stopped view.
    pub(crate) fn start_view(&self, registry: &mut Registry, ctx: &SchedulerContext, view: ViewId) {
        let Some(entry) = registry.views.get_mut(&view) else {
            log::debug!("Lifecycle: cannot start unregistered {view}");
            return;
        };
        if entry.running {
            return;
        }
        entry.running = true;
        let units = view_units(entry);
        let render_queue = Arc::clone(&entry.queues.render);
        set_stopped(registry, &units, false);
        render_queue.touch(ctx.clock.advance());
    }

    /// Halts a view at the next work list build.
    pub(crate) fn stop_view(&self, registry: &mut Registry, view: ViewId) {
        let Some(entry) = registry.views.get_mut(&view) else {
            log::debug!("Lifecycle: cannot stop unregistered {view}");
            return;
        };
        if !entry.running {
            return;
        }
        entry.running = false;
        let units = view_units(entry);
        set_stopped(registry, &units, true);
    }

    /// Reconciles a view with its current drawing targets.
    pub(crate) fn reevaluate_canvases(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        spec: ViewSpec,
    ) -> LifecycleEffects {
        let mut effects = LifecycleEffects::default();
        if spec.targets.is_empty() {
            return self.unregister_view(registry, ctx, spec.id);
        }
        let Some(entry) = registry.views.get(&spec.id) else {
            return self.register_view(registry, ctx, spec);
        };
        if entry.spec.universe != spec.universe {
            return self.register_view(registry, ctx, spec);
        }

        if entry.spec.targets != spec.targets || entry.spec.continuous != spec.continuous {
            self.rebuild_render_units(registry, ctx, &spec, &mut effects);
        }
        if let Some(entry) = registry.views.get_mut(&spec.id) {
            entry.min_cycle_time = spec.min_cycle_time.unwrap_or(ctx.config.frame_cycle_time_min);
            entry.spec = spec.clone();
        }

        for target in &spec.targets {
            let request = ctx
                .router
                .request(RendererRequestKind::ReevaluateCanvas(target.id));
            ctx.router.post_request(&ctx.clock, target.renderer, request);
        }
        effects
    }

    /// Marks the poller of `env` dirty.
    pub(crate) fn input_device_changed(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        env: PhysicalEnvId,
    ) {
        let Some(poller) = registry.pollers.get(&env) else {
            log::debug!("Lifecycle: no poller for {env}");
            return;
        };
        let id = poller.unit;
        if let Some(unit) = registry.unit_mut(id) {
            unit.touch(ctx.clock.advance());
        }
    }

    /// Unregisters every view of a universe.
    pub(crate) fn empty_universe(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        universe: UniverseId,
    ) -> LifecycleEffects {
        let mut effects = LifecycleEffects::default();
        let views: Vec<ViewId> = registry
            .universes
            .get(&universe)
            .map(|entry| entry.views.iter().copied().collect())
            .unwrap_or_default();
        for view in views {
            effects.merge(self.unregister_view(registry, ctx, view));
        }
        effects
    }

    fn spawn(&self, ctx: &SchedulerContext, worker: Arc<dyn Worker>) -> Arc<dyn Worker> {
        if ctx.monitor.cpu_limit() <= 1 {
            return worker;
        }
        match WorkerThread::spawn(Arc::clone(&worker)) {
            Ok(thread) => Arc::new(thread),
            Err(err) => {
                log::warn!("Lifecycle: {err}; {} will run inline", worker.name());
                worker
            }
        }
    }

    fn ensure_universe(&self, registry: &mut Registry, ctx: &SchedulerContext, universe: UniverseId) {
        if registry.universes.contains_key(&universe) {
            return;
        }
        let queues = ctx.router.add_universe(universe);
        let mut structures = Vec::with_capacity(queues.len());
        let mut behavior_queue = None;
        for (kind, queue) in queues {
            if kind == StructureKind::Behavior {
                behavior_queue = Some(Arc::clone(&queue));
            }
            let worker = self.spawn(ctx, self.factory.structure(universe, kind));
            structures.push(registry.insert_unit(
                UnitOp::Structure { universe, kind },
                worker,
                Inbox::Messages(queue),
            ));
        }
        let worker = self.spawn(ctx, self.factory.behavior_scheduler(universe));
        let behavior = registry.insert_unit(
            UnitOp::BehaviorScheduler {
                universe,
                reset_conditions: false,
            },
            worker,
            behavior_queue.map_or(Inbox::None, Inbox::Messages),
        );
        log::debug!("Lifecycle: created units of {universe}");
        registry.universes.insert(
            universe,
            UniverseEntry {
                structures,
                behavior,
                views: BTreeSet::new(),
                active_views: 0,
                reset_conditions: false,
            },
        );
    }

    fn ensure_renderer(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        renderer: RendererId,
    ) -> Arc<dyn Worker> {
        if let Some(entry) = registry.renderers.get(&renderer) {
            return Arc::clone(&entry.worker);
        }
        let worker = self.spawn(ctx, self.factory.renderer(renderer));
        let queue = ctx.router.add_renderer(renderer);
        let deferred = registry.insert_unit(
            UnitOp::Deferred { renderer },
            Arc::clone(&worker),
            Inbox::Requests(Arc::clone(&queue)),
        );
        if let Some(unit) = registry.unit_mut(deferred) {
            unit.active = true;
        }
        log::debug!("Lifecycle: created {renderer}");
        registry.renderers.insert(
            renderer,
            RendererEntry {
                worker: Arc::clone(&worker),
                deferred,
                queue,
                views: BTreeSet::new(),
                last_wait_generation: 0,
            },
        );
        worker
    }

    fn release_renderer(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        renderer: RendererId,
        view: ViewId,
        effects: &mut LifecycleEffects,
    ) {
        let unused = registry.renderers.get_mut(&renderer).is_some_and(|entry| {
            entry.views.remove(&view);
            entry.views.is_empty()
        });
        if !unused {
            return;
        }
        if let Some(entry) = registry.renderers.remove(&renderer) {
            registry.remove_unit(entry.deferred);
            ctx.router.remove_renderer(renderer);
            log::debug!("Lifecycle: {renderer} no longer used");
            effects.cleanups.push(RendererCleanup {
                renderer,
                worker: entry.worker,
            });
        }
    }

    fn create_render_units(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        spec: &ViewSpec,
        queues: &ViewQueues,
    ) -> (Vec<UnitId>, Option<UnitId>) {
        let mut render = Vec::with_capacity(spec.targets.len());
        for target in &spec.targets {
            let worker = self.ensure_renderer(registry, ctx, target.renderer);
            if let Some(entry) = registry.renderers.get_mut(&target.renderer) {
                entry.views.insert(spec.id);
            }
            render.push(registry.insert_unit(
                UnitOp::Render {
                    view: spec.id,
                    target: target.id,
                    renderer: target.renderer,
                },
                worker,
                Inbox::Messages(Arc::clone(&queues.render)),
            ));
        }

        let swap = spec
            .presents()
            .then(|| spec.swap_renderer())
            .flatten()
            .map(|renderer| {
                let worker = self.ensure_renderer(registry, ctx, renderer);
                registry.insert_unit(
                    UnitOp::Swap {
                        view: spec.id,
                        renderer,
                    },
                    worker,
                    Inbox::Messages(Arc::clone(&queues.render)),
                )
            });
        (render, swap)
    }

    fn rebuild_render_units(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        spec: &ViewSpec,
        effects: &mut LifecycleEffects,
    ) {
        let Some(entry) = registry.views.get(&spec.id) else {
            return;
        };
        let old_units: Vec<UnitId> = entry.render.iter().chain(entry.swap.iter()).copied().collect();
        let old_renderers: BTreeSet<RendererId> =
            entry.spec.targets.iter().map(|target| target.renderer).collect();
        let queues = entry.queues.clone();
        let (active, running) = (entry.active, entry.running);

        for id in old_units {
            registry.remove_unit(id);
        }
        // New renderers are referenced before old ones are released, so a
        // renderer kept by the new target set is never torn down.
        let (render, swap) = self.create_render_units(registry, ctx, spec, &queues);
        let new_renderers: BTreeSet<RendererId> =
            spec.targets.iter().map(|target| target.renderer).collect();
        for renderer in old_renderers.difference(&new_renderers) {
            self.release_renderer(registry, ctx, *renderer, spec.id, effects);
        }

        for id in render.iter().chain(swap.iter()) {
            if let Some(unit) = registry.unit_mut(*id) {
                unit.active = active;
                unit.stopped = !running;
                unit.continuous = spec.continuous;
            }
        }
        if let Some(entry) = registry.views.get_mut(&spec.id) {
            entry.render = render;
            entry.swap = swap;
        }
        queues.render.touch(ctx.clock.advance());
        log::debug!("Lifecycle: rebuilt render units of {}", spec.id);
    }

    fn attach_poller(
        &self,
        registry: &mut Registry,
        ctx: &SchedulerContext,
        env: PhysicalEnvId,
        view: ViewId,
    ) {
        if !registry.pollers.contains_key(&env) {
            let worker = self.spawn(ctx, self.factory.input_poller(env));
            let unit = registry.insert_unit(UnitOp::InputPoller { env }, worker, Inbox::None);
            registry.pollers.insert(
                env,
                PollerEntry {
                    unit,
                    views: BTreeSet::new(),
                },
            );
        }
        if let Some(poller) = registry.pollers.get_mut(&env) {
            poller.views.insert(view);
        }
        self.refresh_poller(registry, env);
    }

    fn detach_poller(&self, registry: &mut Registry, env: PhysicalEnvId, view: ViewId) {
        let unused = registry.pollers.get_mut(&env).is_some_and(|poller| {
            poller.views.remove(&view);
            poller.views.is_empty()
        });
        if unused {
            if let Some(poller) = registry.pollers.remove(&env) {
                registry.remove_unit(poller.unit);
            }
        } else {
            self.refresh_poller(registry, env);
        }
    }

    // A poller runs while any of its views is active.
    fn refresh_poller(&self, registry: &mut Registry, env: PhysicalEnvId) {
        let Some(poller) = registry.pollers.get(&env) else {
            return;
        };
        let active = poller
            .views
            .iter()
            .any(|view| registry.views.get(view).is_some_and(|entry| entry.active));
        let id = poller.unit;
        if let Some(unit) = registry.unit_mut(id) {
            unit.active = active;
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager").finish_non_exhaustive()
    }
}

fn view_units(entry: &ViewEntry) -> Vec<UnitId> {
    entry
        .render
        .iter()
        .chain(entry.swap.iter())
        .chain([&entry.sound])
        .copied()
        .collect()
}

// Structure units first, behavior scheduler last.
fn universe_units(entry: &UniverseEntry) -> Vec<UnitId> {
    entry
        .structures
        .iter()
        .chain([&entry.behavior])
        .copied()
        .collect()
}

fn set_stopped(registry: &mut Registry, units: &[UnitId], stopped: bool) {
    for id in units {
        if let Some(unit) = registry.unit_mut(*id) {
            unit.stopped = stopped;
        }
    }
    registry.mark_dirty();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, NullFactory};
    use cadence_core::{TargetId, TargetMask};

    fn spec(view: u32, universe: u32, renderer: u32) -> ViewSpec {
        ViewSpec::new(ViewId(view), UniverseId(universe))
            .with_target(TargetId(0), RendererId(renderer))
    }

    fn setup() -> (LifecycleManager, Registry, SchedulerContext) {
        (
            LifecycleManager::new(Arc::new(NullFactory)),
            Registry::new(),
            context(1),
        )
    }

    fn unit_ids(registry: &Registry) -> Vec<UnitId> {
        registry.units().map(|unit| unit.id).collect()
    }

    #[test]
    fn test_first_view_creates_universe_units() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));

        let universe = registry.universe(UniverseId(0)).unwrap();
        assert_eq!(universe.structures.len(), StructureKind::ALL.len());
        let view = registry.view(ViewId(1)).unwrap();
        assert_eq!(view.render.len(), 1);
        assert!(view.swap.is_some());
        assert!(!view.active, "views register inactive");
        assert!(registry.renderer(RendererId(0)).is_some());
        assert!(registry.poller(PhysicalEnvId(0)).is_some());
        // 6 structures, behavior, render, swap, sound, deferred, poller
        assert_eq!(registry.len(), 12);
    }

    #[test]
    fn test_register_is_idempotent() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        let before = unit_ids(&registry);
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        assert_eq!(unit_ids(&registry), before);
    }

    #[test]
    fn test_second_view_shares_universe_and_renderer() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        let before = registry.len();
        manager.register_view(&mut registry, &ctx, spec(2, 0, 0));
        // render, swap, sound
        assert_eq!(registry.len(), before + 3);
        assert_eq!(registry.renderer(RendererId(0)).unwrap().views.len(), 2);
        assert_eq!(registry.poller(PhysicalEnvId(0)).unwrap().views.len(), 2);
    }

    #[test]
    fn test_activation_toggles_universe_units() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        manager.register_view(&mut registry, &ctx, spec(2, 0, 0));
        let transform = registry.universe(UniverseId(0)).unwrap().structures[0];

        manager.activate_view(&mut registry, &ctx, ViewId(1));
        manager.activate_view(&mut registry, &ctx, ViewId(1));
        manager.activate_view(&mut registry, &ctx, ViewId(2));
        assert_eq!(registry.universe(UniverseId(0)).unwrap().active_views, 2);
        assert!(registry.unit(transform).unwrap().active);
        assert!(registry.universe(UniverseId(0)).unwrap().reset_conditions);

        manager.deactivate_view(&mut registry, &ctx, ViewId(1));
        manager.deactivate_view(&mut registry, &ctx, ViewId(1));
        assert!(registry.unit(transform).unwrap().active, "view 2 still active");
        manager.deactivate_view(&mut registry, &ctx, ViewId(2));
        assert!(!registry.unit(transform).unwrap().active);
        assert!(registry.unit(transform).is_some(), "deactivation never destroys");
    }

    #[test]
    fn test_unregister_last_view_tears_down_universe() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        manager.activate_view(&mut registry, &ctx, ViewId(1));
        let message = ctx
            .router
            .message(0, TargetMask::GEOMETRY)
            .with_universe(UniverseId(0));
        ctx.router.post(&ctx.clock, message);

        let effects = manager.unregister_view(&mut registry, &ctx, ViewId(1));
        assert!(effects.sweep);
        assert_eq!(effects.cleanups.len(), 1);
        assert_eq!(effects.cleanups[0].renderer, RendererId(0));
        assert!(registry.is_empty());
        assert!(ctx
            .router
            .universe_queue(UniverseId(0), StructureKind::Geometry)
            .is_none());
        assert_eq!(ctx.pool.stats(cadence_core::PoolKind::Message).released, 1);

        let again = manager.unregister_view(&mut registry, &ctx, ViewId(1));
        assert!(again.cleanups.is_empty() && !again.sweep);
    }

    #[test]
    fn test_shared_renderer_survives_partial_unregister() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        manager.register_view(&mut registry, &ctx, spec(2, 1, 0));
        let effects = manager.unregister_view(&mut registry, &ctx, ViewId(1));
        assert!(effects.cleanups.is_empty());
        assert!(registry.renderer(RendererId(0)).is_some());
        assert!(registry.universe(UniverseId(0)).is_none());
        assert!(registry.universe(UniverseId(1)).is_some());
    }

    #[test]
    fn test_stop_and_start_view() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        let render = registry.view(ViewId(1)).unwrap().render[0];

        manager.stop_view(&mut registry, ViewId(1));
        manager.stop_view(&mut registry, ViewId(1));
        assert!(registry.unit(render).unwrap().stopped);
        assert!(!registry.view(ViewId(1)).unwrap().running);

        manager.start_view(&mut registry, &ctx, ViewId(1));
        assert!(!registry.unit(render).unwrap().stopped);
    }

    #[test]
    fn test_reevaluate_registers_rebuilds_and_unregisters() {
        let (manager, mut registry, ctx) = setup();
        let bare = ViewSpec::new(ViewId(1), UniverseId(0));
        manager.reevaluate_canvases(&mut registry, &ctx, bare.clone());
        assert!(registry.view(ViewId(1)).is_none());

        manager.reevaluate_canvases(&mut registry, &ctx, spec(1, 0, 0));
        assert!(registry.view(ViewId(1)).is_some());

        let wider = spec(1, 0, 0).with_target(TargetId(1), RendererId(5));
        let effects = manager.reevaluate_canvases(&mut registry, &ctx, wider);
        assert!(effects.cleanups.is_empty());
        assert_eq!(registry.view(ViewId(1)).unwrap().render.len(), 2);
        assert_eq!(ctx.router.renderer_queue(RendererId(5)).unwrap().len(), 1);

        let moved = spec(1, 0, 5);
        let effects = manager.reevaluate_canvases(&mut registry, &ctx, moved);
        assert_eq!(effects.cleanups.len(), 1);
        assert_eq!(effects.cleanups[0].renderer, RendererId(0));

        let effects = manager.reevaluate_canvases(&mut registry, &ctx, bare);
        assert!(registry.is_empty());
        assert!(effects.sweep);
    }

    #[test]
    fn test_empty_universe_unregisters_its_views() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        manager.register_view(&mut registry, &ctx, spec(2, 0, 1));
        manager.register_view(&mut registry, &ctx, spec(3, 1, 2));
        let effects = manager.empty_universe(&mut registry, &ctx, UniverseId(0));
        assert_eq!(effects.cleanups.len(), 2);
        assert!(registry.view(ViewId(3)).is_some());
        assert!(registry.universe(UniverseId(0)).is_none());
    }

    #[test]
    fn test_input_device_change_dirties_poller() {
        let (manager, mut registry, ctx) = setup();
        manager.register_view(&mut registry, &ctx, spec(1, 0, 0));
        manager.activate_view(&mut registry, &ctx, ViewId(1));
        let poller = registry.poller(PhysicalEnvId(0)).unwrap().unit;
        assert!(!registry.unit_mut(poller).unwrap().refresh(ctx.clock.advance()));

        manager.input_device_changed(&mut registry, &ctx, PhysicalEnvId(0));
        assert!(registry.unit_mut(poller).unwrap().refresh(ctx.clock.advance()));
    }

    #[test]
    fn test_budget_request_rejects_zero() {
        let (manager, mut registry, ctx) = setup();
        let effects = manager.apply(&mut registry, &ctx, LifecycleRequest::SetConcurrencyBudget(0));
        assert_eq!(effects.concurrency_budget, None);
        let effects = manager.apply(&mut registry, &ctx, LifecycleRequest::SetConcurrencyBudget(3));
        assert_eq!(effects.concurrency_budget, Some(3));
    }
}
