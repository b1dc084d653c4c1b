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

//! Builds the per-tick work lists and places their barriers.
//!
//! Three lists come out of every build:
//!
//! * **state**: transform updaters, then the other structure updaters, then
//!   behavior and sound schedulers, then input pollers. The last dirty unit
//!   of the transform segment, of the structure segment and of the whole
//!   list carries `WAIT_ALL`.
//! * **render**: per active, running view, its render units followed by its
//!   swap unit. The first unit of a view starts the view's frame timer, the
//!   last one stops it and waits for everything before it. Reaching a
//!   renderer that was already dispatched since the latest barrier puts a
//!   barrier on the preceding entry.
//! * **deferred**: one unit per renderer with queued requests, the last one
//!   waiting.

use crate::registry::{Registry, WorkUnit};
use cadence_core::{
    BarrierFlags, Category, MirrorQueue, StructureKind, Tick, UnitArgs, UnitId, UnitOp, ViewId,
    Worker,
};
use std::sync::Arc;

/// One dispatch in a work list.
#[derive(Clone)]
pub struct ListEntry {
    /// The dispatched unit.
    pub unit: UnitId,
    /// Which pending counter accounts for it.
    pub category: Category,
    /// Barrier and timer flags.
    pub opts: BarrierFlags,
    /// Arguments handed to the worker.
    pub args: UnitArgs,
    /// The worker.
    pub worker: Arc<dyn Worker>,
}

impl ListEntry {
    fn new(unit: &WorkUnit, mirrors: &Arc<MirrorQueue>) -> Self {
        Self {
            unit: unit.id,
            category: unit.op.category(),
            opts: BarrierFlags::CONTINUE,
            args: unit.args(mirrors),
            worker: Arc::clone(&unit.owner),
        }
    }

    /// Whether the coordinator must drain this entry's category after it.
    pub fn waits(&self) -> bool {
        self.opts.contains(BarrierFlags::WAIT_ALL)
    }
}

impl std::fmt::Debug for ListEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListEntry")
            .field("unit", &self.unit)
            .field("op", &self.args.op)
            .field("opts", &self.opts)
            .field("end_view", &self.args.end_view)
            .finish()
    }
}

/// The output of one build.
#[derive(Debug, Clone, Default)]
pub struct WorkLists {
    /// The tick the lists were built for.
    pub tick: Tick,
    /// Render and swap dispatches, grouped by view.
    pub render: Vec<ListEntry>,
    /// Structure, scheduler and poller dispatches.
    pub state: Vec<ListEntry>,
    /// Renderer request servicing.
    pub deferred: Vec<ListEntry>,
}

impl WorkLists {
    /// Returns true if nothing needs to run.
    pub fn is_empty(&self) -> bool {
        self.render.is_empty() && self.state.is_empty() && self.deferred.is_empty()
    }

    /// Total number of dispatches.
    pub fn len(&self) -> usize {
        self.render.len() + self.state.len() + self.deferred.len()
    }

    /// The lists without their workers and inboxes.
    pub fn summary(&self) -> ListSummary {
        let records = |entries: &[ListEntry]| -> Vec<DispatchRecord> {
            entries.iter().map(DispatchRecord::from).collect()
        };
        ListSummary {
            tick: self.tick,
            render: records(&self.render),
            state: records(&self.state),
            deferred: records(&self.deferred),
        }
    }
}

/// One dispatched entry, by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRecord {
    /// The dispatched unit.
    pub unit: UnitId,
    /// Which pending counter accounted for it.
    pub category: Category,
    /// Barrier and timer flags it carried.
    pub opts: BarrierFlags,
    /// What the worker was asked to do.
    pub op: UnitOp,
    /// The view whose frame it closed, if any.
    pub end_view: Option<ViewId>,
}

impl From<&ListEntry> for DispatchRecord {
    fn from(entry: &ListEntry) -> Self {
        Self {
            unit: entry.unit,
            category: entry.category,
            opts: entry.opts,
            op: entry.args.op,
            end_view: entry.args.end_view,
        }
    }
}

/// What a past build dispatched. Holds no worker, so torn-down units are
/// released with the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSummary {
    /// The tick the lists were built for.
    pub tick: Tick,
    /// Render and swap dispatches.
    pub render: Vec<DispatchRecord>,
    /// State dispatches.
    pub state: Vec<DispatchRecord>,
    /// Deferred dispatches.
    pub deferred: Vec<DispatchRecord>,
}

impl ListSummary {
    /// Returns true if nothing was dispatched.
    pub fn is_empty(&self) -> bool {
        self.render.is_empty() && self.state.is_empty() && self.deferred.is_empty()
    }

    /// Total number of dispatches.
    pub fn len(&self) -> usize {
        self.render.len() + self.state.len() + self.deferred.len()
    }
}

/// Rebuilds the work lists from the registry once per tick.
#[derive(Debug)]
pub struct WorkListBuilder {
    wait_generation: u64,
}

impl Default for WorkListBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkListBuilder {
    /// Creates a builder.
    pub fn new() -> Self {
        // Renderers start at generation 0, so 1 means "not used yet".
        Self { wait_generation: 1 }
    }

    /// Evaluates every unit as of `now` and returns the ordered lists.
    pub fn build(
        &mut self,
        registry: &mut Registry,
        now: Tick,
        mirrors: &Arc<MirrorQueue>,
    ) -> WorkLists {
        let lists = WorkLists {
            tick: now,
            render: self.build_render(registry, now, mirrors),
            state: Self::build_state(registry, now, mirrors),
            deferred: Self::build_deferred(registry, now, mirrors),
        };

        for entry in lists.render.iter().chain(&lists.state).chain(&lists.deferred) {
            if let Some(unit) = registry.unit_mut(entry.unit) {
                unit.opts = entry.opts;
            }
        }

        log::debug!(
            "WorkListBuilder: {now} render={} state={} deferred={}",
            lists.render.len(),
            lists.state.len(),
            lists.deferred.len()
        );
        lists
    }

    fn build_state(registry: &mut Registry, now: Tick, mirrors: &Arc<MirrorQueue>) -> Vec<ListEntry> {
        let Registry {
            units,
            universes,
            views,
            pollers,
            ..
        } = registry;

        let mut transform = Vec::new();
        let mut structures = Vec::new();
        let mut schedulers = Vec::new();

        for universe in universes.values() {
            for id in &universe.structures {
                let Some(unit) = units.get_mut(id) else { continue };
                if !unit.refresh(now) {
                    continue;
                }
                match unit.op {
                    UnitOp::Structure {
                        kind: StructureKind::Transform,
                        ..
                    } => transform.push(ListEntry::new(unit, mirrors)),
                    _ => structures.push(ListEntry::new(unit, mirrors)),
                }
            }
        }

        for (&universe_id, universe) in universes.iter_mut() {
            let Some(unit) = units.get_mut(&universe.behavior) else { continue };
            if !unit.refresh(now) {
                continue;
            }
            let mut entry = ListEntry::new(unit, mirrors);
            if universe.reset_conditions {
                universe.reset_conditions = false;
                entry.args.op = UnitOp::BehaviorScheduler {
                    universe: universe_id,
                    reset_conditions: true,
                };
            }
            schedulers.push(entry);
        }

        for view in views.values() {
            if let Some(unit) = units.get_mut(&view.sound) {
                if unit.refresh(now) {
                    schedulers.push(ListEntry::new(unit, mirrors));
                }
            }
        }

        for poller in pollers.values() {
            if let Some(unit) = units.get_mut(&poller.unit) {
                if unit.refresh(now) {
                    schedulers.push(ListEntry::new(unit, mirrors));
                }
            }
        }

        let mut state = Vec::with_capacity(transform.len() + structures.len() + schedulers.len());
        for segment in [transform, structures, schedulers] {
            let mut segment = segment;
            if let Some(last) = segment.last_mut() {
                last.opts.insert(BarrierFlags::WAIT_ALL);
            }
            state.append(&mut segment);
        }
        state
    }

    fn build_render(
        &mut self,
        registry: &mut Registry,
        now: Tick,
        mirrors: &Arc<MirrorQueue>,
    ) -> Vec<ListEntry> {
        let Registry {
            units,
            views,
            renderers,
            ..
        } = registry;

        let mut render: Vec<ListEntry> = Vec::new();
        for (&view_id, view) in views.iter() {
            if !view.active || !view.running {
                continue;
            }
            let group_start = render.len();
            for id in view.render.iter().chain(view.swap.iter()) {
                let Some(unit) = units.get_mut(id) else { continue };
                if !unit.refresh(now) {
                    continue;
                }
                if let Some(renderer) = unit.op.renderer().and_then(|r| renderers.get_mut(&r)) {
                    if renderer.last_wait_generation == self.wait_generation {
                        if let Some(previous) = render.last_mut() {
                            previous.opts.insert(BarrierFlags::WAIT_ALL);
                        }
                        self.wait_generation += 1;
                    }
                    renderer.last_wait_generation = self.wait_generation;
                }
                render.push(ListEntry::new(unit, mirrors));
            }

            if render.len() == group_start {
                continue;
            }
            render[group_start].opts.insert(BarrierFlags::START_TIMER);
            if let Some(last) = render.last_mut() {
                last.opts.insert(BarrierFlags::STOP_TIMER | BarrierFlags::WAIT_ALL);
                last.args.end_view = Some(view_id);
            }
            self.wait_generation += 1;
        }

        if let Some(last) = render.last_mut() {
            last.opts.insert(BarrierFlags::LAST_STOP_TIMER);
        }
        render
    }

    fn build_deferred(
        registry: &mut Registry,
        now: Tick,
        mirrors: &Arc<MirrorQueue>,
    ) -> Vec<ListEntry> {
        let Registry {
            units, renderers, ..
        } = registry;

        let mut deferred: Vec<ListEntry> = renderers
            .values()
            .filter_map(|renderer| {
                let unit = units.get_mut(&renderer.deferred)?;
                unit.refresh(now).then(|| ListEntry::new(unit, mirrors))
            })
            .collect();
        if let Some(last) = deferred.last_mut() {
            last.opts.insert(BarrierFlags::WAIT_ALL);
        }
        deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ViewSpec;
    use crate::lifecycle::LifecycleManager;
    use crate::testing::{context, NullFactory};
    use cadence_core::{RendererId, TargetId, TargetMask, UniverseId, ViewId};

    fn ops(list: &[ListEntry]) -> Vec<UnitOp> {
        list.iter().map(|entry| entry.args.op).collect()
    }

    #[test]
    fn test_render_group_brackets_each_view() {
        let ctx = context(1);
        let manager = LifecycleManager::new(Arc::new(NullFactory));
        let mut registry = Registry::new();
        for view in [1, 2] {
            let spec = ViewSpec::new(ViewId(view), UniverseId(0))
                .with_target(TargetId(0), RendererId(view));
            manager.register_view(&mut registry, &ctx, spec);
            manager.activate_view(&mut registry, &ctx, ViewId(view));
        }

        let mut builder = WorkListBuilder::new();
        let lists = builder.build(&mut registry, ctx.clock.advance(), &ctx.mirrors);
        assert_eq!(lists.render.len(), 4);

        // Render and swap share the view's renderer, so the swap waits.
        let flags: Vec<BarrierFlags> = lists.render.iter().map(|e| e.opts).collect();
        assert_eq!(flags[0], BarrierFlags::START_TIMER | BarrierFlags::WAIT_ALL);
        assert_eq!(flags[1], BarrierFlags::STOP_TIMER | BarrierFlags::WAIT_ALL);
        assert_eq!(flags[2], BarrierFlags::START_TIMER | BarrierFlags::WAIT_ALL);
        assert_eq!(
            flags[3],
            BarrierFlags::STOP_TIMER | BarrierFlags::WAIT_ALL | BarrierFlags::LAST_STOP_TIMER
        );
        assert_eq!(lists.render[1].args.end_view, Some(ViewId(1)));
        assert_eq!(lists.render[3].args.end_view, Some(ViewId(2)));
        assert!(matches!(lists.render[1].args.op, UnitOp::Swap { .. }));
    }

    #[test]
    fn test_repeated_renderer_inserts_barrier() {
        let ctx = context(1);
        let manager = LifecycleManager::new(Arc::new(NullFactory));
        let mut registry = Registry::new();
        let spec = ViewSpec::new(ViewId(1), UniverseId(0))
            .with_target(TargetId(0), RendererId(7))
            .with_target(TargetId(1), RendererId(7));
        manager.register_view(&mut registry, &ctx, spec);
        manager.activate_view(&mut registry, &ctx, ViewId(1));

        let lists = WorkListBuilder::new().build(&mut registry, ctx.clock.advance(), &ctx.mirrors);
        let flags: Vec<BarrierFlags> = lists.render.iter().map(|e| e.opts).collect();
        assert_eq!(flags.len(), 3);
        assert_eq!(flags[0], BarrierFlags::START_TIMER | BarrierFlags::WAIT_ALL);
        assert_eq!(flags[1], BarrierFlags::WAIT_ALL);
        assert!(flags[2].contains(BarrierFlags::STOP_TIMER | BarrierFlags::WAIT_ALL));
    }

    #[test]
    fn test_state_segments_end_with_barriers() {
        let ctx = context(1);
        let manager = LifecycleManager::new(Arc::new(NullFactory));
        let mut registry = Registry::new();
        let spec = ViewSpec::new(ViewId(1), UniverseId(0)).with_target(TargetId(0), RendererId(0));
        manager.register_view(&mut registry, &ctx, spec);
        manager.activate_view(&mut registry, &ctx, ViewId(1));

        let message = ctx
            .router
            .message(0, TargetMask::TRANSFORM | TargetMask::GEOMETRY | TargetMask::SOUND)
            .with_universe(UniverseId(0));
        ctx.router.post(&ctx.clock, message);

        let lists = WorkListBuilder::new().build(&mut registry, ctx.clock.advance(), &ctx.mirrors);
        let state = ops(&lists.state);
        assert_eq!(
            state,
            vec![
                UnitOp::Structure {
                    universe: UniverseId(0),
                    kind: StructureKind::Transform
                },
                UnitOp::Structure {
                    universe: UniverseId(0),
                    kind: StructureKind::Geometry
                },
                UnitOp::Structure {
                    universe: UniverseId(0),
                    kind: StructureKind::Sound
                },
                UnitOp::BehaviorScheduler {
                    universe: UniverseId(0),
                    reset_conditions: true
                },
            ]
        );
        let waits: Vec<bool> = lists.state.iter().map(ListEntry::waits).collect();
        assert_eq!(waits, vec![true, false, true, true]);
    }

    #[test]
    fn test_clean_units_are_skipped() {
        let ctx = context(1);
        let manager = LifecycleManager::new(Arc::new(NullFactory));
        let mut registry = Registry::new();
        let spec = ViewSpec::new(ViewId(1), UniverseId(0)).with_target(TargetId(0), RendererId(0));
        manager.register_view(&mut registry, &ctx, spec);
        manager.activate_view(&mut registry, &ctx, ViewId(1));

        let mut builder = WorkListBuilder::new();
        let first = builder.build(&mut registry, ctx.clock.advance(), &ctx.mirrors);
        assert!(!first.is_empty());
        for entry in first.render.iter().chain(&first.state).chain(&first.deferred) {
            registry.mark_ran(entry.unit, first.tick);
        }

        let second = builder.build(&mut registry, ctx.clock.advance(), &ctx.mirrors);
        assert!(second.is_empty(), "nothing changed: {second:?}");
    }

    #[test]
    fn test_deferred_list_only_holds_pending_renderers() {
        let ctx = context(1);
        let manager = LifecycleManager::new(Arc::new(NullFactory));
        let mut registry = Registry::new();
        let spec = ViewSpec::new(ViewId(1), UniverseId(0))
            .with_target(TargetId(0), RendererId(0))
            .with_target(TargetId(1), RendererId(1));
        manager.register_view(&mut registry, &ctx, spec);

        let request = ctx.router.request(cadence_core::RendererRequestKind::Custom(2));
        assert!(ctx.router.post_request(&ctx.clock, RendererId(1), request));

        let lists = WorkListBuilder::new().build(&mut registry, ctx.clock.advance(), &ctx.mirrors);
        assert!(lists.render.is_empty(), "view is inactive");
        assert_eq!(
            ops(&lists.deferred),
            vec![UnitOp::Deferred {
                renderer: RendererId(1)
            }]
        );
        assert!(lists.deferred[0].waits());
    }
}
