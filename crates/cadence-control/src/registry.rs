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

//! The work unit registry: every schedulable unit and the entities owning them.
//!
//! The registry is owned by the coordinator and only mutated on its thread,
//! by the lifecycle manager (creation, teardown, activation), the work list
//! builder (dirty evaluation) and dispatch (run times).

use crate::factory::ViewSpec;
use crate::router::ViewQueues;
use cadence_core::{
    BarrierFlags, Inbox, MirrorQueue, PhysicalEnvId, RendererId, RendererRequestQueue, Tick,
    UnitArgs, UnitId, UnitOp, UniverseId, ViewId, Worker,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// One schedulable entity and its scheduling metadata.
#[derive(Clone)]
pub struct WorkUnit {
    /// Registry-unique identifier; never reused.
    pub id: UnitId,
    /// The operation dispatched to the owner.
    pub op: UnitOp,
    /// The external worker.
    pub owner: Arc<dyn Worker>,
    /// The queue whose timestamps make the unit dirty.
    pub inbox: Inbox,
    /// Newest change the unit has not necessarily seen.
    pub last_update_time: Tick,
    /// Tick of the latest dispatch; `Tick::ZERO` if never dispatched.
    pub last_run_time: Tick,
    /// Recomputed by every work list build.
    pub needs_run: bool,
    /// Barrier flags assigned by the latest build.
    pub opts: BarrierFlags,
    /// Inactive units are never scheduled.
    pub active: bool,
    /// User-requested halt, honored at the next build.
    pub stopped: bool,
    /// Dirty on every tick while active.
    pub continuous: bool,
}

impl WorkUnit {
    fn new(id: UnitId, op: UnitOp, owner: Arc<dyn Worker>, inbox: Inbox) -> Self {
        Self {
            id,
            op,
            owner,
            inbox,
            last_update_time: Tick::ZERO,
            last_run_time: Tick::ZERO,
            needs_run: false,
            opts: BarrierFlags::CONTINUE,
            active: false,
            stopped: false,
            continuous: false,
        }
    }

    /// Pulls the inbox timestamp and recomputes `needs_run` as of `now`.
    pub fn refresh(&mut self, now: Tick) -> bool {
        let inbox_time = match &self.inbox {
            Inbox::None => Tick::ZERO,
            Inbox::Messages(queue) => queue.last_update_time(),
            Inbox::Requests(queue) => queue.last_update_time(),
        };
        self.last_update_time = self.last_update_time.max(inbox_time);
        self.opts = BarrierFlags::CONTINUE;

        let runnable = self.active
            && !self.stopped
            && self.owner.is_active()
            && !self.owner.user_stop();
        if runnable && (self.continuous || self.owner.is_continuous()) {
            self.last_update_time = self.last_update_time.max(now);
        }
        self.needs_run = runnable && self.last_update_time > self.last_run_time;
        self.needs_run
    }

    /// Marks a change at `tick` without going through the inbox.
    pub fn touch(&mut self, tick: Tick) {
        self.last_update_time = self.last_update_time.max(tick);
    }

    /// Dispatch arguments for this unit.
    pub fn args(&self, mirrors: &Arc<MirrorQueue>) -> UnitArgs {
        UnitArgs::new(self.op, self.inbox.clone(), Arc::clone(mirrors))
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("op", &self.op)
            .field("owner", &self.owner.name())
            .field("last_update_time", &self.last_update_time)
            .field("last_run_time", &self.last_run_time)
            .field("needs_run", &self.needs_run)
            .field("opts", &self.opts)
            .field("active", &self.active)
            .field("stopped", &self.stopped)
            .finish()
    }
}

/// The shared units of a universe.
#[derive(Debug, Clone)]
pub struct UniverseEntry {
    /// Structure updaters, in `StructureKind::ALL` order.
    pub structures: Vec<UnitId>,
    /// The behavior scheduler.
    pub behavior: UnitId,
    /// Registered views looking at this universe.
    pub views: BTreeSet<ViewId>,
    /// How many of those views are active.
    pub active_views: usize,
    /// Deliver `reset_conditions` on the behavior scheduler's next dispatch.
    pub reset_conditions: bool,
}

/// The units of a registered view.
#[derive(Debug, Clone)]
pub struct ViewEntry {
    /// The registration.
    pub spec: ViewSpec,
    /// One render unit per target.
    pub render: Vec<UnitId>,
    /// The swap unit; absent for off-screen-only views.
    pub swap: Option<UnitId>,
    /// The sound scheduler.
    pub sound: UnitId,
    /// The view's queues.
    pub queues: ViewQueues,
    /// Participates in scheduling.
    pub active: bool,
    /// Started; a stopped view keeps its units but does not render.
    pub running: bool,
    /// Effective minimum frame cycle.
    pub min_cycle_time: Duration,
}

/// A renderer shared by one or more views.
#[derive(Clone)]
pub struct RendererEntry {
    /// The renderer worker.
    pub worker: Arc<dyn Worker>,
    /// Services the request queue.
    pub deferred: UnitId,
    /// The request queue.
    pub queue: Arc<RendererRequestQueue>,
    /// Views with a target on this renderer.
    pub views: BTreeSet<ViewId>,
    /// Wait generation of the renderer's latest render-list entry.
    pub last_wait_generation: u64,
}

/// An input device poller shared by the views of a physical environment.
#[derive(Debug, Clone)]
pub struct PollerEntry {
    /// The poller unit.
    pub unit: UnitId,
    /// Attached views.
    pub views: BTreeSet<ViewId>,
}

/// Every unit the coordinator may schedule.
#[derive(Default)]
pub struct Registry {
    next_unit: u64,
    pub(crate) units: BTreeMap<UnitId, WorkUnit>,
    pub(crate) universes: BTreeMap<UniverseId, UniverseEntry>,
    pub(crate) views: BTreeMap<ViewId, ViewEntry>,
    pub(crate) renderers: BTreeMap<RendererId, RendererEntry>,
    pub(crate) pollers: BTreeMap<PhysicalEnvId, PollerEntry>,
    generation: u64,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.views.is_empty()
    }

    /// Number of live units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Bumped by every structural change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.generation += 1;
    }

    /// Adds an inactive unit and returns its fresh identifier.
    pub(crate) fn insert_unit(&mut self, op: UnitOp, owner: Arc<dyn Worker>, inbox: Inbox) -> UnitId {
        self.next_unit += 1;
        let id = UnitId(self.next_unit);
        log::trace!("Registry: {id} created for {}", owner.name());
        self.units.insert(id, WorkUnit::new(id, op, owner, inbox));
        self.mark_dirty();
        id
    }

    pub(crate) fn remove_unit(&mut self, id: UnitId) -> Option<WorkUnit> {
        let unit = self.units.remove(&id);
        if unit.is_some() {
            log::trace!("Registry: {id} destroyed");
            self.mark_dirty();
        }
        unit
    }

    pub(crate) fn unit_mut(&mut self, id: UnitId) -> Option<&mut WorkUnit> {
        self.units.get_mut(&id)
    }

    /// Sets `active` on every listed unit.
    pub(crate) fn set_active<'a, I>(&mut self, ids: I, active: bool)
    where
        I: IntoIterator<Item = &'a UnitId>,
    {
        for id in ids {
            if let Some(unit) = self.units.get_mut(id) {
                unit.active = active;
            }
        }
        self.mark_dirty();
    }

    /// Records a dispatch of `id` at `tick`.
    ///
    /// # Panics
    /// Panics if the unit does not exist: the work lists referenced a
    /// destroyed unit.
    pub(crate) fn mark_ran(&mut self, id: UnitId, tick: Tick) {
        match self.units.get_mut(&id) {
            Some(unit) => unit.last_run_time = unit.last_run_time.max(tick),
            None => {
                log::error!("Registry: dispatch requested for destroyed {id}");
                panic!("dispatch of destroyed work unit {id}");
            }
        }
    }

    /// Looks up a unit.
    pub fn unit(&self, id: UnitId) -> Option<&WorkUnit> {
        self.units.get(&id)
    }

    /// Every live unit, by identifier.
    pub fn units(&self) -> impl Iterator<Item = &WorkUnit> {
        self.units.values()
    }

    /// Looks up a universe.
    pub fn universe(&self, id: UniverseId) -> Option<&UniverseEntry> {
        self.universes.get(&id)
    }

    /// Looks up a view.
    pub fn view(&self, id: ViewId) -> Option<&ViewEntry> {
        self.views.get(&id)
    }

    /// Registered views, by identifier.
    pub fn views(&self) -> impl Iterator<Item = (&ViewId, &ViewEntry)> {
        self.views.iter()
    }

    /// Looks up a renderer.
    pub fn renderer(&self, id: RendererId) -> Option<&RendererEntry> {
        self.renderers.get(&id)
    }

    /// Looks up the poller of a physical environment.
    pub fn poller(&self, env: PhysicalEnvId) -> Option<&PollerEntry> {
        self.pollers.get(&env)
    }

    /// Whether any active unit renders or updates on every tick.
    pub fn has_continuous_work(&self) -> bool {
        self.units.values().any(|unit| {
            unit.active && !unit.stopped && (unit.continuous || unit.owner.is_continuous())
        })
    }

    /// The minimum frame cycles of the active, running views.
    pub fn active_min_cycles(&self) -> impl Iterator<Item = Duration> + '_ {
        self.views
            .values()
            .filter(|view| view.active && view.running)
            .map(|view| view.min_cycle_time)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("units", &self.units.len())
            .field("universes", &self.universes.len())
            .field("views", &self.views.len())
            .field("renderers", &self.renderers.len())
            .field("pollers", &self.pollers.len())
            .field("generation", &self.generation)
            .finish()
    }
}
