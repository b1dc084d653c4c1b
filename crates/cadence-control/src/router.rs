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

//! Fans timestamped change messages out to worker queues.
//!
//! The routing table maps universes to their structure queues, views to
//! their render and sound queues, and renderers to their request queues.
//! Only the coordinator edits the table; producers read it while holding the
//! time lock, so every queue sees messages in timestamp order.

use cadence_core::message::release_message;
use cadence_core::{
    Clock, Message, MessageQueue, ObjectPool, RendererId, RendererRequest, RendererRequestKind,
    RendererRequestQueue, StructureKind, TargetMask, Tick, UniverseId, ViewId,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The queues of one view.
#[derive(Debug, Clone)]
pub struct ViewQueues {
    /// Watched by the render units, consumed by the swap unit.
    pub render: Arc<MessageQueue>,
    /// Consumed by the sound scheduler.
    pub sound: Arc<MessageQueue>,
}

/// What happened to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOutcome {
    /// The tick the message (or batch) was stamped with.
    pub tick: Tick,
    /// Queue appends performed.
    pub deliveries: usize,
    /// Messages that matched no queue and went straight back to the pool.
    pub dropped: usize,
}

struct UniverseRoute {
    structures: Vec<(StructureKind, Arc<MessageQueue>)>,
    views: BTreeSet<ViewId>,
}

struct ViewRoute {
    universe: UniverseId,
    queues: ViewQueues,
}

#[derive(Default)]
struct RoutingTable {
    universes: BTreeMap<UniverseId, UniverseRoute>,
    views: BTreeMap<ViewId, ViewRoute>,
    renderers: BTreeMap<RendererId, Arc<RendererRequestQueue>>,
}

/// Stamps and delivers messages and renderer requests.
pub struct MessageRouter {
    pool: Arc<ObjectPool>,
    table: RwLock<RoutingTable>,
}

impl MessageRouter {
    /// Creates a router with an empty table.
    pub fn new(pool: Arc<ObjectPool>) -> Self {
        Self {
            pool,
            table: RwLock::new(RoutingTable::default()),
        }
    }

    /// The pool messages are drawn from and recycled into.
    pub fn pool(&self) -> &Arc<ObjectPool> {
        &self.pool
    }

    /// Takes a blank message from the pool.
    pub fn message(&self, kind: u32, target_mask: TargetMask) -> Message {
        let mut message: Message = self.pool.acquire();
        message.kind = kind;
        message.target_mask = target_mask;
        message
    }

    /// Takes a blank renderer request from the pool.
    pub fn request(&self, kind: RendererRequestKind) -> RendererRequest {
        let mut request: RendererRequest = self.pool.acquire();
        request.kind = kind;
        request
    }

    /// Stamps `message` with a fresh tick and delivers it.
    pub fn post(&self, clock: &Clock, mut message: Message) -> RouteOutcome {
        let mut time = clock.lock();
        let tick = time.issue();
        message.stamp(tick);
        let table = self.table.read();
        let deliveries = self.deliver(&table, message);
        RouteOutcome {
            tick,
            deliveries,
            dropped: usize::from(deliveries == 0),
        }
    }

    /// Stamps every message with one shared tick, then delivers them in order.
    pub fn post_batch<I>(&self, clock: &Clock, messages: I) -> RouteOutcome
    where
        I: IntoIterator<Item = Message>,
    {
        let mut time = clock.lock();
        let tick = time.issue();
        let table = self.table.read();
        let mut outcome = RouteOutcome {
            tick,
            deliveries: 0,
            dropped: 0,
        };
        for mut message in messages {
            message.stamp(tick);
            let deliveries = self.deliver(&table, message);
            outcome.deliveries += deliveries;
            outcome.dropped += usize::from(deliveries == 0);
        }
        outcome
    }

    /// Stamps `request` and appends it to the renderer's queue.
    ///
    /// Returns `false` (and recycles the request) if the renderer is unknown.
    pub fn post_request(
        &self,
        clock: &Clock,
        renderer: RendererId,
        mut request: RendererRequest,
    ) -> bool {
        let mut time = clock.lock();
        let Some(queue) = self.renderer_queue(renderer) else {
            drop(time);
            log::warn!("MessageRouter: request for unknown {renderer} dropped");
            self.pool.release(request);
            return false;
        };
        request.stamp(time.issue());
        queue.push(request);
        true
    }

    // A guard reference is held until fan-out ends; only then may the last
    // consumer recycle the message.
    fn deliver(&self, table: &RoutingTable, message: Message) -> usize {
        let message = Arc::new(message);
        message.add_ref();
        let deliveries = Self::route(table, &message);
        if deliveries == 0 {
            log::trace!(
                "MessageRouter: message kind={} mask={:?} matched no queue",
                message.kind,
                message.target_mask
            );
        }
        release_message(message, &self.pool);
        deliveries
    }

    fn route(table: &RoutingTable, message: &Arc<Message>) -> usize {
        let mask = message.target_mask;
        let mut deliveries = 0;

        if mask.intersects(TargetMask::STRUCTURES) {
            let universe = message.universe.or_else(|| {
                message
                    .view
                    .and_then(|view| table.views.get(&view))
                    .map(|route| route.universe)
            });
            if let Some(route) = universe.and_then(|u| table.universes.get(&u)) {
                for (kind, queue) in &route.structures {
                    if mask.contains(kind.mask()) {
                        queue.push(message);
                        deliveries += 1;
                    }
                }
            }
        }

        if mask.intersects(TargetMask::VIEW_QUEUES) {
            let mut deliver = |route: &ViewRoute| {
                if mask.contains(TargetMask::RENDER) {
                    route.queues.render.push(message);
                    deliveries += 1;
                }
                if mask.contains(TargetMask::SOUND_SCHEDULER) {
                    route.queues.sound.push(message);
                    deliveries += 1;
                }
            };
            match (message.view, message.universe) {
                (Some(view), _) => {
                    if let Some(route) = table.views.get(&view) {
                        deliver(route);
                    }
                }
                (None, Some(universe)) => {
                    if let Some(universe) = table.universes.get(&universe) {
                        for view in &universe.views {
                            if let Some(route) = table.views.get(view) {
                                deliver(route);
                            }
                        }
                    }
                }
                (None, None) => table.views.values().for_each(deliver),
            }
        }

        deliveries
    }

    /// Creates the structure queues of a universe, or returns the existing ones.
    pub fn add_universe(&self, universe: UniverseId) -> Vec<(StructureKind, Arc<MessageQueue>)> {
        let mut table = self.table.write();
        let route = table.universes.entry(universe).or_insert_with(|| UniverseRoute {
            structures: StructureKind::ALL
                .iter()
                .map(|&kind| {
                    let queue = MessageQueue::new(kind.mask(), Arc::clone(&self.pool));
                    (kind, Arc::new(queue))
                })
                .collect(),
            views: BTreeSet::new(),
        });
        route.structures.clone()
    }

    /// Drops a universe's queues and releases what they still held.
    pub fn remove_universe(&self, universe: UniverseId) -> usize {
        let route = self.table.write().universes.remove(&universe);
        route.map_or(0, |route| {
            route.structures.iter().map(|(_, queue)| queue.clear()).sum()
        })
    }

    /// The structure queue of `kind` in `universe`.
    pub fn universe_queue(
        &self,
        universe: UniverseId,
        kind: StructureKind,
    ) -> Option<Arc<MessageQueue>> {
        self.table
            .read()
            .universes
            .get(&universe)?
            .structures
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, queue)| Arc::clone(queue))
    }

    /// Creates the queues of a view inside an existing universe.
    ///
    /// Returns `None` if the universe has no route yet.
    pub fn add_view(&self, view: ViewId, universe: UniverseId) -> Option<ViewQueues> {
        let mut table = self.table.write();
        table.universes.get_mut(&universe)?.views.insert(view);
        let queues = ViewQueues {
            render: Arc::new(MessageQueue::new(TargetMask::RENDER, Arc::clone(&self.pool))),
            sound: Arc::new(MessageQueue::new(
                TargetMask::SOUND_SCHEDULER,
                Arc::clone(&self.pool),
            )),
        };
        table.views.insert(
            view,
            ViewRoute {
                universe,
                queues: queues.clone(),
            },
        );
        Some(queues)
    }

    /// Drops a view's queues and releases what they still held.
    pub fn remove_view(&self, view: ViewId) -> usize {
        let mut table = self.table.write();
        let Some(route) = table.views.remove(&view) else {
            return 0;
        };
        if let Some(universe) = table.universes.get_mut(&route.universe) {
            universe.views.remove(&view);
        }
        drop(table);
        route.queues.render.clear() + route.queues.sound.clear()
    }

    /// The queues of `view`.
    pub fn view_queues(&self, view: ViewId) -> Option<ViewQueues> {
        self.table
            .read()
            .views
            .get(&view)
            .map(|route| route.queues.clone())
    }

    /// Creates the request queue of a renderer, or returns the existing one.
    pub fn add_renderer(&self, renderer: RendererId) -> Arc<RendererRequestQueue> {
        let mut table = self.table.write();
        let queue = table.renderers.entry(renderer).or_insert_with(|| {
            Arc::new(RendererRequestQueue::new(renderer, Arc::clone(&self.pool)))
        });
        Arc::clone(queue)
    }

    /// Drops a renderer's request queue, recycling pending requests.
    pub fn remove_renderer(&self, renderer: RendererId) -> usize {
        let queue = self.table.write().renderers.remove(&renderer);
        queue.map_or(0, |queue| queue.clear())
    }

    /// The request queue of `renderer`.
    pub fn renderer_queue(&self, renderer: RendererId) -> Option<Arc<RendererRequestQueue>> {
        self.table.read().renderers.get(&renderer).cloned()
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("MessageRouter")
            .field("universes", &table.universes.len())
            .field("views", &table.views.len())
            .field("renderers", &table.renderers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::PoolKind;

    fn router_with_views(views: &[u32]) -> MessageRouter {
        let router = MessageRouter::new(Arc::new(ObjectPool::new(true, 16)));
        router.add_universe(UniverseId(0));
        for &view in views {
            router.add_view(ViewId(view), UniverseId(0)).unwrap();
        }
        router
    }

    #[test]
    fn test_fan_out_counts_references() {
        let clock = Clock::new();
        let router = router_with_views(&[1, 2]);
        let message = router
            .message(1, TargetMask::TRANSFORM | TargetMask::RENDER)
            .with_universe(UniverseId(0));

        let outcome = router.post(&clock, message);
        assert_eq!(outcome.deliveries, 3);
        assert_eq!(outcome.dropped, 0);

        let transform = router
            .universe_queue(UniverseId(0), StructureKind::Transform)
            .unwrap();
        let seen = transform.snapshot(outcome.tick);
        assert_eq!(seen[0].ref_count(), 3);
        assert_eq!(seen[0].timestamp(), outcome.tick);
        let geometry = router
            .universe_queue(UniverseId(0), StructureKind::Geometry)
            .unwrap();
        assert!(geometry.is_empty());
    }

    #[test]
    fn test_unmatched_message_is_recycled() {
        let clock = Clock::new();
        let router = router_with_views(&[]);
        let message = router.message(1, TargetMask::RENDER).with_view(ViewId(9));
        let outcome = router.post(&clock, message);
        assert_eq!(outcome.deliveries, 0);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(router.pool().stats(PoolKind::Message).free, 1);
    }

    #[test]
    fn test_view_addressing_beats_broadcast() {
        let clock = Clock::new();
        let router = router_with_views(&[1, 2]);
        router.post(&clock, router.message(0, TargetMask::RENDER).with_view(ViewId(2)));

        assert!(router.view_queues(ViewId(1)).unwrap().render.is_empty());
        assert_eq!(router.view_queues(ViewId(2)).unwrap().render.len(), 1);
    }

    #[test]
    fn test_unaddressed_view_message_reaches_every_view() {
        let clock = Clock::new();
        let router = router_with_views(&[1]);
        router.add_universe(UniverseId(5));
        router.add_view(ViewId(7), UniverseId(5)).unwrap();

        let outcome = router.post(&clock, router.message(0, TargetMask::SOUND_SCHEDULER));
        assert_eq!(outcome.deliveries, 2);
        assert_eq!(router.view_queues(ViewId(7)).unwrap().sound.len(), 1);
    }

    #[test]
    fn test_structure_message_resolves_universe_from_view() {
        let clock = Clock::new();
        let router = router_with_views(&[1]);
        let outcome = router.post(&clock, router.message(0, TargetMask::GEOMETRY).with_view(ViewId(1)));
        assert_eq!(outcome.deliveries, 1);
    }

    #[test]
    fn test_batch_shares_one_tick() {
        let clock = Clock::new();
        let router = router_with_views(&[1]);
        let batch = vec![
            router.message(1, TargetMask::TRANSFORM).with_universe(UniverseId(0)),
            router.message(2, TargetMask::GEOMETRY).with_universe(UniverseId(0)),
        ];
        let outcome = router.post_batch(&clock, batch);
        assert_eq!(outcome.deliveries, 2);

        let transform = router.universe_queue(UniverseId(0), StructureKind::Transform).unwrap();
        let geometry = router.universe_queue(UniverseId(0), StructureKind::Geometry).unwrap();
        assert_eq!(transform.last_update_time(), outcome.tick);
        assert_eq!(geometry.last_update_time(), outcome.tick);
        assert_eq!(clock.current(), outcome.tick);
    }

    #[test]
    fn test_removing_view_releases_queued_messages() {
        let clock = Clock::new();
        let router = router_with_views(&[1]);
        router.post(&clock, router.message(0, TargetMask::RENDER).with_view(ViewId(1)));
        assert_eq!(router.remove_view(ViewId(1)), 1);
        assert!(router.view_queues(ViewId(1)).is_none());
        assert_eq!(router.pool().stats(PoolKind::Message).released, 1);
        assert_eq!(router.remove_view(ViewId(1)), 0);
    }

    #[test]
    fn test_requests_for_unknown_renderer_are_recycled() {
        let clock = Clock::new();
        let router = router_with_views(&[]);
        let request = router.request(RendererRequestKind::QueryGraphicsConfig);
        assert!(!router.post_request(&clock, RendererId(3), request));

        let queue = router.add_renderer(RendererId(3));
        let request = router.request(RendererRequestKind::Custom(1));
        assert!(router.post_request(&clock, RendererId(3), request));
        assert_eq!(queue.len(), 1);
        assert_eq!(router.remove_renderer(RendererId(3)), 1);
    }
}
