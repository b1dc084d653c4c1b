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

//! The contract between the scheduler and the workers it dispatches.
//!
//! A worker is anything the scheduler can run once per tick: a structure
//! updater, a behavior or sound scheduler, an input poller or a renderer. The
//! scheduler owns *when* a worker runs; the worker owns *what* running means.
//!
//! Workers run either inline on the coordinator thread ([`Worker::do_work`],
//! used when the concurrency budget is 1) or on their own thread
//! ([`Worker::run_async`]). An asynchronous run must end with its
//! [`Completion`] being completed or dropped; that is how the coordinator
//! learns the work is done.

use crate::flags::TargetMask;
use crate::ids::{PhysicalEnvId, RendererId, TargetId, UniverseId, UnitId, ViewId};
use crate::message::{MessageQueue, RendererRequestQueue};
use crate::mirror::MirrorQueue;
use crate::time::Tick;
use std::fmt;
use std::sync::Arc;

/// The per-universe structures that consume change messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StructureKind {
    /// Transform hierarchy updates; always runs before the other structures.
    Transform,
    /// Geometry and bounds.
    Geometry,
    /// Behavior bookkeeping.
    Behavior,
    /// Sound sources and soundscapes.
    Sound,
    /// Lights, fog, backgrounds and other environment nodes.
    RenderingEnvironment,
    /// Appearance and rendering attribute changes.
    RenderingAttributes,
}

impl StructureKind {
    /// Every structure kind, transform first.
    pub const ALL: [StructureKind; 6] = [
        StructureKind::Transform,
        StructureKind::Geometry,
        StructureKind::Behavior,
        StructureKind::Sound,
        StructureKind::RenderingEnvironment,
        StructureKind::RenderingAttributes,
    ];

    /// The target-mask bit routing messages to this structure.
    pub const fn mask(self) -> TargetMask {
        match self {
            StructureKind::Transform => TargetMask::TRANSFORM,
            StructureKind::Geometry => TargetMask::GEOMETRY,
            StructureKind::Behavior => TargetMask::BEHAVIOR,
            StructureKind::Sound => TargetMask::SOUND,
            StructureKind::RenderingEnvironment => TargetMask::RENDERING_ENVIRONMENT,
            StructureKind::RenderingAttributes => TargetMask::RENDERING_ATTRIBUTES,
        }
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructureKind::Transform => "Transform",
            StructureKind::Geometry => "Geometry",
            StructureKind::Behavior => "Behavior",
            StructureKind::Sound => "Sound",
            StructureKind::RenderingEnvironment => "RenderingEnvironment",
            StructureKind::RenderingAttributes => "RenderingAttributes",
        };
        f.write_str(name)
    }
}

/// Which pending counter a dispatch is accounted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Structure updaters, schedulers and input pollers.
    State,
    /// Render, swap and deferred renderer work.
    Render,
    /// The privileged renderer cleanup dispatch.
    Cleanup,
}

/// The operation a dispatch asks its worker to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOp {
    /// Apply queued changes to a universe structure.
    Structure {
        /// Owning universe.
        universe: UniverseId,
        /// Which structure.
        kind: StructureKind,
    },
    /// Evaluate the behaviors of a universe.
    BehaviorScheduler {
        /// Owning universe.
        universe: UniverseId,
        /// Set on the first run after the universe's first view activated;
        /// the scheduler must forget which wakeup conditions already fired.
        reset_conditions: bool,
    },
    /// Schedule sounds for a view.
    SoundScheduler {
        /// Owning view.
        view: ViewId,
    },
    /// Poll the input devices of a physical environment.
    InputPoller {
        /// Polled environment.
        env: PhysicalEnvId,
    },
    /// Draw one target of a view.
    Render {
        /// Rendered view.
        view: ViewId,
        /// Drawing target.
        target: TargetId,
        /// Renderer doing the drawing.
        renderer: RendererId,
    },
    /// Present the frame of a view.
    Swap {
        /// Presented view.
        view: ViewId,
        /// Renderer doing the presenting.
        renderer: RendererId,
    },
    /// Service the requests queued for a renderer.
    Deferred {
        /// Serviced renderer.
        renderer: RendererId,
    },
    /// Release the native resources of a renderer no view uses anymore.
    Cleanup {
        /// Renderer being torn down.
        renderer: RendererId,
    },
}

impl UnitOp {
    /// The pending counter this operation is accounted under.
    pub const fn category(&self) -> Category {
        match self {
            UnitOp::Structure { .. }
            | UnitOp::BehaviorScheduler { .. }
            | UnitOp::SoundScheduler { .. }
            | UnitOp::InputPoller { .. } => Category::State,
            UnitOp::Render { .. } | UnitOp::Swap { .. } | UnitOp::Deferred { .. } => {
                Category::Render
            }
            UnitOp::Cleanup { .. } => Category::Cleanup,
        }
    }

    /// The view this operation works for, if any.
    pub const fn view(&self) -> Option<ViewId> {
        match self {
            UnitOp::SoundScheduler { view }
            | UnitOp::Render { view, .. }
            | UnitOp::Swap { view, .. } => Some(*view),
            _ => None,
        }
    }

    /// The renderer this operation runs on, if any.
    pub const fn renderer(&self) -> Option<RendererId> {
        match self {
            UnitOp::Render { renderer, .. }
            | UnitOp::Swap { renderer, .. }
            | UnitOp::Deferred { renderer }
            | UnitOp::Cleanup { renderer } => Some(*renderer),
            _ => None,
        }
    }
}

/// Where a unit reads its input from.
#[derive(Debug, Clone, Default)]
pub enum Inbox {
    /// The unit has no queue.
    #[default]
    None,
    /// A change-message queue.
    Messages(Arc<MessageQueue>),
    /// A renderer request queue.
    Requests(Arc<RendererRequestQueue>),
}

/// The arguments handed to a worker with each dispatch.
#[derive(Debug, Clone)]
pub struct UnitArgs {
    /// What to do.
    pub op: UnitOp,
    /// The view whose frame-timing bracket closes with this dispatch.
    pub end_view: Option<ViewId>,
    /// The queue this unit drains or watches.
    pub inbox: Inbox,
    /// End-of-tick mirror updates.
    pub mirrors: Arc<MirrorQueue>,
}

impl UnitArgs {
    /// Creates arguments with no `end_view` stamp.
    pub fn new(op: UnitOp, inbox: Inbox, mirrors: Arc<MirrorQueue>) -> Self {
        Self {
            op,
            end_view: None,
            inbox,
            mirrors,
        }
    }

    /// The change-message queue, if the unit has one.
    pub fn messages(&self) -> Option<&Arc<MessageQueue>> {
        match &self.inbox {
            Inbox::Messages(queue) => Some(queue),
            _ => None,
        }
    }

    /// The renderer request queue, if the unit has one.
    pub fn requests(&self) -> Option<&Arc<RendererRequestQueue>> {
        match &self.inbox {
            Inbox::Requests(queue) => Some(queue),
            _ => None,
        }
    }
}

/// Receives completion notices for asynchronous dispatches.
pub trait CompletionSink: Send + Sync {
    /// Called exactly once per asynchronous dispatch.
    fn thread_done(&self, category: Category, unit: UnitId);
}

/// Proof of an outstanding asynchronous dispatch.
///
/// Completing the token reports the dispatch as finished. Dropping it
/// without completing (a worker panicked, or forgot) reports it too, so the
/// scheduler never waits forever on a unit that will not call back.
pub struct Completion {
    sink: Option<Arc<dyn CompletionSink>>,
    category: Category,
    unit: UnitId,
}

impl Completion {
    /// Creates a token reporting to `sink`.
    pub fn new(sink: Arc<dyn CompletionSink>, category: Category, unit: UnitId) -> Self {
        Self {
            sink: Some(sink),
            category,
            unit,
        }
    }

    /// The dispatched unit.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// The pending counter the dispatch is accounted under.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Reports the dispatch as finished.
    pub fn complete(mut self) {
        if let Some(sink) = self.sink.take() {
            sink.thread_done(self.category, self.unit);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            if std::thread::panicking() {
                log::warn!("{} panicked while running; reporting it done", self.unit);
            } else {
                log::warn!("{} completion dropped without being completed", self.unit);
            }
            sink.thread_done(self.category, self.unit);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("unit", &self.unit)
            .field("category", &self.category)
            .field("pending", &self.sink.is_some())
            .finish()
    }
}

/// A stateful unit of work the scheduler dispatches.
///
/// Implementations use interior mutability: the scheduler only ever holds
/// shared references and never dispatches the same unit twice concurrently.
pub trait Worker: Send + Sync {
    /// A name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Runs the work to completion on the calling thread.
    fn do_work(&self, tick: Tick, args: &UnitArgs);

    /// Hands the work to the worker's own thread.
    ///
    /// The default runs inline and completes immediately; workers with a
    /// thread of their own (see `WorkerThread` in `cadence-control`) forward
    /// the request instead.
    fn run_async(&self, tick: Tick, args: UnitArgs, done: Completion) {
        self.do_work(tick, &args);
        done.complete();
    }

    /// Inactive workers are skipped by the work list builder.
    fn is_active(&self) -> bool {
        true
    }

    /// A user-requested halt; honored at the next work list build.
    fn user_stop(&self) -> bool {
        false
    }

    /// Continuous workers are considered dirty on every tick.
    fn is_continuous(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        done: Mutex<Vec<(Category, UnitId)>>,
    }

    impl CompletionSink for RecordingSink {
        fn thread_done(&self, category: Category, unit: UnitId) {
            self.done.lock().push((category, unit));
        }
    }

    struct Noop;

    impl Worker for Noop {
        fn do_work(&self, _tick: Tick, _args: &UnitArgs) {}
    }

    #[test]
    fn test_completion_reports_once() {
        let sink = Arc::new(RecordingSink::default());
        let token = Completion::new(sink.clone(), Category::State, UnitId(3));
        token.complete();
        assert_eq!(*sink.done.lock(), vec![(Category::State, UnitId(3))]);
    }

    #[test]
    fn test_dropped_completion_still_reports() {
        let sink = Arc::new(RecordingSink::default());
        drop(Completion::new(sink.clone(), Category::Render, UnitId(1)));
        assert_eq!(sink.done.lock().len(), 1);
    }

    #[test]
    fn test_default_run_async_completes_inline() {
        let sink = Arc::new(RecordingSink::default());
        let args = UnitArgs::new(
            UnitOp::InputPoller {
                env: PhysicalEnvId(0),
            },
            Inbox::None,
            Arc::new(MirrorQueue::new()),
        );
        Noop.run_async(Tick::ZERO, args, Completion::new(sink.clone(), Category::State, UnitId(7)));
        assert_eq!(*sink.done.lock(), vec![(Category::State, UnitId(7))]);
    }

    #[test]
    fn test_op_classification() {
        let render = UnitOp::Render {
            view: ViewId(1),
            target: TargetId(0),
            renderer: RendererId(2),
        };
        assert_eq!(render.category(), Category::Render);
        assert_eq!(render.view(), Some(ViewId(1)));
        assert_eq!(render.renderer(), Some(RendererId(2)));

        let structure = UnitOp::Structure {
            universe: UniverseId(0),
            kind: StructureKind::Transform,
        };
        assert_eq!(structure.category(), Category::State);
        assert_eq!(structure.view(), None);
        assert_eq!(
            UnitOp::Cleanup {
                renderer: RendererId(0)
            }
            .category(),
            Category::Cleanup
        );
    }

    #[test]
    fn test_structure_masks_are_distinct() {
        let mut all = TargetMask::EMPTY;
        for kind in StructureKind::ALL {
            assert!(!all.intersects(kind.mask()), "{kind} overlaps");
            all |= kind.mask();
        }
        assert_eq!(all, TargetMask::STRUCTURES);
        assert_eq!(StructureKind::ALL[0], StructureKind::Transform);
    }
}
