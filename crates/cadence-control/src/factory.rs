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

//! How the scheduler obtains the workers it drives.

use cadence_core::{
    PhysicalEnvId, RendererId, StructureKind, TargetId, UniverseId, ViewId, Worker,
};
use std::sync::Arc;
use std::time::Duration;

/// Creates external workers on demand.
///
/// The lifecycle manager calls into the factory the first time a universe,
/// view, renderer or physical environment needs a worker, and drops the
/// worker again when nothing references it.
pub trait WorkerFactory: Send + Sync {
    /// The updater of one structure of a universe.
    fn structure(&self, universe: UniverseId, kind: StructureKind) -> Arc<dyn Worker>;

    /// The behavior scheduler of a universe.
    fn behavior_scheduler(&self, universe: UniverseId) -> Arc<dyn Worker>;

    /// The sound scheduler of a view.
    fn sound_scheduler(&self, view: ViewId) -> Arc<dyn Worker>;

    /// A renderer, shared by every view drawing through it.
    fn renderer(&self, renderer: RendererId) -> Arc<dyn Worker>;

    /// The input device poller of a physical environment.
    fn input_poller(&self, env: PhysicalEnvId) -> Arc<dyn Worker>;
}

/// One drawing surface of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    /// Target identifier, unique within the view.
    pub id: TargetId,
    /// Renderer drawing the target.
    pub renderer: RendererId,
    /// Off-screen targets render but are never presented.
    pub offscreen: bool,
}

/// Everything the scheduler needs to know about a view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSpec {
    /// View identifier.
    pub id: ViewId,
    /// Universe the view looks at.
    pub universe: UniverseId,
    /// Physical environment whose input devices drive the view.
    pub physical_env: PhysicalEnvId,
    /// Drawing surfaces; one render unit each.
    pub targets: Vec<RenderTarget>,
    /// Minimum frame cycle; `None` uses the scheduler default.
    pub min_cycle_time: Option<Duration>,
    /// Continuous views render every tick, dirty or not.
    pub continuous: bool,
}

impl ViewSpec {
    /// A view with no targets in the default physical environment.
    pub fn new(id: ViewId, universe: UniverseId) -> Self {
        Self {
            id,
            universe,
            physical_env: PhysicalEnvId(0),
            targets: Vec::new(),
            min_cycle_time: None,
            continuous: false,
        }
    }

    /// Adds an on-screen target.
    #[must_use]
    pub fn with_target(mut self, id: TargetId, renderer: RendererId) -> Self {
        self.targets.push(RenderTarget {
            id,
            renderer,
            offscreen: false,
        });
        self
    }

    /// Adds an off-screen target.
    #[must_use]
    pub fn with_offscreen_target(mut self, id: TargetId, renderer: RendererId) -> Self {
        self.targets.push(RenderTarget {
            id,
            renderer,
            offscreen: true,
        });
        self
    }

    /// Sets the physical environment.
    #[must_use]
    pub fn with_physical_env(mut self, env: PhysicalEnvId) -> Self {
        self.physical_env = env;
        self
    }

    /// Sets the minimum frame cycle.
    #[must_use]
    pub fn with_min_cycle_time(mut self, min: Duration) -> Self {
        self.min_cycle_time = Some(min);
        self
    }

    /// Renders every tick.
    #[must_use]
    pub fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    /// The renderer presenting the view: the one behind its first on-screen
    /// target, else behind its first target.
    pub fn swap_renderer(&self) -> Option<RendererId> {
        self.targets
            .iter()
            .find(|target| !target.offscreen)
            .or_else(|| self.targets.first())
            .map(|target| target.renderer)
    }

    /// Whether a swap unit is needed at all.
    pub fn presents(&self) -> bool {
        self.targets.iter().any(|target| !target.offscreen)
    }
}
