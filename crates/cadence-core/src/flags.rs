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

//! Flag sets carried by work units and messages.

use crate::cadence_bitflags;

cadence_bitflags! {
    /// Per-dispatch instructions the work list builder attaches to a unit.
    pub struct BarrierFlags: u8 {
        /// Dispatch and move on immediately.
        const CONTINUE = 0;
        /// Do not dispatch anything after this unit (in its category) until
        /// every unit dispatched so far has reported completion.
        const WAIT_ALL = 1 << 0;
        /// Begin the frame-timing bracket of the unit's view.
        const START_TIMER = 1 << 1;
        /// End the frame-timing bracket of the view stamped in `end_view`.
        const STOP_TIMER = 1 << 2;
        /// The final timing bracket of the render list.
        const LAST_STOP_TIMER = 1 << 3;
    }
}

cadence_bitflags! {
    /// Categories of worker queues a message is delivered to.
    pub struct TargetMask: u16 {
        /// Per-universe geometry structure.
        const GEOMETRY = 1 << 0;
        /// Per-universe transform structure.
        const TRANSFORM = 1 << 1;
        /// Per-universe behavior structure.
        const BEHAVIOR = 1 << 2;
        /// Per-universe sound structure.
        const SOUND = 1 << 3;
        /// Per-universe rendering environment structure.
        const RENDERING_ENVIRONMENT = 1 << 4;
        /// Per-universe rendering attributes structure.
        const RENDERING_ATTRIBUTES = 1 << 5;
        /// Per-view render queue.
        const RENDER = 1 << 6;
        /// Per-view sound scheduler queue.
        const SOUND_SCHEDULER = 1 << 7;
    }
}

impl TargetMask {
    /// Every per-universe structure category.
    pub const STRUCTURES: TargetMask = TargetMask::from_bits_retain(
        TargetMask::GEOMETRY.bits()
            | TargetMask::TRANSFORM.bits()
            | TargetMask::BEHAVIOR.bits()
            | TargetMask::SOUND.bits()
            | TargetMask::RENDERING_ENVIRONMENT.bits()
            | TargetMask::RENDERING_ATTRIBUTES.bits(),
    );

    /// Every per-view category.
    pub const VIEW_QUEUES: TargetMask = TargetMask::from_bits_retain(
        TargetMask::RENDER.bits() | TargetMask::SOUND_SCHEDULER.bits(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_flags_compose() {
        let flags = BarrierFlags::STOP_TIMER | BarrierFlags::WAIT_ALL;
        assert!(flags.contains(BarrierFlags::WAIT_ALL));
        assert!(!flags.contains(BarrierFlags::START_TIMER));
        assert_eq!(format!("{flags:?}"), "BarrierFlags(WAIT_ALL | STOP_TIMER)");
    }

    #[test]
    fn test_continue_is_no_barrier() {
        assert!(BarrierFlags::CONTINUE.is_empty());
        let flags = BarrierFlags::START_TIMER | BarrierFlags::CONTINUE;
        assert!(!flags.contains(BarrierFlags::WAIT_ALL));
    }

    #[test]
    fn test_structure_and_view_masks_are_disjoint() {
        assert!(!TargetMask::STRUCTURES.intersects(TargetMask::VIEW_QUEUES));
        assert!(TargetMask::STRUCTURES.contains(TargetMask::TRANSFORM));
        assert!(TargetMask::VIEW_QUEUES.contains(TargetMask::RENDER));
    }
}
