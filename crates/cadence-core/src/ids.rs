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

//! Identifiers for the registration-scoped entities the scheduler tracks.

use std::fmt;

macro_rules! define_id {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// A universe: the owner of shared structure workers.
    UniverseId,
    "universe"
);
define_id!(
    /// A view: a rendering target with its own render/swap/sound cadence.
    ViewId,
    "view"
);
define_id!(
    /// A physical environment, which owns the input devices of its views.
    PhysicalEnvId,
    "env"
);
define_id!(
    /// A native renderer instance, possibly shared by several views.
    RendererId,
    "renderer"
);
define_id!(
    /// An on-screen or off-screen drawing target of a view.
    TargetId,
    "target"
);

/// Identifies one work unit in the scheduler's registry.
///
/// Unit ids are allocated from a monotonic counter and never reused, so a
/// unit torn down and recreated gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}
