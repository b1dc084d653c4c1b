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

//! The logical tick counter every ordered state mutation is stamped with.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;

/// A point on the scheduler's logical timeline.
///
/// Ticks are opaque and strictly increasing: the [`Clock`] never issues the
/// same value twice. `Tick::ZERO` precedes every issued tick and is the
/// "never ran" / "never updated" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(u64);

impl Tick {
    /// The tick that precedes every issued tick.
    pub const ZERO: Tick = Tick(0);

    /// Returns the raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Monotonic tick source guarded by the time lock.
#[derive(Debug)]
pub struct Clock {
    next: Mutex<u64>,
}

impl Clock {
    /// Creates a clock whose first issued tick is `t1`.
    pub fn new() -> Self {
        Self {
            next: Mutex::new(1),
        }
    }

    /// Issues a fresh tick.
    pub fn advance(&self) -> Tick {
        self.lock().issue()
    }

    /// The most recently issued tick, or `Tick::ZERO` if none was issued.
    pub fn current(&self) -> Tick {
        Tick(*self.next.lock() - 1)
    }

    /// Holds the time lock so several operations can be ordered under one
    /// critical section, e.g. stamping a message and enqueueing it.
    pub fn lock(&self) -> TimeGuard<'_> {
        TimeGuard {
            next: self.next.lock(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the clock while held.
pub struct TimeGuard<'a> {
    next: MutexGuard<'a, u64>,
}

impl TimeGuard<'_> {
    /// Issues a fresh tick.
    pub fn issue(&mut self) -> Tick {
        let tick = Tick(*self.next);
        *self.next += 1;
        tick
    }
}
