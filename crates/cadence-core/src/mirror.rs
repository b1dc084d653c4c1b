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

//! Deferred updates of mirror objects.
//!
//! Workers that keep a secondary copy of live state queue the copy-back here
//! while they run; the coordinator flushes the queue once every unit of the
//! tick has completed, so readers never observe a half-updated frame.

use parking_lot::Mutex;

/// A pending write-back of a mirror snapshot to its live counterpart.
pub trait MirrorObject: Send {
    /// Copies the snapshot into the live object.
    fn sync(&mut self);
}

impl<F> MirrorObject for F
where
    F: FnMut() + Send,
{
    fn sync(&mut self) {
        self()
    }
}

/// Mirror updates waiting for the end of the tick.
#[derive(Default)]
pub struct MirrorQueue {
    pending: Mutex<Vec<Box<dyn MirrorObject>>>,
}

impl MirrorQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an update for the end of the current tick.
    pub fn push(&self, update: Box<dyn MirrorObject>) {
        self.pending.lock().push(update);
    }

    /// Number of queued updates.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Applies every queued update, in submission order, outside the lock.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        let count = pending.len();
        for mut update in pending {
            update.sync();
        }
        count
    }
}

impl std::fmt::Debug for MirrorQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorQueue")
            .field("pending", &self.len())
            .finish()
    }
}
