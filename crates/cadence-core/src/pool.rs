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

//! Typed free lists for the objects the scheduler recycles every tick.
//!
//! The pool is keyed by [`PoolKind`]: each pooled type declares its kind and
//! how to reset itself, and [`ObjectPool`] keeps one free list per kind. With
//! pooling disabled every `acquire` allocates fresh and every `release`
//! simply drops the object.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;

/// The kinds of objects kept in free lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolKind {
    /// Change messages routed to worker queues.
    Message,
    /// Requests queued for a renderer's deferred unit.
    RendererRequest,
}

/// A type that can live in an [`ObjectPool`].
pub trait Pooled: Default + Send + 'static {
    /// The free list this type is kept in.
    const KIND: PoolKind;

    /// Clears any state so the object can be handed out again.
    fn reset(&mut self);
}

/// Counters describing one free list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects created because the free list was empty (or pooling is off).
    pub allocated: u64,
    /// Objects handed out from the free list.
    pub reused: u64,
    /// Objects returned and kept for reuse.
    pub released: u64,
    /// Objects returned but dropped (pool full or disabled).
    pub dropped: u64,
    /// Objects currently waiting in the free list.
    pub free: usize,
}

#[derive(Default)]
struct FreeList {
    items: Vec<Box<dyn Any + Send>>,
    stats: PoolStats,
}

/// Free lists keyed by [`PoolKind`].
pub struct ObjectPool {
    enabled: bool,
    capacity: usize,
    lists: Mutex<HashMap<PoolKind, FreeList>>,
}

impl ObjectPool {
    /// Creates a pool retaining at most `capacity` objects per kind.
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity,
            lists: Mutex::new(HashMap::new()),
        }
    }

    /// Whether released objects are kept for reuse.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Takes an object from the free list of `T`'s kind, or allocates one.
    pub fn acquire<T: Pooled>(&self) -> T {
        if self.enabled {
            let mut lists = self.lists.lock();
            let list = lists.entry(T::KIND).or_default();
            if let Some(boxed) = list.items.pop() {
                match boxed.downcast::<T>() {
                    Ok(obj) => {
                        list.stats.reused += 1;
                        return *obj;
                    }
                    Err(_) => {
                        log::warn!("ObjectPool: {:?} free list held a foreign type", T::KIND);
                    }
                }
            }
            list.stats.allocated += 1;
            return T::default();
        }

        self.lists.lock().entry(T::KIND).or_default().stats.allocated += 1;
        T::default()
    }

    /// Returns an object to its free list.
    pub fn release<T: Pooled>(&self, mut obj: T) {
        let mut lists = self.lists.lock();
        let list = lists.entry(T::KIND).or_default();
        if self.enabled && list.items.len() < self.capacity {
            obj.reset();
            list.items.push(Box::new(obj));
            list.stats.released += 1;
        } else {
            list.stats.dropped += 1;
        }
    }

    /// Trims every free list down to half the capacity.
    ///
    /// Returns the number of objects dropped.
    pub fn sweep(&self) -> usize {
        let retain = self.capacity / 2;
        let mut trimmed = 0;
        for list in self.lists.lock().values_mut() {
            if list.items.len() > retain {
                trimmed += list.items.len() - retain;
                list.items.truncate(retain);
            }
        }
        if trimmed > 0 {
            log::debug!("ObjectPool: swept {trimmed} idle objects");
        }
        trimmed
    }

    /// Returns the counters of one free list.
    pub fn stats(&self, kind: PoolKind) -> PoolStats {
        self.lists
            .lock()
            .get(&kind)
            .map(|list| PoolStats {
                free: list.items.len(),
                ..list.stats
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("enabled", &self.enabled)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
