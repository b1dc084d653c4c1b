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

//! Change messages and the queues that deliver them to workers.
//!
//! A [`Message`] is stamped with a [`Tick`] by the router and shared by every
//! queue it was delivered to. Each delivery holds one reference; when the
//! last consumer lets go the message goes back to the [`ObjectPool`].
//!
//! [`ObjectPool`]: crate::pool::ObjectPool

mod queue;

pub use self::queue::{release_message, Delivery, MessageQueue, RendererRequestQueue};

use crate::flags::TargetMask;
use crate::ids::{TargetId, UniverseId, ViewId};
use crate::pool::{PoolKind, Pooled};
use crate::time::Tick;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Owner-defined message contents.
pub type Payload = Box<dyn Any + Send + Sync>;

/// A timestamped change notification routed to one or more worker queues.
#[derive(Default)]
pub struct Message {
    /// Owner-defined message kind.
    pub kind: u32,
    /// The worker categories this message targets.
    pub target_mask: TargetMask,
    /// Universe whose structures (and, absent `view`, whose views) receive it.
    pub universe: Option<UniverseId>,
    /// View whose render/sound queues receive it.
    pub view: Option<ViewId>,
    /// Owner-defined contents.
    pub payload: Option<Payload>,
    timestamp: Tick,
    ref_count: AtomicU32,
}

impl Message {
    /// Creates an unstamped message.
    pub fn new(kind: u32, target_mask: TargetMask) -> Self {
        Self {
            kind,
            target_mask,
            ..Default::default()
        }
    }

    /// Addresses the message to a universe.
    #[must_use]
    pub fn with_universe(mut self, universe: UniverseId) -> Self {
        self.universe = Some(universe);
        self
    }

    /// Addresses the message to a single view.
    #[must_use]
    pub fn with_view(mut self, view: ViewId) -> Self {
        self.view = Some(view);
        self
    }

    /// Attaches owner-defined contents.
    #[must_use]
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Downcasts the payload.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    /// The tick the router stamped this message with.
    pub fn timestamp(&self) -> Tick {
        self.timestamp
    }

    /// Stamps the message. Only the router should call this, under the time lock.
    pub fn stamp(&mut self, tick: Tick) {
        self.timestamp = tick;
    }

    /// Number of outstanding deliveries.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Adds one reference and returns the new count.
    pub fn add_ref(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference and returns the remaining count.
    ///
    /// # Panics
    /// Panics if the count is already zero: a message was released more often
    /// than it was delivered.
    pub fn release_ref(&self) -> u32 {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            log::error!("Message kind={} released with no outstanding reference", self.kind);
            panic!("message reference count underflow (kind={})", self.kind);
        }
        previous - 1
    }
}

impl Pooled for Message {
    const KIND: PoolKind = PoolKind::Message;

    fn reset(&mut self) {
        self.kind = 0;
        self.target_mask = TargetMask::EMPTY;
        self.universe = None;
        self.view = None;
        self.payload = None;
        self.timestamp = Tick::ZERO;
        *self.ref_count.get_mut() = 0;
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("target_mask", &self.target_mask)
            .field("universe", &self.universe)
            .field("view", &self.view)
            .field("timestamp", &self.timestamp)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// What a renderer is asked to do outside of its render/swap work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendererRequestKind {
    /// Query the renderer's graphics configuration.
    #[default]
    QueryGraphicsConfig,
    /// Enable the given graphics configuration feature bits.
    SetGraphicsConfigFeatures(u64),
    /// Re-examine a drawing target (resize, visibility change).
    ReevaluateCanvas(TargetId),
    /// Owner-defined request.
    Custom(u32),
}

/// A request serviced by a renderer's deferred unit.
#[derive(Default)]
pub struct RendererRequest {
    /// What to do.
    pub kind: RendererRequestKind,
    /// Owner-defined contents (e.g. a reply channel).
    pub payload: Option<Payload>,
    timestamp: Tick,
}

impl RendererRequest {
    /// Creates an unstamped request.
    pub fn new(kind: RendererRequestKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Attaches owner-defined contents.
    #[must_use]
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Downcasts the payload.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    /// The tick the request was posted at.
    pub fn timestamp(&self) -> Tick {
        self.timestamp
    }

    /// Stamps the request.
    pub fn stamp(&mut self, tick: Tick) {
        self.timestamp = tick;
    }
}

impl Pooled for RendererRequest {
    const KIND: PoolKind = PoolKind::RendererRequest;

    fn reset(&mut self) {
        self.kind = RendererRequestKind::default();
        self.payload = None;
        self.timestamp = Tick::ZERO;
    }
}

impl fmt::Debug for RendererRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererRequest")
            .field("kind", &self.kind)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
