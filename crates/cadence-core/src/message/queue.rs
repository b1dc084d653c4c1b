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

use super::{Message, RendererRequest};
use crate::flags::TargetMask;
use crate::ids::RendererId;
use crate::pool::ObjectPool;
use crate::time::Tick;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

/// Drops one reference of `message`; the last reference returns it to the pool.
///
/// The count can reach zero while another owner is still dropping its `Arc`,
/// so the recycling side is whichever caller ends up holding the last `Arc`.
pub fn release_message(message: Arc<Message>, pool: &ObjectPool) {
    let remaining = message.release_ref();
    let kind = message.kind;
    match Arc::into_inner(message) {
        Some(message) => pool.release(message),
        // Someone still holds a snapshot; the allocation is freed with it.
        None if remaining == 0 => {
            log::trace!("Message kind={kind} still shared at release, not recycled")
        }
        None => {}
    }
}

struct QueueInner {
    messages: VecDeque<Arc<Message>>,
    last_update_time: Tick,
}

/// The inbox of one worker category for one universe or view.
///
/// Producers push under the queue lock; the queue remembers the newest
/// timestamp it has seen so the work list builder can compare it against a
/// unit's last run time without touching the messages.
pub struct MessageQueue {
    target: TargetMask,
    pool: Arc<ObjectPool>,
    inner: Mutex<QueueInner>,
}

impl MessageQueue {
    /// Creates an empty queue for one target category.
    pub fn new(target: TargetMask, pool: Arc<ObjectPool>) -> Self {
        Self {
            target,
            pool,
            inner: Mutex::new(QueueInner {
                messages: VecDeque::new(),
                last_update_time: Tick::ZERO,
            }),
        }
    }

    /// The target category this queue serves.
    pub fn target(&self) -> TargetMask {
        self.target
    }

    /// Appends a message, taking one reference on it.
    pub fn push(&self, message: &Arc<Message>) {
        message.add_ref();
        let mut inner = self.inner.lock();
        inner.last_update_time = inner.last_update_time.max(message.timestamp());
        inner.messages.push_back(Arc::clone(message));
    }

    /// Marks the queue as updated at `tick` without delivering anything.
    pub fn touch(&self, tick: Tick) {
        let mut inner = self.inner.lock();
        inner.last_update_time = inner.last_update_time.max(tick);
    }

    /// The newest timestamp pushed or touched.
    pub fn last_update_time(&self) -> Tick {
        self.inner.lock().last_update_time
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Returns `true` if no message is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    /// Returns the messages stamped at or before `up_to` without consuming them.
    pub fn snapshot(&self, up_to: Tick) -> Vec<Arc<Message>> {
        self.inner
            .lock()
            .messages
            .iter()
            .take_while(|m| m.timestamp() <= up_to)
            .cloned()
            .collect()
    }

    /// Removes and returns the messages stamped at or before `up_to`.
    ///
    /// Each [`Delivery`] gives its reference back when dropped.
    pub fn consume(&self, up_to: Tick) -> Vec<Delivery> {
        let mut inner = self.inner.lock();
        let count = inner
            .messages
            .iter()
            .take_while(|m| m.timestamp() <= up_to)
            .count();
        inner
            .messages
            .drain(..count)
            .map(|message| Delivery {
                message: Some(message),
                pool: Arc::clone(&self.pool),
            })
            .collect()
    }

    /// Drops every queued message, releasing this queue's references.
    ///
    /// Returns the number of messages released.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.inner.lock().messages.drain(..).collect();
        let count = drained.len();
        for message in drained {
            release_message(message, &self.pool);
        }
        count
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MessageQueue")
            .field("target", &self.target)
            .field("len", &inner.messages.len())
            .field("last_update_time", &inner.last_update_time)
            .finish()
    }
}

/// A consumed message; releases its reference when dropped.
pub struct Delivery {
    message: Option<Arc<Message>>,
    pool: Arc<ObjectPool>,
}

impl Deref for Delivery {
    type Target = Message;

    fn deref(&self) -> &Message {
        match &self.message {
            Some(message) => message,
            None => unreachable!("delivery accessed after release"),
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            release_message(message, &self.pool);
        }
    }
}

struct RequestInner {
    requests: VecDeque<RendererRequest>,
    last_update_time: Tick,
}

/// Requests waiting for a renderer's deferred unit.
pub struct RendererRequestQueue {
    renderer: RendererId,
    pool: Arc<ObjectPool>,
    inner: Mutex<RequestInner>,
}

impl RendererRequestQueue {
    /// Creates an empty queue for one renderer.
    pub fn new(renderer: RendererId, pool: Arc<ObjectPool>) -> Self {
        Self {
            renderer,
            pool,
            inner: Mutex::new(RequestInner {
                requests: VecDeque::new(),
                last_update_time: Tick::ZERO,
            }),
        }
    }

    /// The renderer this queue feeds.
    pub fn renderer(&self) -> RendererId {
        self.renderer
    }

    /// Appends a stamped request.
    pub fn push(&self, request: RendererRequest) {
        let mut inner = self.inner.lock();
        inner.last_update_time = inner.last_update_time.max(request.timestamp());
        inner.requests.push_back(request);
    }

    /// The newest request timestamp.
    pub fn last_update_time(&self) -> Tick {
        self.inner.lock().last_update_time
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().requests.is_empty()
    }

    /// Removes the requests stamped at or before `up_to`.
    pub fn drain(&self, up_to: Tick) -> Vec<RendererRequest> {
        let mut inner = self.inner.lock();
        let count = inner
            .requests
            .iter()
            .take_while(|r| r.timestamp() <= up_to)
            .count();
        inner.requests.drain(..count).collect()
    }

    /// Hands a serviced request back to the pool.
    pub fn recycle(&self, request: RendererRequest) {
        self.pool.release(request);
    }

    /// Drops every queued request into the pool.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.inner.lock().requests.drain(..).collect();
        let count = drained.len();
        for request in drained {
            self.pool.release(request);
        }
        count
    }
}

impl std::fmt::Debug for RendererRequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererRequestQueue")
            .field("renderer", &self.renderer)
            .field("len", &self.len())
            .finish()
    }
}
