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

//! # Cadence Core
//!
//! Foundational crate containing the types and interface contracts shared by
//! the frame coordination scheduler and the workers it drives.
//!
//! Nothing in here schedules anything: the tick [`Clock`], the change
//! [`Message`] and its [`MessageQueue`], the typed [`ObjectPool`] and the
//! [`Worker`] contract are the vocabulary `cadence-control` is written in.

#![warn(missing_docs)]

pub mod flags;
pub mod ids;
pub mod message;
pub mod mirror;
pub mod pool;
pub mod time;
pub mod utils;
pub mod worker;

pub use flags::{BarrierFlags, TargetMask};
pub use ids::{PhysicalEnvId, RendererId, TargetId, UniverseId, UnitId, ViewId};
pub use message::{
    Delivery, Message, MessageQueue, Payload, RendererRequest, RendererRequestKind,
    RendererRequestQueue,
};
pub use mirror::{MirrorObject, MirrorQueue};
pub use pool::{ObjectPool, PoolKind, PoolStats, Pooled};
pub use time::{Clock, Tick};
pub use utils::timer::Stopwatch;
pub use worker::{
    Category, Completion, CompletionSink, Inbox, StructureKind, UnitArgs, UnitOp, Worker,
};
