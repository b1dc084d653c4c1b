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

//! The coordinator's monitor.
//!
//! One lock guards the scheduling state and the pending counters. Each
//! reason to block has its own condition variable: new work while sleeping,
//! a free slot while the budget is exhausted, drained counters at a barrier,
//! and the end of a renderer cleanup. Every wait re-checks its condition on
//! wake, so a spurious wake is never taken for the awaited event.

use cadence_core::{Category, CompletionSink, UnitId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;

/// What the coordinator is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Blocked until work is posted.
    Sleeping,
    /// Building or walking the work lists.
    Running,
    /// Blocked at a barrier or at the end of the tick.
    WaitingForThreads,
    /// Blocked because the concurrency budget is exhausted.
    WaitingForCpu,
    /// Blocked on a renderer cleanup.
    WaitingForRendererCleanup,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
struct MonitorState {
    state: CoordinatorState,
    work_pending: bool,
    pending_state: u32,
    pending_render: u32,
    state_waiting: bool,
    render_waiting: bool,
    cpu_limit: u32,
    max_in_flight: u32,
    cleanup_done: bool,
    coordinator_alive: bool,
    shutdown: bool,
}

/// Monitor shared by the coordinator, producers and worker threads.
pub struct Monitor {
    inner: Mutex<MonitorState>,
    work_cv: Condvar,
    cpu_cv: Condvar,
    barrier_cv: Condvar,
    cleanup_cv: Condvar,
}

impl Monitor {
    /// Creates a sleeping monitor.
    pub fn new(cpu_limit: u32) -> Self {
        Self {
            inner: Mutex::new(MonitorState {
                state: CoordinatorState::Sleeping,
                work_pending: false,
                pending_state: 0,
                pending_render: 0,
                state_waiting: false,
                render_waiting: false,
                cpu_limit: cpu_limit.max(1),
                max_in_flight: 0,
                cleanup_done: true,
                coordinator_alive: false,
                shutdown: false,
            }),
            work_cv: Condvar::new(),
            cpu_cv: Condvar::new(),
            barrier_cv: Condvar::new(),
            cleanup_cv: Condvar::new(),
        }
    }

    /// CHECK_FOR_WORK: blocks while no work is flagged, then clears the flag.
    ///
    /// Returns `false` once the scheduler shuts down.
    pub fn check_for_work(&self) -> bool {
        let mut inner = self.inner.lock();
        while !inner.work_pending && !inner.shutdown {
            inner.state = CoordinatorState::Sleeping;
            self.work_cv.wait(&mut inner);
        }
        if inner.shutdown {
            return false;
        }
        inner.work_pending = false;
        inner.state = CoordinatorState::Running;
        true
    }

    /// Clears the work flag without blocking. Returns whether it was set.
    pub fn take_work(&self) -> bool {
        std::mem::take(&mut self.inner.lock().work_pending)
    }

    /// SET_WORK: flags work and wakes a sleeping or budget-blocked coordinator.
    pub fn set_work(&self) {
        let mut inner = self.inner.lock();
        inner.work_pending = true;
        match inner.state {
            CoordinatorState::Sleeping => {
                self.work_cv.notify_one();
            }
            CoordinatorState::WaitingForCpu => {
                self.cpu_cv.notify_one();
            }
            _ => {}
        }
    }

    /// SET_WORK_FOR_RENDERER: a renderer request was queued.
    pub fn set_work_for_renderer(&self) {
        log::trace!("Monitor: renderer work posted");
        self.set_work();
    }

    /// THREAD_DONE: accounts for a finished asynchronous dispatch.
    ///
    /// # Panics
    /// Panics if the category has no outstanding dispatch.
    pub fn thread_done(&self, category: Category, unit: UnitId) {
        let mut inner = self.inner.lock();
        match category {
            Category::State => {
                inner.pending_state = decrement(inner.pending_state, category, unit);
                if inner.pending_state == 0 {
                    inner.state_waiting = false;
                }
            }
            Category::Render => {
                inner.pending_render = decrement(inner.pending_render, category, unit);
                if inner.pending_render == 0 {
                    inner.render_waiting = false;
                }
            }
            Category::Cleanup => {
                inner.cleanup_done = true;
                self.cleanup_cv.notify_one();
                return;
            }
        }
        log::trace!("Monitor: {unit} done ({category:?})");
        self.cpu_cv.notify_one();
        self.barrier_cv.notify_one();
    }

    /// Takes the monitor lock for a dispatch decision.
    pub(crate) fn lock(&self) -> MonitorGuard<'_> {
        MonitorGuard {
            monitor: self,
            inner: self.inner.lock(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        self.inner.lock().state
    }

    /// Outstanding asynchronous dispatches.
    pub fn in_flight(&self) -> u32 {
        let inner = self.inner.lock();
        inner.pending_state + inner.pending_render
    }

    /// The concurrency budget.
    pub fn cpu_limit(&self) -> u32 {
        self.inner.lock().cpu_limit
    }

    /// Changes the concurrency budget; zero is clamped to one.
    pub fn set_cpu_limit(&self, limit: u32) {
        self.inner.lock().cpu_limit = limit.max(1);
        self.cpu_cv.notify_one();
    }

    /// Starts a tick: clears the in-flight high-water mark.
    pub(crate) fn begin_tick(&self) {
        let mut inner = self.inner.lock();
        inner.state = CoordinatorState::Running;
        inner.max_in_flight = 0;
    }

    /// Ends a tick and returns the in-flight high-water mark.
    ///
    /// The coordinator goes back to sleep unless more work was posted.
    pub(crate) fn end_tick(&self) -> u32 {
        let mut inner = self.inner.lock();
        if !inner.work_pending {
            inner.state = CoordinatorState::Sleeping;
        }
        inner.max_in_flight
    }

    /// Arms the cleanup handshake before a cleanup dispatch.
    pub(crate) fn begin_cleanup(&self) {
        let mut inner = self.inner.lock();
        inner.cleanup_done = false;
        inner.state = CoordinatorState::WaitingForRendererCleanup;
    }

    /// Blocks until the armed cleanup reports done.
    pub(crate) fn wait_for_cleanup(&self) {
        let mut inner = self.inner.lock();
        while !inner.cleanup_done {
            self.cleanup_cv.wait(&mut inner);
        }
        inner.state = CoordinatorState::Running;
    }

    /// Claims the right to run a coordinator thread.
    ///
    /// Returns `true` if no coordinator was alive and the caller must start one.
    pub(crate) fn claim_coordinator(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.coordinator_alive || inner.shutdown {
            return false;
        }
        inner.coordinator_alive = true;
        true
    }

    /// Gives up the coordinator role if `idle` still holds under the lock.
    pub(crate) fn retire_if(&self, idle: impl FnOnce() -> bool) -> bool {
        let mut inner = self.inner.lock();
        if !inner.shutdown && !idle() {
            return false;
        }
        inner.coordinator_alive = false;
        inner.state = CoordinatorState::Sleeping;
        true
    }

    /// Whether a coordinator thread currently holds the role.
    pub fn coordinator_alive(&self) -> bool {
        self.inner.lock().coordinator_alive
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    /// Requests shutdown and wakes every wait.
    pub(crate) fn shutdown(&self) {
        self.inner.lock().shutdown = true;
        self.work_cv.notify_all();
        self.cpu_cv.notify_all();
        self.barrier_cv.notify_all();
    }
}

impl CompletionSink for Monitor {
    fn thread_done(&self, category: Category, unit: UnitId) {
        Monitor::thread_done(self, category, unit);
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("state", &*self.inner.lock())
            .finish()
    }
}

fn decrement(pending: u32, category: Category, unit: UnitId) -> u32 {
    match pending.checked_sub(1) {
        Some(left) => left,
        None => {
            log::error!("Monitor: {unit} reported done with no pending {category:?} dispatch");
            panic!("pending {category:?} counter underflow ({unit})");
        }
    }
}

/// The monitor lock, held by the coordinator while it picks the next dispatch.
pub(crate) struct MonitorGuard<'a> {
    monitor: &'a Monitor,
    inner: MutexGuard<'a, MonitorState>,
}

impl MonitorGuard<'_> {
    pub(crate) fn in_flight(&self) -> u32 {
        self.inner.pending_state + self.inner.pending_render
    }

    pub(crate) fn budget_exhausted(&self) -> bool {
        self.in_flight() >= self.inner.cpu_limit
    }

    pub(crate) fn waiting(&self, category: Category) -> bool {
        match category {
            Category::State => self.inner.state_waiting,
            Category::Render => self.inner.render_waiting,
            Category::Cleanup => false,
        }
    }

    /// Accounts for a dispatch about to be handed to its worker.
    pub(crate) fn begin_dispatch(&mut self, category: Category, wait_all: bool) {
        let inner = &mut *self.inner;
        match category {
            Category::State => {
                inner.pending_state += 1;
                inner.state_waiting |= wait_all;
            }
            Category::Render => {
                inner.pending_render += 1;
                inner.render_waiting |= wait_all;
            }
            Category::Cleanup => {}
        }
        let in_flight = inner.pending_state + inner.pending_render;
        inner.max_in_flight = inner.max_in_flight.max(in_flight);
    }

    /// WAITING_FOR_CPU until a completion (or new work) wakes the coordinator.
    pub(crate) fn wait_for_cpu(&mut self) {
        self.inner.state = CoordinatorState::WaitingForCpu;
        self.monitor.cpu_cv.wait(&mut self.inner);
        self.inner.state = CoordinatorState::Running;
    }

    /// WAITING_FOR_THREADS until a completion wakes the coordinator.
    pub(crate) fn wait_for_threads(&mut self) {
        self.inner.state = CoordinatorState::WaitingForThreads;
        self.monitor.barrier_cv.wait(&mut self.inner);
        self.inner.state = CoordinatorState::Running;
    }
}
