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

//! Long-lived threads that run a worker's asynchronous dispatches.

use crate::error::SchedulerError;
use cadence_core::{Completion, Tick, UnitArgs, Worker};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

struct RunRequest {
    tick: Tick,
    args: UnitArgs,
    done: Completion,
}

/// Wraps a worker in its own named thread.
///
/// `run_async` queues the dispatch on a channel; the thread runs
/// `do_work` and completes the token. Dispatches of one worker therefore
/// run one at a time, in the order they were handed over.
pub struct WorkerThread {
    name: String,
    inner: Arc<dyn Worker>,
    tx: Option<Sender<RunRequest>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerThread {
    /// Starts the thread.
    pub fn spawn(inner: Arc<dyn Worker>) -> Result<Self, SchedulerError> {
        let name = format!("cadence-{}", short_name(inner.name()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(worker, rx))
            .map_err(|source| SchedulerError::ThreadSpawn {
                name: name.clone(),
                source,
            })?;
        log::debug!("WorkerThread: started '{name}'");
        Ok(Self {
            name,
            inner,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// The wrapped worker.
    pub fn inner(&self) -> &Arc<dyn Worker> {
        &self.inner
    }
}

fn run(worker: Arc<dyn Worker>, rx: Receiver<RunRequest>) {
    for request in rx {
        worker.do_work(request.tick, &request.args);
        request.done.complete();
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

impl Worker for WorkerThread {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_work(&self, tick: Tick, args: &UnitArgs) {
        self.inner.do_work(tick, args);
    }

    fn run_async(&self, tick: Tick, args: UnitArgs, done: Completion) {
        let request = RunRequest { tick, args, done };
        let Some(tx) = &self.tx else {
            request.done.complete();
            return;
        };
        if let Err(err) = tx.send(request) {
            // The thread died in an earlier dispatch.
            log::error!("WorkerThread: '{}' is not running", self.name);
            err.into_inner().done.complete();
        }
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn user_stop(&self) -> bool {
        self.inner.user_stop()
    }

    fn is_continuous(&self) -> bool {
        self.inner.is_continuous()
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::warn!("WorkerThread: '{}' exited by panic", self.name);
            } else {
                log::debug!("WorkerThread: stopped '{}'", self.name);
            }
        }
    }
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{Category, CompletionSink, Inbox, MirrorQueue, PhysicalEnvId, UnitId, UnitOp};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        ticks: Mutex<Vec<Tick>>,
        threads: Mutex<Vec<Option<String>>>,
    }

    impl Worker for Recorder {
        fn do_work(&self, tick: Tick, _args: &UnitArgs) {
            self.ticks.lock().push(tick);
            self.threads
                .lock()
                .push(thread::current().name().map(str::to_owned));
        }
    }

    struct Panics;

    impl Worker for Panics {
        fn do_work(&self, _tick: Tick, _args: &UnitArgs) {
            panic!("worker failure");
        }
    }

    struct ChannelSink(Sender<UnitId>);

    impl CompletionSink for ChannelSink {
        fn thread_done(&self, _category: Category, unit: UnitId) {
            let _ = self.0.send(unit);
        }
    }

    fn args() -> UnitArgs {
        UnitArgs::new(
            UnitOp::InputPoller {
                env: PhysicalEnvId(0),
            },
            Inbox::None,
            Arc::new(MirrorQueue::new()),
        )
    }

    #[test]
    fn test_dispatches_run_on_worker_thread_in_order() {
        let recorder = Arc::new(Recorder::default());
        let worker = WorkerThread::spawn(recorder.clone()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink: Arc<dyn CompletionSink> = Arc::new(ChannelSink(tx));

        let clock = cadence_core::Clock::new();
        for unit in 0..3 {
            worker.run_async(
                clock.advance(),
                args(),
                Completion::new(Arc::clone(&sink), Category::State, UnitId(unit)),
            );
        }
        let done: Vec<UnitId> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(done, vec![UnitId(0), UnitId(1), UnitId(2)]);

        let ticks = recorder.ticks.lock().clone();
        assert!(ticks.windows(2).all(|w| w[0] < w[1]));
        let threads = recorder.threads.lock().clone();
        assert!(threads
            .iter()
            .all(|name| name.as_deref() == Some(worker.name())));
    }

    #[test]
    fn test_panicking_worker_still_completes() {
        let worker = WorkerThread::spawn(Arc::new(Panics)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink: Arc<dyn CompletionSink> = Arc::new(ChannelSink(tx));

        worker.run_async(Tick::ZERO, args(), Completion::new(sink.clone(), Category::Render, UnitId(1)));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), UnitId(1));

        // The thread is gone; later dispatches are reported done immediately.
        thread::sleep(Duration::from_millis(20));
        worker.run_async(Tick::ZERO, args(), Completion::new(sink, Category::Render, UnitId(2)));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), UnitId(2));
    }

    #[test]
    fn test_thread_name_uses_worker_type() {
        let worker = WorkerThread::spawn(Arc::new(Recorder::default())).unwrap();
        assert_eq!(worker.name(), "cadence-Recorder");
    }
}
