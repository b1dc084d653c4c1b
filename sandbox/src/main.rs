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

// Cadence Sandbox
// Drives the scheduler with toy workers that log what they are asked to do.

use anyhow::Result;
use cadence_control::{LifecycleRequest, Scheduler, SchedulerConfig, ViewSpec, WorkerFactory};
use cadence_core::{
    PhysicalEnvId, RendererId, RendererRequestKind, StructureKind, TargetId, TargetMask, Tick,
    UnitArgs, UnitOp, UniverseId, ViewId, Worker,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const UNIVERSE: UniverseId = UniverseId(0);
const FRAMES: u32 = 90;

/// Moves a spinning cube: consumes transform updates.
struct Spinner {
    angle: AtomicU64,
}

impl Worker for Spinner {
    fn name(&self) -> &str {
        "spinner"
    }

    fn do_work(&self, tick: Tick, args: &UnitArgs) {
        let Some(queue) = args.messages() else {
            return;
        };
        for update in queue.consume(tick) {
            if let Some(step) = update.payload_as::<u64>() {
                self.angle.fetch_add(*step, Ordering::Relaxed);
            }
        }
    }
}

/// Pretends to draw; the swap consumes the view's render queue.
struct Canvas {
    renderer: RendererId,
    frames: AtomicU64,
}

impl Worker for Canvas {
    fn name(&self) -> &str {
        "canvas"
    }

    fn do_work(&self, tick: Tick, args: &UnitArgs) {
        match args.op {
            UnitOp::Render { view, target, .. } => {
                thread::sleep(Duration::from_millis(2));
                log::trace!("{}: drew {view}/{target} at {tick}", self.renderer);
            }
            UnitOp::Swap { view, .. } => {
                if let Some(queue) = args.messages() {
                    drop(queue.consume(tick));
                }
                let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("{}: presented {view} (frame {frames})", self.renderer);
            }
            UnitOp::Deferred { .. } => {
                let Some(queue) = args.requests() else {
                    return;
                };
                for request in queue.drain(tick) {
                    log::info!("{}: serviced {:?}", self.renderer, request.kind);
                    queue.recycle(request);
                }
            }
            UnitOp::Cleanup { .. } => log::info!("{}: native context released", self.renderer),
            _ => {}
        }
    }
}

/// Everything else: drains its inbox and moves on.
struct Idle;

impl Worker for Idle {
    fn do_work(&self, tick: Tick, args: &UnitArgs) {
        if let Some(queue) = args.messages() {
            drop(queue.consume(tick));
        }
    }
}

struct SandboxFactory;

impl WorkerFactory for SandboxFactory {
    fn structure(&self, _universe: UniverseId, kind: StructureKind) -> Arc<dyn Worker> {
        match kind {
            StructureKind::Transform => Arc::new(Spinner {
                angle: AtomicU64::new(0),
            }),
            _ => Arc::new(Idle),
        }
    }

    fn behavior_scheduler(&self, _universe: UniverseId) -> Arc<dyn Worker> {
        Arc::new(Idle)
    }

    fn sound_scheduler(&self, _view: ViewId) -> Arc<dyn Worker> {
        Arc::new(Idle)
    }

    fn renderer(&self, renderer: RendererId) -> Arc<dyn Worker> {
        Arc::new(Canvas {
            renderer,
            frames: AtomicU64::new(0),
        })
    }

    fn input_poller(&self, _env: PhysicalEnvId) -> Arc<dyn Worker> {
        Arc::new(Idle)
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut config = SchedulerConfig::from_env()?;
    if config.frame_cycle_time_min.is_zero() {
        config.frame_cycle_time_min = Duration::from_millis(16);
    }
    let mut scheduler = Scheduler::new(config, Arc::new(SandboxFactory))?;
    let handle = scheduler.handle();

    let views = [
        ViewSpec::new(ViewId(1), UNIVERSE).with_target(TargetId(0), RendererId(0)),
        ViewSpec::new(ViewId(2), UNIVERSE)
            .with_target(TargetId(1), RendererId(1))
            .with_offscreen_target(TargetId(2), RendererId(1)),
    ];
    for spec in views {
        let id = spec.id;
        handle.post_request(LifecycleRequest::RegisterView(spec))?;
        handle.post_request(LifecycleRequest::ActivateView(id))?;
    }

    let producer = {
        let handle = handle.clone();
        thread::Builder::new()
            .name("sandbox-producer".to_owned())
            .spawn(move || {
                for _ in 0..FRAMES {
                    let spin = handle
                        .message(0, TargetMask::TRANSFORM | TargetMask::RENDER)
                        .with_universe(UNIVERSE)
                        .with_payload(3u64);
                    handle.post(spin);
                    thread::sleep(Duration::from_millis(10));
                }
            })?
    };

    let query = handle.request(RendererRequestKind::QueryGraphicsConfig);
    handle.post_renderer_request(RendererId(1), query);

    if producer.join().is_err() {
        log::error!("Sandbox: producer thread panicked");
    }

    for view in [ViewId(1), ViewId(2)] {
        if let Some(timing) = handle.frame_timing(view) {
            log::info!(
                "{view}: {} frames, avg {:.2} ms (min {:.2}, max {:.2})",
                timing.frames,
                timing.average_ms,
                timing.min_ms,
                timing.max_ms
            );
        }
    }
    log::info!(
        "Message pool: {:?}",
        handle.pool_stats(cadence_core::PoolKind::Message)
    );

    handle.post_request(LifecycleRequest::EmptyUniverse(UNIVERSE))?;
    thread::sleep(Duration::from_millis(50));
    scheduler.shutdown();
    Ok(())
}
