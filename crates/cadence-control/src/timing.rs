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

//! Rolling per-view frame timings.

use cadence_core::ViewId;
use std::collections::HashMap;
use std::time::Duration;

/// Samples kept per view (two seconds at 60Hz).
pub const FRAME_SAMPLES: usize = 120;

/// The last [`FRAME_SAMPLES`] frame durations of one view, in milliseconds.
///
/// The sum is kept as samples arrive so the average does not rescan.
#[derive(Debug, Clone)]
struct FrameWindow {
    samples: [f32; FRAME_SAMPLES],
    next: usize,
    filled: usize,
    sum: f64,
}

impl FrameWindow {
    fn push(&mut self, ms: f32) {
        if self.filled == FRAME_SAMPLES {
            self.sum -= f64::from(self.samples[self.next]);
        } else {
            self.filled += 1;
        }
        self.samples[self.next] = ms;
        self.sum += f64::from(ms);
        self.next = (self.next + 1) % FRAME_SAMPLES;
    }

    fn retained(&self) -> &[f32] {
        &self.samples[..self.filled]
    }

    fn last(&self) -> f32 {
        if self.filled == 0 {
            return 0.0;
        }
        self.samples[(self.next + FRAME_SAMPLES - 1) % FRAME_SAMPLES]
    }

    fn average(&self) -> f32 {
        if self.filled == 0 {
            return 0.0;
        }
        (self.sum / self.filled as f64) as f32
    }

    fn min(&self) -> f32 {
        self.retained().iter().copied().reduce(f32::min).unwrap_or(0.0)
    }

    fn max(&self) -> f32 {
        self.retained().iter().copied().reduce(f32::max).unwrap_or(0.0)
    }
}

impl Default for FrameWindow {
    fn default() -> Self {
        Self {
            samples: [0.0; FRAME_SAMPLES],
            next: 0,
            filled: 0,
            sum: 0.0,
        }
    }
}

/// Summary of a view's recent frames.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTiming {
    /// Frames completed since the view was registered.
    pub frames: u64,
    /// Duration of the latest frame.
    pub last_ms: f32,
    /// Mean over the retained samples.
    pub average_ms: f32,
    /// Shortest retained frame.
    pub min_ms: f32,
    /// Longest retained frame.
    pub max_ms: f32,
}

#[derive(Debug, Default)]
struct ViewFrames {
    frames: u64,
    samples: FrameWindow,
}

/// Frame durations organized by view.
#[derive(Debug, Default)]
pub struct FrameTimingStore {
    views: HashMap<ViewId, ViewFrames>,
}

impl FrameTimingStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed frame of `view`.
    pub fn record(&mut self, view: ViewId, duration: Duration) {
        let entry = self.views.entry(view).or_default();
        entry.frames += 1;
        entry.samples.push(duration.as_secs_f32() * 1000.0);
    }

    /// Forgets a view.
    pub fn remove(&mut self, view: ViewId) {
        self.views.remove(&view);
    }

    /// Returns the timing summary of `view`, if it completed a frame.
    pub fn snapshot(&self, view: ViewId) -> Option<FrameTiming> {
        let entry = self.views.get(&view)?;
        Some(FrameTiming {
            frames: entry.frames,
            last_ms: entry.samples.last(),
            average_ms: entry.samples.average(),
            min_ms: entry.samples.min(),
            max_ms: entry.samples.max(),
        })
    }
}
