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

//! Minimum frame cycle pacing.
//!
//! After a tick the coordinator sleeps long enough for the slowest-paced
//! active view to respect its minimum cycle time. The sleep happens with no
//! scheduler lock held and wakes early when the scheduler shuts down.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Computes and performs the inter-tick delay.
#[derive(Debug, Clone)]
pub struct FramePacer {
    shutdown: Receiver<()>,
}

impl FramePacer {
    /// Creates a pacer whose sleeps end when `shutdown` disconnects or fires.
    pub fn new(shutdown: Receiver<()>) -> Self {
        Self { shutdown }
    }

    /// The delay still owed after a frame that took `elapsed`.
    ///
    /// The longest minimum cycle among `min_cycles` wins; the result is zero
    /// when the frame already took long enough.
    pub fn delay<I>(min_cycles: I, elapsed: Duration) -> Duration
    where
        I: IntoIterator<Item = Duration>,
    {
        min_cycles
            .into_iter()
            .map(|min| min.saturating_sub(elapsed))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Sleeps for `delay`. Returns the time actually slept; an interrupted
    /// sleep counts as no delay.
    pub fn sleep(&self, delay: Duration) -> Duration {
        if delay.is_zero() {
            return Duration::ZERO;
        }
        match self.shutdown.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => delay,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::debug!("FramePacer: sleep of {delay:?} interrupted");
                Duration::ZERO
            }
        }
    }

    /// Sleeps for whatever delay `min_cycles` still require after `elapsed`.
    pub fn pace<I>(&self, min_cycles: I, elapsed: Duration) -> Duration
    where
        I: IntoIterator<Item = Duration>,
    {
        let delay = Self::delay(min_cycles, elapsed);
        if !delay.is_zero() {
            log::trace!("FramePacer: sleeping {delay:?}");
        }
        self.sleep(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_short_frame_owes_remainder() {
        assert_eq!(FramePacer::delay([ms(16)], ms(2)), ms(14));
    }

    #[test]
    fn test_long_frame_owes_nothing() {
        assert_eq!(FramePacer::delay([ms(16)], ms(20)), Duration::ZERO);
    }

    #[test]
    fn test_slowest_view_wins() {
        assert_eq!(FramePacer::delay([ms(8), ms(33), ms(0)], ms(3)), ms(30));
        assert_eq!(FramePacer::delay(Vec::<Duration>::new(), ms(3)), Duration::ZERO);
    }

    #[test]
    fn test_sleep_waits_for_delay() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let pacer = FramePacer::new(rx);
        let start = Instant::now();
        assert_eq!(pacer.pace([ms(16)], ms(2)), ms(14));
        assert!(start.elapsed() >= ms(14));
    }

    #[test]
    fn test_shutdown_interrupts_sleep() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let pacer = FramePacer::new(rx);
        drop(tx);
        let start = Instant::now();
        assert_eq!(pacer.sleep(Duration::from_secs(5)), Duration::ZERO);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
