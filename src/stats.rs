use core::fmt::Write;
use heapless::String;

#[cfg(any(test, feature = "std"))]
fn now_us() -> u64 {
    extern crate std;
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(not(any(test, feature = "std")))]
fn now_us() -> u64 {
    0
}

/// Counters for one `timer` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickStats {
    /// Time the tick was asked to cover.
    pub elapsed: f32,
    /// Time actually covered by committed sub-steps.
    pub simulated: f32,
    pub outer_iterations: u32,
    /// Sub-steps thrown away because a pair penetrated.
    pub rollbacks: u32,
    /// Sub-steps where penetration was accepted as touching.
    pub forced_touches: u32,
    pub pairs_resolved: u32,
    pub pull_aparts: u32,
    /// Wall-clock duration; zero without a clock.
    pub duration_us: u64,
    start_us: u64,
}

impl TickStats {
    pub fn start(elapsed: f32) -> Self {
        Self {
            elapsed,
            start_us: now_us(),
            ..Self::default()
        }
    }

    pub fn finish(&mut self) {
        self.duration_us = now_us().saturating_sub(self.start_us);
    }

    /// Whether the sub-step loop covered the whole interval.
    pub fn completed(&self) -> bool {
        self.simulated >= self.elapsed
    }

    /// One-line summary for logs and overlays.
    pub fn summary(&self) -> String<160> {
        let mut text = String::new();
        let _ = write!(
            text,
            "dt: {:.4}/{:.4} outer: {} rollbacks: {} forced: {} pairs: {} pulls: {} us: {}",
            self.simulated,
            self.elapsed,
            self.outer_iterations,
            self.rollbacks,
            self.forced_touches,
            self.pairs_resolved,
            self.pull_aparts,
            self.duration_us,
        );
        text
    }
}
