//! Idle backoff for the worker thread.
//!
//! When an iteration finds no work, the loop escalates through three
//! stages: busy spins (cheapest wakeup), yields (give the core away), and
//! finally timed parks with doubling duration. Any completed work resets
//! the strategy, so a loop under load never parks and a fully idle loop
//! settles at the maximum park and draws ~0% CPU.

use std::time::Duration;

const SPIN_LIMIT: u32 = 32;
const YIELD_LIMIT: u32 = 48;
const PARK_MIN: Duration = Duration::from_millis(1);
const PARK_MAX: Duration = Duration::from_millis(50);

/// What the worker should do with an idle iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Busy-wait hint.
    Spin,
    /// Yield the time slice.
    Yield,
    /// Park for at most the given duration.
    Park(Duration),
}

/// Escalating spin → yield → park strategy.
#[derive(Debug, Default)]
pub struct IdleStrategy {
    streak: u32,
    park: Option<Duration>,
}

impl IdleStrategy {
    /// Reports one idle iteration and returns the step to take.
    pub fn next_step(&mut self) -> Step {
        self.streak = self.streak.saturating_add(1);
        if self.streak <= SPIN_LIMIT {
            Step::Spin
        } else if self.streak <= YIELD_LIMIT {
            Step::Yield
        } else {
            let park = self
                .park
                .map_or(PARK_MIN, |d| (d * 2).min(PARK_MAX));
            self.park = Some(park);
            Step::Park(park)
        }
    }

    /// Resets after an iteration that did work.
    pub fn reset(&mut self) {
        self.streak = 0;
        self.park = None;
    }
}
