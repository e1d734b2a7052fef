//! Clock abstraction for time-based selection.
//!
//! Selection needs the current minute of day; injecting it behind a trait
//! keeps time-mode behavior deterministic in tests.

use chrono::{Local, Timelike};

/// Source of the current minute of day, in `[0, 1440)`.
pub trait Clock: Send + Sync {
    fn minute_of_day(&self) -> u16;
}

/// Wall-clock implementation using the local timezone, matching how
/// operators express tier time windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn minute_of_day(&self) -> u16 {
        let now = Local::now().time();
        (now.hour() * 60 + now.minute()) as u16
    }
}

/// Fixed clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u16);

impl Clock for FixedClock {
    fn minute_of_day(&self) -> u16 {
        self.0
    }
}
