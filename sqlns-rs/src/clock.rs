use chrono::{NaiveDateTime, TimeDelta};

use crate::error::{Result, SqlnsError};
use crate::population::SimulantId;

pub const DAYS_PER_YEAR: f64 = 365.25;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Converts a (possibly fractional) number of days into a `TimeDelta`.
pub fn days(days: f64) -> Result<TimeDelta> {
    if !days.is_finite() {
        return Err(SqlnsError::config(format!("invalid duration of {days} days")));
    }
    TimeDelta::try_milliseconds((days * MILLIS_PER_DAY).round() as i64)
        .ok_or_else(|| SqlnsError::config(format!("duration of {days} days is out of range")))
}

pub fn in_days(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / MILLIS_PER_DAY
}

pub fn in_years(delta: TimeDelta) -> f64 {
    in_days(delta) / DAYS_PER_YEAR
}

/// Simulated wall clock. `now()` is the time at the start of the current step.
#[derive(Debug, Clone)]
pub struct Clock {
    time: NaiveDateTime,
    step_size: TimeDelta,
}

impl Clock {
    pub fn new(start: NaiveDateTime, step_size: TimeDelta) -> Self {
        Self {
            time: start,
            step_size,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.time
    }

    pub fn step_size(&self) -> TimeDelta {
        self.step_size
    }

    /// Time at the end of the current step.
    pub fn event_time(&self) -> NaiveDateTime {
        self.time + self.step_size
    }

    pub fn advance(&mut self) {
        self.time += self.step_size;
    }
}

/// Delivered once per simulation tick.
#[derive(Debug, Clone)]
pub struct TimeStep {
    /// End of the step.
    pub time: NaiveDateTime,
    pub step_size: TimeDelta,
    pub index: Vec<SimulantId>,
}

impl TimeStep {
    pub fn new(clock: &Clock, index: Vec<SimulantId>) -> Self {
        Self {
            time: clock.event_time(),
            step_size: clock.step_size(),
            index,
        }
    }
}
