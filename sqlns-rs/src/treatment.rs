use chrono::{NaiveDateTime, TimeDelta};
use log::debug;

use crate::clock::{self, DAYS_PER_YEAR, TimeStep};
use crate::config::{AgeRange, SqlnsConfig};
use crate::error::{Result, SqlnsError};
use crate::population::{Population, Simulant, SimulantId};
use crate::randomness::RandomStream;

pub const COVERAGE_STREAM: &str = "sqlns_coverage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Setup,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentState {
    NotEnrolled,
    Enrolled,
    Completed,
}

impl TreatmentState {
    pub fn of(simulant: &Simulant, now: NaiveDateTime) -> Self {
        match (simulant.treatment_start, simulant.treatment_end) {
            (Some(_), Some(end)) if now > end => Self::Completed,
            (Some(_), _) => Self::Enrolled,
            _ => Self::NotEnrolled,
        }
    }
}

/// Which enrollment rule applies to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enrollment {
    /// The program starts inside this step.
    Mass,
    /// The program is already running; only simulants ageing into
    /// eligibility are considered.
    Continuous,
    NotStarted,
}

#[derive(Debug, Clone)]
pub struct TreatmentAlgorithm {
    start_date: NaiveDateTime,
    duration: TimeDelta,
    treatment_age: AgeRange,
    coverage: f64,
    randomness: RandomStream,
}

impl TreatmentAlgorithm {
    pub fn setup(config: &SqlnsConfig, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.program_coverage) {
            return Err(SqlnsError::config(format!(
                "sqlns.program_coverage must be in [0, 1], got {}",
                config.program_coverage
            )));
        }
        Ok(Self {
            start_date: config.start_date.to_datetime()?,
            duration: clock::days(config.duration)?,
            treatment_age: config.treatment_age,
            coverage: config.program_coverage,
            randomness: RandomStream::new(COVERAGE_STREAM, seed),
        })
    }

    pub fn start_date(&self) -> NaiveDateTime {
        self.start_date
    }

    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    /// New simulants start out not enrolled. A population created during
    /// setup on or after the program start cannot be enrolled correctly and
    /// is refused.
    pub fn on_initialize_simulants(
        &self,
        population: &mut Population,
        ids: &[SimulantId],
        creation_time: NaiveDateTime,
        sim_state: SimState,
    ) -> Result<()> {
        if sim_state == SimState::Setup && creation_time >= self.start_date {
            return Err(SqlnsError::LateStart {
                creation_time,
                start_date: self.start_date,
            });
        }
        for &id in ids {
            let simulant = population.get_mut(id)?;
            simulant.treatment_start = None;
            simulant.treatment_end = None;
        }
        Ok(())
    }

    /// Enrolls this step's selections and returns their ids.
    pub fn on_time_step(
        &self,
        population: &mut Population,
        now: NaiveDateTime,
        event: &TimeStep,
    ) -> Result<Vec<SimulantId>> {
        let living = population.living(&event.index)?;
        let treated = self.get_treated_ids(population, &living, now, event)?;
        if treated.is_empty() {
            return Ok(treated);
        }

        let treatment_end = event.time.checked_add_signed(self.duration).ok_or_else(|| {
            SqlnsError::config(format!(
                "a {} day treatment window starting {} ends past the last representable date",
                clock::in_days(self.duration),
                event.time
            ))
        })?;
        for &id in &treated {
            let simulant = population.get_mut(id)?;
            simulant.treatment_start = Some(event.time);
            simulant.treatment_end = Some(treatment_end);
        }
        debug!("enrolled {} simulants in SQ-LNS at {}", treated.len(), event.time);
        Ok(treated)
    }

    fn enrollment(&self, now: NaiveDateTime, event_time: NaiveDateTime) -> Enrollment {
        if now < self.start_date && self.start_date <= event_time {
            Enrollment::Mass
        } else if self.start_date <= now {
            Enrollment::Continuous
        } else {
            Enrollment::NotStarted
        }
    }

    /// Selects the not-yet-enrolled simulants among `living` that start
    /// treatment at the end of this step.
    pub fn get_treated_ids(
        &self,
        population: &Population,
        living: &[SimulantId],
        now: NaiveDateTime,
        event: &TimeStep,
    ) -> Result<Vec<SimulantId>> {
        let step_years = clock::in_days(event.step_size) / DAYS_PER_YEAR;
        let AgeRange { start, end } = self.treatment_age;

        let rule = self.enrollment(now, event.time);
        let mut eligible = Vec::new();
        for &id in living {
            let simulant = population.get(id)?;
            if simulant.treatment_start.is_some() {
                continue;
            }
            let age = simulant.age;
            let is_eligible = match rule {
                Enrollment::Mass => start <= age && age <= end,
                Enrollment::Continuous => age < start && start <= age + step_years,
                Enrollment::NotStarted => false,
            };
            if is_eligible {
                eligible.push(id);
            }
        }

        let treated = match rule {
            Enrollment::Mass => {
                self.randomness
                    .filter_for_probability(&eligible, self.coverage, "mass_enrollment")
            }
            Enrollment::Continuous => self.randomness.filter_for_probability(
                &eligible,
                self.coverage,
                &format!("continuous_enrollment_{}", event.time),
            ),
            Enrollment::NotStarted => Vec::new(),
        };
        Ok(treated)
    }

    /// Simulants whose treatment window contains `now`.
    pub fn is_covered(
        &self,
        population: &Population,
        ids: &[SimulantId],
        now: NaiveDateTime,
    ) -> Result<Vec<SimulantId>> {
        let mut covered = Vec::new();
        for &id in ids {
            let simulant = population.get(id)?;
            if let (Some(start), Some(end)) = (simulant.treatment_start, simulant.treatment_end) {
                if start <= now && now <= end {
                    covered.push(id);
                }
            }
        }
        Ok(covered)
    }
}
