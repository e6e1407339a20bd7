use std::collections::BTreeMap;

use chrono::{NaiveDateTime, TimeDelta};

use crate::clock::in_years;
use crate::error::{Result, SqlnsError};

pub type SimulantId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Alive,
    Dead,
}

/// One row of the population table.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulant {
    /// Years.
    pub age: f64,
    pub alive: Status,
    pub entrance_time: NaiveDateTime,
    pub exit_time: Option<NaiveDateTime>,
    pub treatment_start: Option<NaiveDateTime>,
    pub treatment_end: Option<NaiveDateTime>,
}

impl Simulant {
    pub fn is_alive(&self) -> bool {
        self.alive == Status::Alive
    }
}

/// Index-keyed population table. Rows are never removed; dead simulants
/// stay with `alive == Dead` and an `exit_time`.
#[derive(Debug, Default)]
pub struct Population {
    simulants: BTreeMap<SimulantId, Simulant>,
    next_id: SimulantId,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates one living simulant per age and returns the new ids.
    /// Treatment columns start out empty.
    pub fn add_simulants(&mut self, ages: &[f64], creation_time: NaiveDateTime) -> Vec<SimulantId> {
        ages.iter()
            .map(|&age| {
                let id = self.next_id;
                self.next_id += 1;
                self.simulants.insert(
                    id,
                    Simulant {
                        age,
                        alive: Status::Alive,
                        entrance_time: creation_time,
                        exit_time: None,
                        treatment_start: None,
                        treatment_end: None,
                    },
                );
                id
            })
            .collect()
    }

    pub fn get(&self, id: SimulantId) -> Result<&Simulant> {
        self.simulants
            .get(&id)
            .ok_or(SqlnsError::UnknownSimulant(id))
    }

    pub fn get_mut(&mut self, id: SimulantId) -> Result<&mut Simulant> {
        self.simulants
            .get_mut(&id)
            .ok_or(SqlnsError::UnknownSimulant(id))
    }

    pub fn index(&self) -> Vec<SimulantId> {
        self.simulants.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SimulantId, &Simulant)> {
        self.simulants.iter().map(|(id, s)| (*id, s))
    }

    /// The subset of `ids` that is alive.
    pub fn living(&self, ids: &[SimulantId]) -> Result<Vec<SimulantId>> {
        let mut living = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.get(id)?.is_alive() {
                living.push(id);
            }
        }
        Ok(living)
    }

    pub fn len(&self) -> usize {
        self.simulants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulants.is_empty()
    }

    /// Ages every living simulant by one step.
    pub fn age_by(&mut self, step: TimeDelta) {
        let years = in_years(step);
        for simulant in self.simulants.values_mut().filter(|s| s.is_alive()) {
            simulant.age += years;
        }
    }

    pub fn mark_dead(&mut self, id: SimulantId, time: NaiveDateTime) -> Result<()> {
        let simulant = self.get_mut(id)?;
        simulant.alive = Status::Dead;
        simulant.exit_time = Some(time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.1, 0.7], t0());
        assert_eq!(ids, vec![0, 1]);
        let more = pop.add_simulants(&[0.0], t0());
        assert_eq!(more, vec![2]);
        assert_eq!(pop.len(), 3);

        let s = pop.get(1).unwrap();
        assert_eq!(s.age, 0.7);
        assert!(s.is_alive());
        assert_eq!(s.treatment_start, None);
        assert_eq!(s.treatment_end, None);
        assert!(matches!(pop.get(9), Err(SqlnsError::UnknownSimulant(9))));
    }

    #[test]
    fn test_death_and_aging() {
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.0, 0.0], t0());
        pop.mark_dead(ids[0], t0()).unwrap();
        assert_eq!(pop.living(&ids).unwrap(), vec![ids[1]]);

        pop.age_by(TimeDelta::hours(365 * 24 + 6));
        assert_eq!(pop.get(ids[0]).unwrap().age, 0.0);
        assert_eq!(pop.get(ids[1]).unwrap().age, 1.0);
        assert_eq!(pop.get(ids[0]).unwrap().exit_time, Some(t0()));
    }
}
