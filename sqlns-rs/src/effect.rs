use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeDelta};
use log::info;
use rand::SeedableRng;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::clock;
use crate::config::{EffectConfig, SqlnsConfig};
use crate::error::{Result, SqlnsError};
use crate::population::{Population, Simulant, SimulantId};
use crate::randomness::RandomStream;

/// The logistic ramp is within `1 / DISCONTINUITY_SMOOTHNESS` of the ideal
/// step at both ends of the ramp window.
pub const DISCONTINUITY_SMOOTHNESS: f64 = 10_000.0;

/// A modifiable value, written `<kind>.<name>.<measure>`,
/// e.g. `risk_factor.iron_deficiency.exposure`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub kind: String,
    pub name: String,
    pub measure: String,
}

impl Target {
    /// Name of the value this target modifies, `<name>.<measure>`.
    pub fn pipeline(&self) -> String {
        format!("{}.{}", self.name, self.measure)
    }
}

impl FromStr for Target {
    type Err = SqlnsError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [kind, name, measure] if !kind.is_empty() && !name.is_empty() && !measure.is_empty() => {
                Ok(Self {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    measure: measure.to_string(),
                })
            }
            _ => Err(SqlnsError::InvalidTarget(s.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.kind, self.name, self.measure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentPhase {
    Untreated,
    RampUp,
    FullTreatment,
    RampDown,
    PostTreatment,
}

impl TreatmentPhase {
    pub fn of(simulant: &Simulant, ramp: TimeDelta, now: NaiveDateTime) -> Self {
        let (Some(start), Some(end)) = (simulant.treatment_start, simulant.treatment_end) else {
            return Self::Untreated;
        };
        if now <= start {
            Self::Untreated
        } else if now - start < ramp {
            Self::RampUp
        } else if now <= end {
            Self::FullTreatment
        } else if now - end < ramp {
            Self::RampDown
        } else {
            Self::PostTreatment
        }
    }
}

/// Logistic scale in `(0, 1)` for a point `position` days from the middle
/// of a ramp `ramp` days long.
pub fn ramp_scale(position: f64, ramp: f64) -> f64 {
    let growth_rate = 2.0 / ramp * DISCONTINUITY_SMOOTHNESS.ln();
    1.0 / (1.0 + (-growth_rate * position).exp())
}

#[derive(Debug, Clone)]
pub struct TreatmentEffect {
    target: Target,
    config: EffectConfig,
    ramp: TimeDelta,
    individual_mean: f64,
    effect_size: BTreeMap<SimulantId, f64>,
    randomness: RandomStream,
}

impl TreatmentEffect {
    pub fn setup(target: Target, sqlns: &SqlnsConfig, seed: u64) -> Result<Self> {
        let config = sqlns.effect(&target.name);
        let randomness = RandomStream::new(format!("sqlns_effect_on_{}", target.name), seed);

        let individual_mean = if config.sd > 0.0 {
            let mut rng = StdRng::seed_from_u64(randomness.get_seed());
            normal(config.mean, config.sd)?.sample(&mut rng)
        } else {
            config.mean
        };
        info!(
            "{}: mean effect {individual_mean}, permanent: {}",
            randomness.name(),
            config.permanent
        );

        Ok(Self {
            target,
            ramp: clock::days(sqlns.ramp_duration)?,
            config,
            individual_mean,
            effect_size: BTreeMap::new(),
            randomness,
        })
    }

    pub fn name(&self) -> &str {
        self.randomness.name()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Draws the full effect size of each new simulant. Negative draws are
    /// truncated at zero.
    pub fn on_initialize_simulants(&mut self, ids: &[SimulantId]) -> Result<()> {
        if self.config.individual_sd > 0.0 {
            let distribution = normal(self.individual_mean, self.config.individual_sd)?;
            for &id in ids {
                let mut rng = self.randomness.rng(id, "effect_size");
                let draw: f64 = distribution.sample(&mut rng);
                self.effect_size.insert(id, draw.max(0.0));
            }
        } else {
            for &id in ids {
                self.effect_size.insert(id, self.individual_mean);
            }
        }
        Ok(())
    }

    pub fn effect_size(&self, id: SimulantId) -> Result<f64> {
        self.effect_size
            .get(&id)
            .copied()
            .ok_or(SqlnsError::UnknownSimulant(id))
    }

    /// Effect at `now` for each id, in order.
    pub fn effect(
        &self,
        population: &Population,
        ids: &[SimulantId],
        now: NaiveDateTime,
    ) -> Result<Vec<f64>> {
        ids.iter()
            .map(|&id| self.effect_for(population.get(id)?, id, now))
            .collect()
    }

    /// `base[i] + effect(ids[i])`.
    pub fn adjust(
        &self,
        population: &Population,
        ids: &[SimulantId],
        now: NaiveDateTime,
        base: &[f64],
    ) -> Result<Vec<f64>> {
        if ids.len() != base.len() {
            return Err(SqlnsError::LengthMismatch {
                expected: ids.len(),
                actual: base.len(),
            });
        }
        let effect = self.effect(population, ids, now)?;
        Ok(base.iter().zip(effect).map(|(b, e)| b + e).collect())
    }

    fn effect_for(&self, simulant: &Simulant, id: SimulantId, now: NaiveDateTime) -> Result<f64> {
        let full = self.effect_size(id)?;
        let (Some(start), Some(end)) = (simulant.treatment_start, simulant.treatment_end) else {
            return Ok(0.0);
        };
        let ramp = clock::in_days(self.ramp);
        let half_ramp = self.ramp / 2;

        let effect = match TreatmentPhase::of(simulant, self.ramp, now) {
            TreatmentPhase::Untreated => 0.0,
            TreatmentPhase::RampUp => {
                ramp_scale(clock::in_days((now - start) - half_ramp), ramp) * full
            }
            TreatmentPhase::FullTreatment => full,
            TreatmentPhase::RampDown | TreatmentPhase::PostTreatment if self.config.permanent => {
                full
            }
            TreatmentPhase::RampDown => {
                ramp_scale(clock::in_days(half_ramp - (now - end)), ramp) * full
            }
            TreatmentPhase::PostTreatment => 0.0,
        };
        Ok(effect)
    }
}

fn normal(mean: f64, sd: f64) -> Result<Normal<f64>> {
    Normal::new(mean, sd).map_err(|e| SqlnsError::Distribution(format!("Normal({mean}, {sd}): {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn config(mean: f64, permanent: bool) -> SqlnsConfig {
        let mut sqlns = SqlnsConfig {
            program_coverage: 1.0,
            duration: 365.0,
            ramp_duration: 28.0,
            ..SqlnsConfig::default()
        };
        sqlns.set_effect(
            "iron_deficiency",
            EffectConfig {
                mean,
                permanent,
                ..EffectConfig::default()
            },
        );
        sqlns
    }

    fn target() -> Target {
        "risk_factor.iron_deficiency.exposure".parse().unwrap()
    }

    /// One treated and one untreated simulant; treatment starts 2020-01-01.
    fn treated_population(effect: &mut TreatmentEffect) -> (Population, Vec<SimulantId>) {
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.6, 0.6], date(2019, 12, 1));
        effect.on_initialize_simulants(&ids).unwrap();
        let start = date(2020, 1, 1);
        let s = pop.get_mut(ids[0]).unwrap();
        s.treatment_start = Some(start);
        s.treatment_end = Some(start + TimeDelta::days(365));
        (pop, ids)
    }

    #[test]
    fn test_target_parsing() {
        let t = target();
        assert_eq!(t.kind, "risk_factor");
        assert_eq!(t.name, "iron_deficiency");
        assert_eq!(t.pipeline(), "iron_deficiency.exposure");
        assert_eq!(t.to_string(), "risk_factor.iron_deficiency.exposure");
        assert!("iron_deficiency.exposure".parse::<Target>().is_err());
        assert!("a..b".parse::<Target>().is_err());
    }

    #[test]
    fn test_ramp_ends_are_within_tolerance() {
        let tolerance = 1.0 / DISCONTINUITY_SMOOTHNESS;
        assert!(ramp_scale(-14.0, 28.0) < tolerance);
        assert!(1.0 - ramp_scale(14.0, 28.0) < tolerance);
        assert_eq!(ramp_scale(0.0, 28.0), 0.5);

        let mut last = 0.0;
        for day in 0..=28 {
            let scale = ramp_scale(day as f64 - 14.0, 28.0);
            assert!(scale > last);
            last = scale;
        }
    }

    #[test]
    fn test_phases() {
        let ramp = TimeDelta::days(28);
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.6, 0.6], date(2019, 12, 1));
        assert_eq!(
            TreatmentPhase::of(pop.get(ids[1]).unwrap(), ramp, date(2020, 6, 1)),
            TreatmentPhase::Untreated
        );

        let start = date(2020, 1, 1);
        let end = start + TimeDelta::days(365);
        let s = pop.get_mut(ids[0]).unwrap();
        s.treatment_start = Some(start);
        s.treatment_end = Some(end);
        let s = pop.get(ids[0]).unwrap();

        assert_eq!(TreatmentPhase::of(s, ramp, start), TreatmentPhase::Untreated);
        assert_eq!(TreatmentPhase::of(s, ramp, start + TimeDelta::days(1)), TreatmentPhase::RampUp);
        assert_eq!(TreatmentPhase::of(s, ramp, start + ramp), TreatmentPhase::FullTreatment);
        assert_eq!(TreatmentPhase::of(s, ramp, end), TreatmentPhase::FullTreatment);
        assert_eq!(TreatmentPhase::of(s, ramp, end + TimeDelta::days(1)), TreatmentPhase::RampDown);
        assert_eq!(TreatmentPhase::of(s, ramp, end + ramp), TreatmentPhase::PostTreatment);
    }

    #[test]
    fn test_effect_over_the_window() {
        let mut effect = TreatmentEffect::setup(target(), &config(5.0, false), 0).unwrap();
        let (pop, ids) = treated_population(&mut effect);
        let start = date(2020, 1, 1);
        let end = start + TimeDelta::days(365);
        let ramp = TimeDelta::days(28);
        let base = [100.0, 100.0];

        let at = |t| effect.adjust(&pop, &ids, t, &base).unwrap();

        assert_eq!(at(start), vec![100.0, 100.0]);
        assert_eq!(at(start + ramp / 2), vec![102.5, 100.0]);
        assert_eq!(at(start + ramp), vec![105.0, 100.0]);
        assert_eq!(at(end - ramp / 2), vec![105.0, 100.0]);
        assert_eq!(at(end), vec![105.0, 100.0]);
        assert_eq!(at(end + ramp / 2), vec![102.5, 100.0]);
        assert!((at(end + ramp - TimeDelta::hours(1))[0] - 100.0) < 1e-3);
        assert_eq!(at(end + ramp), vec![100.0, 100.0]);
        assert_eq!(at(end + TimeDelta::days(400)), vec![100.0, 100.0]);

        let rising = at(start + TimeDelta::days(7))[0];
        assert!(100.0 < rising && rising < 102.5);
    }

    #[test]
    fn test_permanent_effect_does_not_ramp_down() {
        let mut effect = TreatmentEffect::setup(target(), &config(5.0, true), 0).unwrap();
        let (pop, ids) = treated_population(&mut effect);
        let end = date(2020, 1, 1) + TimeDelta::days(365);
        for t in [end, end + TimeDelta::days(1), end + TimeDelta::days(14), end + TimeDelta::days(1000)] {
            assert_eq!(effect.effect(&pop, &ids, t).unwrap(), vec![5.0, 0.0]);
        }
    }

    #[test]
    fn test_zero_ramp_steps_on_and_off() {
        let start = date(2020, 1, 1);
        let end = start + TimeDelta::days(365);
        let hour = TimeDelta::hours(1);

        let mut sqlns = config(5.0, false);
        sqlns.ramp_duration = 0.0;
        let mut effect = TreatmentEffect::setup(target(), &sqlns, 0).unwrap();
        let (pop, ids) = treated_population(&mut effect);
        let s = pop.get(ids[0]).unwrap();
        assert_eq!(TreatmentPhase::of(s, TimeDelta::zero(), start + hour), TreatmentPhase::FullTreatment);
        assert_eq!(TreatmentPhase::of(s, TimeDelta::zero(), end + hour), TreatmentPhase::PostTreatment);

        let at = |t| effect.effect(&pop, &ids, t).unwrap();
        assert_eq!(at(start), vec![0.0, 0.0]);
        assert_eq!(at(start + hour), vec![5.0, 0.0]);
        assert_eq!(at(end), vec![5.0, 0.0]);
        assert_eq!(at(end + hour), vec![0.0, 0.0]);

        let mut sqlns = config(5.0, true);
        sqlns.ramp_duration = 0.0;
        let mut effect = TreatmentEffect::setup(target(), &sqlns, 0).unwrap();
        let (pop, ids) = treated_population(&mut effect);
        assert_eq!(effect.effect(&pop, &ids, end + hour).unwrap(), vec![5.0, 0.0]);
    }

    #[test]
    fn test_ramp_past_the_calendar() {
        let mut sqlns = config(5.0, false);
        sqlns.ramp_duration = 1.0e8;
        let mut effect = TreatmentEffect::setup(target(), &sqlns, 0).unwrap();
        let (pop, ids) = treated_population(&mut effect);
        let start = date(2020, 1, 1);
        let end = start + TimeDelta::days(365);

        let s = pop.get(ids[0]).unwrap();
        let ramp = clock::days(1.0e8).unwrap();
        assert_eq!(TreatmentPhase::of(s, ramp, end), TreatmentPhase::RampUp);

        for t in [start + TimeDelta::days(1), end, end + TimeDelta::days(1)] {
            let value = effect.effect(&pop, &ids, t).unwrap()[0];
            assert!((0.0..=5.0).contains(&value));
        }
    }

    #[test]
    fn test_effect_is_idempotent() {
        let mut effect = TreatmentEffect::setup(target(), &config(5.0, false), 0).unwrap();
        let (pop, ids) = treated_population(&mut effect);
        let t = date(2020, 1, 10);
        let first = effect.effect(&pop, &ids, t).unwrap();
        for _ in 0..5 {
            assert_eq!(effect.effect(&pop, &ids, t).unwrap(), first);
        }
    }

    #[test]
    fn test_empty_query() {
        let effect = TreatmentEffect::setup(target(), &config(5.0, false), 0).unwrap();
        let pop = Population::new();
        assert!(effect.effect(&pop, &[], date(2020, 1, 1)).unwrap().is_empty());
        assert!(effect.adjust(&pop, &[], date(2020, 1, 1), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_adjust_checks_lengths() {
        let mut effect = TreatmentEffect::setup(target(), &config(5.0, false), 0).unwrap();
        let (pop, ids) = treated_population(&mut effect);
        assert!(matches!(
            effect.adjust(&pop, &ids, date(2020, 1, 1), &[1.0]),
            Err(SqlnsError::LengthMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_individual_effect_sizes() {
        let mut sqlns = config(5.0, false);
        sqlns.set_effect(
            "iron_deficiency",
            EffectConfig {
                mean: 1.0,
                sd: 0.1,
                individual_sd: 2.0,
                permanent: false,
            },
        );
        let ids: Vec<SimulantId> = (0..5000).collect();
        let draw = |seed| {
            let mut effect = TreatmentEffect::setup(target(), &sqlns, seed).unwrap();
            effect.on_initialize_simulants(&ids).unwrap();
            ids.iter().map(|&id| effect.effect_size(id).unwrap()).collect::<Vec<_>>()
        };
        let sizes = draw(3);
        assert_eq!(sizes, draw(3));
        assert!(sizes.iter().all(|&s| s >= 0.0));
        // Mean 1 with sd 2 puts a large share of draws below zero.
        let clamped = sizes.iter().filter(|&&s| s == 0.0).count();
        assert!(clamped > 750);
        assert!(sizes.iter().any(|&s| s > 1.0));
    }

    #[test]
    fn test_uninitialized_simulant_is_an_error() {
        let effect = TreatmentEffect::setup(target(), &config(5.0, false), 0).unwrap();
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.6], date(2019, 12, 1));
        assert!(matches!(
            effect.effect(&pop, &ids, date(2020, 1, 1)),
            Err(SqlnsError::UnknownSimulant(_))
        ));
    }
}
