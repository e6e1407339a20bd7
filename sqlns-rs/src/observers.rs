use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime};

use crate::anemia::{ANEMIA_THRESHOLDS, AnemiaSeverity, thresholds_for_age};
use crate::clock;
use crate::config::{AnemiaObserverConfig, MonthDay, RiskObserverConfig};
use crate::error::{Result, SqlnsError};
use crate::population::{Population, SimulantId};

pub type Metrics = BTreeMap<String, f64>;

/// True for the step `[now, event_time)` that contains the sample date in
/// the year of `event_time`.
fn is_sample_step(sample_date: MonthDay, now: NaiveDateTime, event_time: NaiveDateTime) -> Result<bool> {
    let sample_date = sample_date.in_year(event_time.year())?;
    Ok(now <= sample_date && sample_date < event_time)
}

/// Counts living simulants by anemia severity once a year on the sample date.
#[derive(Debug, Clone)]
pub struct AnemiaObserver {
    config: AnemiaObserverConfig,
    counts: BTreeMap<String, u64>,
}

impl AnemiaObserver {
    pub fn new(config: &AnemiaObserverConfig) -> Self {
        Self {
            config: config.clone(),
            counts: BTreeMap::new(),
        }
    }

    pub fn should_sample(&self, now: NaiveDateTime, event_time: NaiveDateTime) -> Result<bool> {
        is_sample_step(self.config.sample_date, now, event_time)
    }

    pub fn on_collect_metrics(
        &mut self,
        population: &Population,
        ids: &[SimulantId],
        severity: &[AnemiaSeverity],
        now: NaiveDateTime,
        event_time: NaiveDateTime,
    ) -> Result<()> {
        if ids.len() != severity.len() {
            return Err(SqlnsError::LengthMismatch {
                expected: ids.len(),
                actual: severity.len(),
            });
        }
        if !self.should_sample(now, event_time)? {
            return Ok(());
        }

        let year = now.year();
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for (&id, &level) in ids.iter().zip(severity) {
            let simulant = population.get(id)?;
            if !simulant.is_alive() {
                continue;
            }
            let group = if self.config.by_age {
                format!("_among_{}", thresholds_for_age(simulant.age).age_group_name())
            } else {
                String::new()
            };
            let measure = match level {
                AnemiaSeverity::None => "unexposed".to_string(),
                anemic => anemic.to_string(),
            };
            *counts
                .entry(format!("{measure}_anemia_counts_in_{year}{group}"))
                .or_default() += 1;
        }

        // Report empty cells as explicit zeros.
        let groups: Vec<String> = if self.config.by_age {
            ANEMIA_THRESHOLDS
                .iter()
                .map(|t| format!("_among_{}", t.age_group_name()))
                .collect()
        } else {
            vec![String::new()]
        };
        for group in &groups {
            for measure in ["unexposed", "mild", "moderate", "severe"] {
                counts
                    .entry(format!("{measure}_anemia_counts_in_{year}{group}"))
                    .or_default();
            }
        }

        for (key, count) in counts {
            *self.counts.entry(key).or_default() += count;
        }
        Ok(())
    }

    pub fn metrics(&self, metrics: &mut Metrics) {
        for (key, count) in &self.counts {
            metrics.insert(key.clone(), *count as f64);
        }
    }
}

/// Counts living simulants in each category of a categorical risk, per age
/// group, on the yearly sample date. Categories outside the configured list
/// and ages outside every group are not counted.
#[derive(Debug, Clone)]
pub struct RiskObserver {
    risk: String,
    config: RiskObserverConfig,
    samples: BTreeMap<i32, Vec<BTreeMap<String, u64>>>,
}

impl RiskObserver {
    pub fn new(risk: impl Into<String>, config: &RiskObserverConfig) -> Self {
        Self {
            risk: risk.into(),
            config: config.clone(),
            samples: BTreeMap::new(),
        }
    }

    pub fn risk(&self) -> &str {
        &self.risk
    }

    pub fn should_sample(&self, now: NaiveDateTime, event_time: NaiveDateTime) -> Result<bool> {
        is_sample_step(self.config.sample_date, now, event_time)
    }

    /// `exposure[i]` is the category of `ids[i]`. A second sample in the
    /// same year replaces the first.
    pub fn on_collect_metrics(
        &mut self,
        population: &Population,
        ids: &[SimulantId],
        exposure: &[String],
        now: NaiveDateTime,
        event_time: NaiveDateTime,
    ) -> Result<()> {
        if ids.len() != exposure.len() {
            return Err(SqlnsError::LengthMismatch {
                expected: ids.len(),
                actual: exposure.len(),
            });
        }
        if !self.should_sample(now, event_time)? {
            return Ok(());
        }

        let mut sample: Vec<BTreeMap<String, u64>> = self
            .config
            .age_groups
            .iter()
            .map(|_| self.config.categories.iter().map(|c| (c.clone(), 0)).collect())
            .collect();
        for (&id, category) in ids.iter().zip(exposure) {
            let simulant = population.get(id)?;
            if !simulant.is_alive() {
                continue;
            }
            let Some(group) = self.config.age_groups.iter().position(|g| g.contains(simulant.age)) else {
                continue;
            };
            if let Some(count) = sample[group].get_mut(category) {
                *count += 1;
            }
        }
        self.samples.insert(now.year(), sample);
        Ok(())
    }

    pub fn metrics(&self, metrics: &mut Metrics) {
        for (year, sample) in &self.samples {
            for (group, counts) in self.config.age_groups.iter().zip(sample) {
                for (category, count) in counts {
                    metrics.insert(
                        format!("{}_{category}_exposed_in_{year}_among_{}", self.risk, group.name),
                        *count as f64,
                    );
                }
            }
        }
    }
}

/// Enrollments and treated person-time by calendar year.
#[derive(Debug, Clone, Default)]
pub struct TreatmentObserver {
    enrollments: BTreeMap<i32, u64>,
    person_days: BTreeMap<i32, f64>,
}

impl TreatmentObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enrolled(&mut self, event_time: NaiveDateTime, enrolled: usize) {
        if enrolled > 0 {
            *self.enrollments.entry(event_time.year()).or_default() += enrolled as u64;
        }
    }

    /// Adds the part of `[now, event_time)` each simulant spent inside its
    /// treatment window, cut short at its exit time.
    pub fn on_collect_metrics(
        &mut self,
        population: &Population,
        ids: &[SimulantId],
        now: NaiveDateTime,
        event_time: NaiveDateTime,
    ) -> Result<()> {
        let mut days = 0.0;
        for &id in ids {
            let simulant = population.get(id)?;
            let (Some(start), Some(end)) = (simulant.treatment_start, simulant.treatment_end) else {
                continue;
            };
            let end = simulant.exit_time.map_or(end, |exit| exit.min(end));
            let from = start.max(now);
            let to = end.min(event_time);
            if to > from {
                days += clock::in_days(to - from);
            }
        }
        if days > 0.0 {
            *self.person_days.entry(now.year()).or_default() += days;
        }
        Ok(())
    }

    pub fn metrics(&self, metrics: &mut Metrics) {
        for (year, count) in &self.enrollments {
            metrics.insert(format!("sqlns_enrollments_in_{year}"), *count as f64);
        }
        for (year, days) in &self.person_days {
            metrics.insert(format!("sqlns_treated_person_days_in_{year}"), *days);
        }
    }
}

/// Years lived with disability due to iron deficiency anemia.
#[derive(Debug, Clone, Default)]
pub struct DisabilityObserver {
    ylds: BTreeMap<i32, f64>,
}

impl DisabilityObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `disability_weights` already carries zeros for the dead.
    pub fn on_collect_metrics(
        &mut self,
        disability_weights: &[f64],
        now: NaiveDateTime,
        step_years: f64,
    ) {
        let total: f64 = disability_weights.iter().sum();
        *self.ylds.entry(now.year()).or_default() += total * step_years;
    }

    pub fn metrics(&self, metrics: &mut Metrics) {
        for (year, ylds) in &self.ylds {
            metrics.insert(format!("ylds_due_to_iron_deficiency_in_{year}"), *ylds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonthDay;
    use chrono::{NaiveDate, TimeDelta};

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_should_sample() {
        let observer = AnemiaObserver::new(&AnemiaObserverConfig::default());
        assert!(observer.should_sample(date(2020, 6, 20), date(2020, 7, 18)).unwrap());
        assert!(observer.should_sample(date(2020, 7, 1), date(2020, 7, 29)).unwrap());
        assert!(!observer.should_sample(date(2020, 6, 3), date(2020, 7, 1)).unwrap());
        assert!(!observer.should_sample(date(2020, 7, 2), date(2020, 7, 30)).unwrap());
    }

    #[test]
    fn test_anemia_counts() {
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.5, 0.5, 0.5, 3.0, 0.5], date(2019, 1, 1));
        pop.mark_dead(ids[4], date(2020, 1, 1)).unwrap();
        let severity = [
            AnemiaSeverity::Mild,
            AnemiaSeverity::Mild,
            AnemiaSeverity::None,
            AnemiaSeverity::Severe,
            AnemiaSeverity::Severe,
        ];

        let mut observer = AnemiaObserver::new(&AnemiaObserverConfig::default());
        observer
            .on_collect_metrics(&pop, &ids, &severity, date(2020, 5, 1), date(2020, 5, 29))
            .unwrap();
        let mut metrics = Metrics::new();
        observer.metrics(&mut metrics);
        assert!(metrics.is_empty());

        observer
            .on_collect_metrics(&pop, &ids, &severity, date(2020, 6, 20), date(2020, 7, 18))
            .unwrap();
        observer.metrics(&mut metrics);
        assert_eq!(metrics["mild_anemia_counts_in_2020"], 2.0);
        assert_eq!(metrics["moderate_anemia_counts_in_2020"], 0.0);
        assert_eq!(metrics["severe_anemia_counts_in_2020"], 1.0);
        assert_eq!(metrics["unexposed_anemia_counts_in_2020"], 1.0);
    }

    #[test]
    fn test_anemia_counts_by_age() {
        let config = AnemiaObserverConfig {
            sample_date: MonthDay { month: 12, day: 31 },
            by_age: true,
        };
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.01, 2.0], date(2019, 1, 1));
        let severity = [AnemiaSeverity::Moderate, AnemiaSeverity::Moderate];

        let mut observer = AnemiaObserver::new(&config);
        observer
            .on_collect_metrics(&pop, &ids, &severity, date(2019, 12, 20), date(2020, 1, 17))
            .unwrap();
        let mut metrics = Metrics::new();
        observer.metrics(&mut metrics);
        // The sample date is looked up in the year of the event time.
        assert!(metrics.is_empty());

        observer
            .on_collect_metrics(&pop, &ids, &severity, date(2020, 12, 20), date(2021, 1, 17))
            .unwrap();
        observer.metrics(&mut metrics);
        assert!(metrics.is_empty());

        observer
            .on_collect_metrics(&pop, &ids, &severity, date(2020, 12, 10), date(2020, 12, 31) + TimeDelta::hours(12))
            .unwrap();
        observer.metrics(&mut metrics);
        assert_eq!(metrics["moderate_anemia_counts_in_2020_among_0_to_1_month"], 1.0);
        assert_eq!(metrics["moderate_anemia_counts_in_2020_among_1_month_to_5_years"], 1.0);
        assert_eq!(metrics["mild_anemia_counts_in_2020_among_5_years_to_15_years"], 0.0);
        assert_eq!(metrics.len(), 12);
    }

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_risk_counts_by_age_group() {
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.01, 0.5, 0.5, 3.0, 3.0, 7.0, 0.5], date(2019, 1, 1));
        pop.mark_dead(ids[4], date(2020, 1, 1)).unwrap();
        let exposure = categories(&["cat1", "cat2", "cat2", "cat4", "cat4", "cat1", "cat9"]);

        let mut observer = RiskObserver::new("child_stunting", &RiskObserverConfig::default());
        assert_eq!(observer.risk(), "child_stunting");
        observer
            .on_collect_metrics(&pop, &ids, &exposure, date(2020, 5, 1), date(2020, 5, 29))
            .unwrap();
        let mut metrics = Metrics::new();
        observer.metrics(&mut metrics);
        assert!(metrics.is_empty());

        observer
            .on_collect_metrics(&pop, &ids, &exposure, date(2020, 6, 20), date(2020, 7, 18))
            .unwrap();
        observer.metrics(&mut metrics);
        assert_eq!(metrics.len(), 16);
        assert_eq!(metrics["child_stunting_cat1_exposed_in_2020_among_early_neonatal"], 1.0);
        assert_eq!(metrics["child_stunting_cat2_exposed_in_2020_among_post_neonatal"], 2.0);
        assert_eq!(metrics["child_stunting_cat4_exposed_in_2020_among_1_to_4"], 1.0);
        assert_eq!(metrics["child_stunting_cat1_exposed_in_2020_among_late_neonatal"], 0.0);
        assert_eq!(metrics.values().sum::<f64>(), 4.0);
    }

    #[test]
    fn test_risk_resample_replaces_the_year() {
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.5, 0.5], date(2019, 1, 1));
        let mut observer = RiskObserver::new("child_stunting", &RiskObserverConfig::default());
        observer
            .on_collect_metrics(&pop, &ids, &categories(&["cat2", "cat2"]), date(2020, 6, 20), date(2020, 7, 18))
            .unwrap();
        observer
            .on_collect_metrics(&pop, &ids, &categories(&["cat3", "cat3"]), date(2020, 7, 1), date(2020, 7, 29))
            .unwrap();

        let mut metrics = Metrics::new();
        observer.metrics(&mut metrics);
        assert_eq!(metrics["child_stunting_cat2_exposed_in_2020_among_post_neonatal"], 0.0);
        assert_eq!(metrics["child_stunting_cat3_exposed_in_2020_among_post_neonatal"], 2.0);

        assert!(matches!(
            observer.on_collect_metrics(&pop, &ids, &categories(&["cat1"]), date(2020, 7, 1), date(2020, 7, 29)),
            Err(SqlnsError::LengthMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_treated_person_days_stop_at_exit() {
        let mut pop = Population::new();
        let ids = pop.add_simulants(&[0.6, 0.6, 0.6], date(2019, 1, 1));
        for &id in &ids[..2] {
            let s = pop.get_mut(id).unwrap();
            s.treatment_start = Some(date(2020, 1, 10));
            s.treatment_end = Some(date(2021, 1, 9));
        }
        pop.mark_dead(ids[1], date(2020, 1, 20)).unwrap();

        let mut observer = TreatmentObserver::new();
        observer.on_enrolled(date(2020, 1, 10), 2);
        observer
            .on_collect_metrics(&pop, &ids, date(2020, 1, 1), date(2020, 1, 29))
            .unwrap();
        observer
            .on_collect_metrics(&pop, &ids, date(2020, 12, 30), date(2021, 1, 27))
            .unwrap();

        let mut metrics = Metrics::new();
        observer.metrics(&mut metrics);
        assert_eq!(metrics["sqlns_enrollments_in_2020"], 2.0);
        // 19 days for the survivor and 10 before the other's exit, then the
        // survivor's last 10 days of treatment.
        assert_eq!(metrics["sqlns_treated_person_days_in_2020"], 39.0);
        assert!(!metrics.contains_key("sqlns_treated_person_days_in_2021"));
    }

    #[test]
    fn test_ylds() {
        let mut observer = DisabilityObserver::new();
        observer.on_collect_metrics(&[0.1, 0.2, 0.0], date(2020, 1, 1), 0.5);
        observer.on_collect_metrics(&[0.1], date(2020, 6, 1), 0.5);
        let mut metrics = Metrics::new();
        observer.metrics(&mut metrics);
        assert!((metrics["ylds_due_to_iron_deficiency_in_2020"] - 0.2).abs() < 1e-12);
    }
}
