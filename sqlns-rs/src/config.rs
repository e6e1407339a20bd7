use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock;
use crate::effect::Target;
use crate::error::{Result, SqlnsError};

/// Prefix of the per-target effect tables inside the `sqlns` section.
pub const EFFECT_PREFIX: &str = "effect_on_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDate {
    pub const fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    /// Midnight at the start of this date.
    pub fn to_datetime(&self) -> Result<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| {
                SqlnsError::config(format!(
                    "invalid date {}-{:02}-{:02}",
                    self.year, self.month, self.day
                ))
            })
    }
}

/// A date that recurs every year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn in_year(&self, year: i32) -> Result<NaiveDateTime> {
        CalendarDate::new(year, self.month, self.day).to_datetime()
    }
}

/// Age range in years.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeRange {
    pub start: f64,
    pub end: f64,
}

impl AgeRange {
    fn validate(&self, what: &str) -> Result<()> {
        if !(self.start >= 0.0 && self.start <= self.end) {
            return Err(SqlnsError::config(format!(
                "{what} must satisfy 0 <= start <= end, got [{}, {}]",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub start: CalendarDate,
    pub end: CalendarDate,
    /// Days.
    pub step_size: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start: CalendarDate::new(2019, 1, 1),
            end: CalendarDate::new(2021, 12, 31),
            step_size: 28.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub mean: f64,
    pub sd: f64,
    pub individual_sd: f64,
    /// Keep the full effect after the treatment window closes.
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlnsConfig {
    pub start_date: CalendarDate,
    pub treatment_age: AgeRange,
    /// Treatment window length in days.
    pub duration: f64,
    pub program_coverage: f64,
    /// Days over which the effect rises at the start of the window and
    /// falls after its end.
    pub ramp_duration: f64,
    /// Values the intervention modifies, as `<kind>.<name>.<measure>`.
    pub targets: Vec<String>,
    /// `effect_on_<target name>` tables.
    #[serde(flatten)]
    pub effects: BTreeMap<String, EffectConfig>,
}

impl Default for SqlnsConfig {
    fn default() -> Self {
        Self {
            start_date: CalendarDate::new(2020, 1, 1),
            treatment_age: AgeRange {
                start: 0.5,
                end: 1.0,
            },
            duration: 365.25,
            program_coverage: 0.0,
            ramp_duration: 28.0,
            targets: vec!["risk_factor.iron_deficiency.exposure".to_string()],
            effects: BTreeMap::new(),
        }
    }
}

impl SqlnsConfig {
    /// Effect parameters for a target name, falling back to the defaults.
    pub fn effect(&self, target_name: &str) -> EffectConfig {
        self.effects
            .get(&format!("{EFFECT_PREFIX}{target_name}"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_effect(&mut self, target_name: &str, effect: EffectConfig) {
        self.effects
            .insert(format!("{EFFECT_PREFIX}{target_name}"), effect);
    }

    fn validate(&self) -> Result<()> {
        self.start_date.to_datetime()?;
        self.treatment_age.validate("sqlns.treatment_age")?;
        if !(0.0..=1.0).contains(&self.program_coverage) {
            return Err(SqlnsError::config(format!(
                "sqlns.program_coverage must be in [0, 1], got {}",
                self.program_coverage
            )));
        }
        if !(self.duration > 0.0) {
            return Err(SqlnsError::config(format!(
                "sqlns.duration must be positive, got {}",
                self.duration
            )));
        }
        if !(self.ramp_duration >= 0.0) {
            return Err(SqlnsError::config(format!(
                "sqlns.ramp_duration must be non-negative, got {}",
                self.ramp_duration
            )));
        }

        let mut names = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            names.push(target.parse::<Target>()?.name);
        }
        for (key, effect) in &self.effects {
            let name = key.strip_prefix(EFFECT_PREFIX).ok_or_else(|| {
                SqlnsError::config(format!(
                    "unexpected key sqlns.{key}; effect tables are named {EFFECT_PREFIX}<target>"
                ))
            })?;
            if !names.iter().any(|n| n == name) {
                return Err(SqlnsError::config(format!(
                    "sqlns.{key} does not match any configured target"
                )));
            }
            if !(effect.sd >= 0.0 && effect.individual_sd >= 0.0) {
                return Err(SqlnsError::config(format!(
                    "sqlns.{key}: standard deviations must be non-negative"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HemoglobinConfig {
    /// g/L
    pub mean: f64,
    pub sd: f64,
}

impl Default for HemoglobinConfig {
    fn default() -> Self {
        Self {
            mean: 110.0,
            sd: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisabilityWeights {
    pub mild: f64,
    pub moderate: f64,
    pub severe: f64,
}

impl Default for DisabilityWeights {
    fn default() -> Self {
        Self {
            mild: 0.004,
            moderate: 0.052,
            severe: 0.149,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IronDeficiencyConfig {
    pub hemoglobin: HemoglobinConfig,
    pub disability_weights: DisabilityWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnemiaObserverConfig {
    pub sample_date: MonthDay,
    pub by_age: bool,
}

impl Default for AnemiaObserverConfig {
    fn default() -> Self {
        Self {
            sample_date: MonthDay { month: 7, day: 1 },
            by_age: false,
        }
    }
}

/// Age bin for categorical risk counts, `[start, end)` years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeGroup {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

impl AgeGroup {
    fn new(name: &str, start: f64, end: f64) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    pub fn contains(&self, age: f64) -> bool {
        self.start <= age && age < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskObserverConfig {
    pub categories: Vec<String>,
    pub sample_date: MonthDay,
    pub age_groups: Vec<AgeGroup>,
}

impl Default for RiskObserverConfig {
    fn default() -> Self {
        Self {
            categories: ["cat1", "cat2", "cat3", "cat4"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            sample_date: MonthDay { month: 7, day: 1 },
            age_groups: vec![
                AgeGroup::new("early_neonatal", 0.0, 7.0 / 365.0),
                AgeGroup::new("late_neonatal", 7.0 / 365.0, 28.0 / 365.0),
                AgeGroup::new("post_neonatal", 28.0 / 365.0, 1.0),
                AgeGroup::new("1_to_4", 1.0, 5.0),
            ],
        }
    }
}

impl RiskObserverConfig {
    fn validate(&self, risk: &str) -> Result<()> {
        if self.categories.is_empty() {
            return Err(SqlnsError::config(format!(
                "metrics.risk_observers.{risk}.categories is empty"
            )));
        }
        self.sample_date.in_year(2019)?;
        for group in &self.age_groups {
            if !(group.start >= 0.0 && group.start < group.end) {
                return Err(SqlnsError::config(format!(
                    "metrics.risk_observers.{risk}: age group {} must satisfy 0 <= start < end",
                    group.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub anemia_observer: AnemiaObserverConfig,
    /// Categorical risk observers keyed by risk name.
    pub risk_observers: BTreeMap<String, RiskObserverConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub time: TimeConfig,
    pub sqlns: SqlnsConfig,
    pub iron_deficiency: IronDeficiencyConfig,
    pub metrics: MetricsConfig,
}

impl Configuration {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_toml_path(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Rejects configurations the simulation cannot run.
    pub fn validate(&self) -> Result<()> {
        let start = self.time.start.to_datetime()?;
        let end = self.time.end.to_datetime()?;
        if end < start {
            return Err(SqlnsError::config(format!(
                "time.end ({end}) is before time.start ({start})"
            )));
        }
        if !(self.time.step_size > 0.0) {
            return Err(SqlnsError::config(format!(
                "time.step_size must be positive, got {}",
                self.time.step_size
            )));
        }
        self.sqlns.validate()?;

        // The last enrollment happens at the end of the last step; its
        // window and ramp-down must stay on the calendar.
        let step = clock::days(self.time.step_size)?;
        let duration = clock::days(self.sqlns.duration)?;
        let ramp = clock::days(self.sqlns.ramp_duration)?;
        end.checked_add_signed(step)
            .and_then(|t| t.checked_add_signed(duration))
            .and_then(|t| t.checked_add_signed(ramp))
            .ok_or_else(|| {
                SqlnsError::config(format!(
                    "sqlns.duration ({}) and sqlns.ramp_duration ({}) run past the last representable date",
                    self.sqlns.duration, self.sqlns.ramp_duration
                ))
            })?;

        let hemoglobin = &self.iron_deficiency.hemoglobin;
        if !(hemoglobin.sd >= 0.0) {
            return Err(SqlnsError::config(format!(
                "iron_deficiency.hemoglobin.sd must be non-negative, got {}",
                hemoglobin.sd
            )));
        }
        // Feb 29 is not a valid yearly sample date.
        self.metrics.anemia_observer.sample_date.in_year(2019)?;
        for (risk, observer) in &self.metrics.risk_observers {
            observer.validate(risk)?;
        }
        Ok(())
    }

    /// Hex SHA-256 digest of the canonical JSON form.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
