//! Thresholds are from the GBD 2016 anemia envelope definitions (GBD 2017
//! supplementary appendix 1, p. 763).

use std::collections::BTreeMap;
use std::fmt;

use rand::distr::Distribution;
use rand_distr::Normal;

use crate::config::{DisabilityWeights, HemoglobinConfig};
use crate::error::{Result, SqlnsError};
use crate::population::{Population, SimulantId};
use crate::randomness::RandomStream;

pub const HEMOGLOBIN_STREAM: &str = "initial_hemoglobin_propensity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnemiaSeverity {
    None,
    Mild,
    Moderate,
    Severe,
}

impl AnemiaSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }
}

impl fmt::Display for AnemiaSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper (exclusive) hemoglobin bounds, g/L, for one age group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnemiaThresholds {
    pub age_group_start: f64,
    pub age_group_end: f64,
    pub severe: f64,
    pub moderate: f64,
    pub mild: f64,
}

impl AnemiaThresholds {
    pub fn classify(&self, hemoglobin: f64) -> AnemiaSeverity {
        if hemoglobin < self.severe {
            AnemiaSeverity::Severe
        } else if hemoglobin < self.moderate {
            AnemiaSeverity::Moderate
        } else if hemoglobin < self.mild {
            AnemiaSeverity::Mild
        } else {
            AnemiaSeverity::None
        }
    }

    /// `0_to_1_month`-style label for metric names.
    pub fn age_group_name(&self) -> String {
        fn label(age: f64) -> String {
            if age == 0.0 {
                "0".to_string()
            } else if age < 1.0 {
                format!("{}_month", (age * 12.0).round())
            } else {
                format!("{age}_years")
            }
        }
        format!("{}_to_{}", label(self.age_group_start), label(self.age_group_end))
    }
}

pub const ANEMIA_THRESHOLDS: [AnemiaThresholds; 3] = [
    AnemiaThresholds {
        age_group_start: 0.0,
        age_group_end: 1.0 / 12.0,
        severe: 90.0,
        moderate: 130.0,
        mild: 150.0,
    },
    AnemiaThresholds {
        age_group_start: 1.0 / 12.0,
        age_group_end: 5.0,
        severe: 70.0,
        moderate: 100.0,
        mild: 110.0,
    },
    AnemiaThresholds {
        age_group_start: 5.0,
        age_group_end: 15.0,
        severe: 70.0,
        moderate: 100.0,
        mild: 115.0,
    },
];

pub fn thresholds_for_age(age: f64) -> &'static AnemiaThresholds {
    ANEMIA_THRESHOLDS
        .iter()
        .find(|t| age < t.age_group_end)
        .unwrap_or(&ANEMIA_THRESHOLDS[ANEMIA_THRESHOLDS.len() - 1])
}

pub fn classify(hemoglobin: f64, age: f64) -> AnemiaSeverity {
    thresholds_for_age(age).classify(hemoglobin)
}

/// Baseline hemoglobin for each simulant and the disability it implies.
#[derive(Debug, Clone)]
pub struct Hemoglobin {
    distribution: Normal<f64>,
    disability_weights: DisabilityWeights,
    hemoglobin: BTreeMap<SimulantId, f64>,
    randomness: RandomStream,
}

impl Hemoglobin {
    pub fn setup(
        config: &HemoglobinConfig,
        disability_weights: &DisabilityWeights,
        seed: u64,
    ) -> Result<Self> {
        let distribution = Normal::new(config.mean, config.sd).map_err(|e| {
            SqlnsError::Distribution(format!("hemoglobin Normal({}, {}): {e}", config.mean, config.sd))
        })?;
        Ok(Self {
            distribution,
            disability_weights: disability_weights.clone(),
            hemoglobin: BTreeMap::new(),
            randomness: RandomStream::new(HEMOGLOBIN_STREAM, seed),
        })
    }

    pub fn on_initialize_simulants(&mut self, ids: &[SimulantId]) {
        for &id in ids {
            let mut rng = self.randomness.rng(id, "");
            let draw: f64 = self.distribution.sample(&mut rng);
            self.hemoglobin.insert(id, draw.max(0.0));
        }
    }

    /// Unmodified exposure, g/L.
    pub fn baseline(&self, ids: &[SimulantId]) -> Result<Vec<f64>> {
        ids.iter()
            .map(|id| {
                self.hemoglobin
                    .get(id)
                    .copied()
                    .ok_or(SqlnsError::UnknownSimulant(*id))
            })
            .collect()
    }

    pub fn weight(&self, severity: AnemiaSeverity) -> f64 {
        match severity {
            AnemiaSeverity::None => 0.0,
            AnemiaSeverity::Mild => self.disability_weights.mild,
            AnemiaSeverity::Moderate => self.disability_weights.moderate,
            AnemiaSeverity::Severe => self.disability_weights.severe,
        }
    }

    /// Severity of each simulant given its (possibly modified) exposure.
    pub fn severity(
        &self,
        population: &Population,
        ids: &[SimulantId],
        exposure: &[f64],
    ) -> Result<Vec<AnemiaSeverity>> {
        if ids.len() != exposure.len() {
            return Err(SqlnsError::LengthMismatch {
                expected: ids.len(),
                actual: exposure.len(),
            });
        }
        ids.iter()
            .zip(exposure)
            .map(|(&id, &hb)| Ok(classify(hb, population.get(id)?.age)))
            .collect()
    }

    /// Disability weight of each simulant; zero for the dead.
    pub fn disability_weight(
        &self,
        population: &Population,
        ids: &[SimulantId],
        exposure: &[f64],
    ) -> Result<Vec<f64>> {
        let severity = self.severity(population, ids, exposure)?;
        ids.iter()
            .zip(severity)
            .map(|(&id, severity)| {
                let alive = population.get(id)?.is_alive();
                Ok(if alive { self.weight(severity) } else { 0.0 })
            })
            .collect()
    }
}
