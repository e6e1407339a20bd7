use serde::Deserialize;
use sqlns::Configuration;
use sqlns::config::AgeRange;

#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    pub population_size: usize,
    /// Initial ages are uniform over this range, in years.
    #[serde(default = "default_initial_age")]
    pub initial_age: AgeRange,
    /// Deaths per person-year.
    #[serde(default)]
    pub mortality_rate: f64,
    /// Newborns added at the start of each step.
    #[serde(default)]
    pub births_per_step: usize,
    /// Inline configuration; takes precedence over a configuration file.
    #[serde(default)]
    pub configuration: Option<Configuration>,
}

fn default_initial_age() -> AgeRange {
    AgeRange {
        start: 0.0,
        end: 5.0,
    }
}
