use serde::Serialize;
use sqlns::observers::Metrics;

pub const POPULATION_HEADERS: [&str; 9] = [
    "simulant_id",
    "age",
    "alive",
    "entrance_time",
    "exit_time",
    "treatment_start",
    "treatment_end",
    "treatment_state",
    "hemoglobin",
];

#[derive(Default)]
pub struct SimulationOutput {
    pub steps: usize,
    pub metrics: Metrics,
    pub population: Vec<Vec<String>>,
}

impl SimulationOutput {
    pub fn metric_rows(&self) -> Vec<Vec<String>> {
        self.metrics
            .iter()
            .map(|(measure, value)| vec![measure.clone(), value.to_string()])
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct RunMetadata {
    pub seed: u64,
    pub replicate: u64,
    pub steps: usize,
    pub configuration_fingerprint: String,
}
