use rand::{SeedableRng, distr::Distribution, rngs::StdRng};
use rand_distr::Uniform;
use sqlns::clock::{TimeStep, in_years};
use sqlns::population::Population;
use sqlns::randomness::RandomStream;
use sqlns::treatment::TreatmentState;
use sqlns::{Configuration, Result, Simulation, SqlnsError};

use crate::{output::SimulationOutput, parameters::Parameters};

pub struct SqlnsModel {}

impl SqlnsModel {
    pub fn simulate(
        parameters: &Parameters,
        configuration: Configuration,
        seed: u64,
    ) -> Result<SimulationOutput> {
        let mut sim = Simulation::setup(configuration, seed)?;

        let ages = Uniform::new_inclusive(parameters.initial_age.start, parameters.initial_age.end)
            .map_err(|e| SqlnsError::Input(format!("initial_age: {e}")))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let initial: Vec<f64> = (0..parameters.population_size)
            .map(|_| ages.sample(&mut rng))
            .collect();
        sim.add_simulants(&initial)?;

        let mortality = RandomStream::new("mortality", seed);
        let rate = parameters.mortality_rate;
        let mut on_time_step = |population: &mut Population, event: &TimeStep| -> Result<()> {
            if rate <= 0.0 {
                return Ok(());
            }
            // Constant hazard over the step.
            let probability = 1.0 - (-rate * in_years(event.step_size)).exp();
            let living = population.living(&event.index)?;
            for id in mortality.filter_for_probability(&living, probability, &event.time.to_string()) {
                population.mark_dead(id, event.time)?;
            }
            Ok(())
        };

        let mut steps = 0;
        while !sim.is_finished() {
            if parameters.births_per_step > 0 && steps > 0 {
                sim.add_simulants(&vec![0.0; parameters.births_per_step])?;
            }
            sim.step_with(&mut on_time_step)?;
            steps += 1;
        }

        let now = sim.clock().now();
        let index = sim.population().index();
        let hemoglobin = sim.exposure(&index)?;
        let population = sim
            .population()
            .iter()
            .zip(hemoglobin)
            .map(|((id, s), hb)| {
                let state = match TreatmentState::of(s, now) {
                    TreatmentState::NotEnrolled => "not_enrolled",
                    TreatmentState::Enrolled => "enrolled",
                    TreatmentState::Completed => "completed",
                };
                vec![
                    id.to_string(),
                    format!("{:.4}", s.age),
                    if s.is_alive() { "alive" } else { "dead" }.to_string(),
                    s.entrance_time.to_string(),
                    s.exit_time.map(|t| t.to_string()).unwrap_or_default(),
                    s.treatment_start.map(|t| t.to_string()).unwrap_or_default(),
                    s.treatment_end.map(|t| t.to_string()).unwrap_or_default(),
                    state.to_string(),
                    format!("{hb:.2}"),
                ]
            })
            .collect();

        Ok(SimulationOutput {
            steps,
            metrics: sim.metrics(),
            population,
        })
    }
}
