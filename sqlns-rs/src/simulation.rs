use chrono::NaiveDateTime;
use log::{debug, info};

use crate::anemia::{AnemiaSeverity, Hemoglobin};
use crate::clock::{self, Clock, TimeStep};
use crate::config::Configuration;
use crate::effect::{Target, TreatmentEffect};
use crate::error::Result;
use crate::observers::{AnemiaObserver, DisabilityObserver, Metrics, RiskObserver, TreatmentObserver};
use crate::population::{Population, SimulantId};
use crate::treatment::{SimState, TreatmentAlgorithm};

pub const HEMOGLOBIN_PIPELINE: &str = "iron_deficiency.exposure";

/// Category of each simulant for a categorical risk the host models.
pub type CategoricalExposure = Box<dyn Fn(&Population, &[SimulantId]) -> Result<Vec<String>>>;

pub struct Simulation {
    configuration: Configuration,
    clock: Clock,
    end: NaiveDateTime,
    sim_state: SimState,
    population: Population,
    treatment: TreatmentAlgorithm,
    effects: Vec<TreatmentEffect>,
    hemoglobin: Hemoglobin,
    anemia_observer: AnemiaObserver,
    treatment_observer: TreatmentObserver,
    disability_observer: DisabilityObserver,
    risk_observers: Vec<(RiskObserver, CategoricalExposure)>,
    steps: usize,
}

impl Simulation {
    pub fn setup(configuration: Configuration, seed: u64) -> Result<Self> {
        configuration.validate()?;

        let start = configuration.time.start.to_datetime()?;
        let end = configuration.time.end.to_datetime()?;
        let clock = Clock::new(start, clock::days(configuration.time.step_size)?);

        let sqlns = &configuration.sqlns;
        let treatment = TreatmentAlgorithm::setup(sqlns, seed)?;
        let mut effects = Vec::with_capacity(sqlns.targets.len());
        for target in &sqlns.targets {
            effects.push(TreatmentEffect::setup(target.parse::<Target>()?, sqlns, seed)?);
        }
        let iron_deficiency = &configuration.iron_deficiency;
        let hemoglobin = Hemoglobin::setup(
            &iron_deficiency.hemoglobin,
            &iron_deficiency.disability_weights,
            seed,
        )?;
        let anemia_observer = AnemiaObserver::new(&configuration.metrics.anemia_observer);

        info!(
            "simulation set up from {start} to {end}; SQ-LNS starts {}",
            treatment.start_date()
        );
        Ok(Self {
            configuration,
            clock,
            end,
            sim_state: SimState::Setup,
            population: Population::new(),
            treatment,
            effects,
            hemoglobin,
            anemia_observer,
            treatment_observer: TreatmentObserver::new(),
            disability_observer: DisabilityObserver::new(),
            risk_observers: Vec::new(),
            steps: 0,
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn treatment(&self) -> &TreatmentAlgorithm {
        &self.treatment
    }

    pub fn effects(&self) -> &[TreatmentEffect] {
        &self.effects
    }

    pub fn hemoglobin(&self) -> &Hemoglobin {
        &self.hemoglobin
    }

    pub fn is_finished(&self) -> bool {
        self.clock.now() >= self.end
    }

    /// Creates simulants at the current clock time and initializes every
    /// component's state for them.
    pub fn add_simulants(&mut self, ages: &[f64]) -> Result<Vec<SimulantId>> {
        let creation_time = self.clock.now();
        let ids = self.population.add_simulants(ages, creation_time);
        self.treatment.on_initialize_simulants(
            &mut self.population,
            &ids,
            creation_time,
            self.sim_state,
        )?;
        for effect in &mut self.effects {
            effect.on_initialize_simulants(&ids)?;
        }
        self.hemoglobin.on_initialize_simulants(&ids);
        Ok(ids)
    }

    /// Counts `risk` by category on its sample date, configured by
    /// `metrics.risk_observers.<risk>` when present.
    pub fn observe_risk<F>(&mut self, risk: &str, categorize: F)
    where
        F: Fn(&Population, &[SimulantId]) -> Result<Vec<String>> + 'static,
    {
        let config = self
            .configuration
            .metrics
            .risk_observers
            .get(risk)
            .cloned()
            .unwrap_or_default();
        let categorize: CategoricalExposure = Box::new(categorize);
        self.risk_observers
            .push((RiskObserver::new(risk, &config), categorize));
    }

    pub fn step(&mut self) -> Result<()> {
        self.step_with(|_, _| Ok(()))
    }

    /// Runs one time step. `on_time_step` runs after enrollment and before
    /// metrics are collected; the host uses it for mortality and the like.
    pub fn step_with<F>(&mut self, mut on_time_step: F) -> Result<()>
    where
        F: FnMut(&mut Population, &TimeStep) -> Result<()>,
    {
        self.sim_state = SimState::Running;
        let now = self.clock.now();
        let event = TimeStep::new(&self.clock, self.population.index());

        let enrolled = self
            .treatment
            .on_time_step(&mut self.population, now, &event)?;
        self.treatment_observer.on_enrolled(event.time, enrolled.len());

        on_time_step(&mut self.population, &event)?;

        self.collect_metrics(now, &event)?;

        self.population.age_by(event.step_size);
        self.clock.advance();
        self.steps += 1;
        debug!("step {} complete, clock at {}", self.steps, self.clock.now());
        Ok(())
    }

    /// Steps until the end date and returns the number of steps taken.
    pub fn run_with<F>(&mut self, mut on_time_step: F) -> Result<usize>
    where
        F: FnMut(&mut Population, &TimeStep) -> Result<()>,
    {
        let first = self.steps;
        while !self.is_finished() {
            self.step_with(&mut on_time_step)?;
        }
        info!(
            "simulation finished after {} steps at {}",
            self.steps - first,
            self.clock.now()
        );
        Ok(self.steps - first)
    }

    fn collect_metrics(&mut self, now: NaiveDateTime, event: &TimeStep) -> Result<()> {
        let ids = &event.index;
        let exposure = self.exposure(ids)?;
        let severity: Vec<AnemiaSeverity> =
            self.hemoglobin.severity(&self.population, ids, &exposure)?;
        let weights = self
            .hemoglobin
            .disability_weight(&self.population, ids, &exposure)?;

        self.anemia_observer
            .on_collect_metrics(&self.population, ids, &severity, now, event.time)?;
        self.treatment_observer
            .on_collect_metrics(&self.population, ids, now, event.time)?;
        self.disability_observer
            .on_collect_metrics(&weights, now, clock::in_years(event.step_size));
        for (observer, categorize) in &mut self.risk_observers {
            if observer.should_sample(now, event.time)? {
                let categories = categorize(&self.population, ids)?;
                observer.on_collect_metrics(&self.population, ids, &categories, now, event.time)?;
            }
        }
        Ok(())
    }

    /// Hemoglobin after any SQ-LNS effect on it.
    pub fn exposure(&self, ids: &[SimulantId]) -> Result<Vec<f64>> {
        let baseline = self.hemoglobin.baseline(ids)?;
        self.target_value(HEMOGLOBIN_PIPELINE, ids, baseline)
    }

    /// `base` modified by every effect on `pipeline` at the current time.
    pub fn target_value(
        &self,
        pipeline: &str,
        ids: &[SimulantId],
        base: Vec<f64>,
    ) -> Result<Vec<f64>> {
        let now = self.clock.now();
        self.effects
            .iter()
            .filter(|effect| effect.target().pipeline() == pipeline)
            .try_fold(base, |value, effect| {
                effect.adjust(&self.population, ids, now, &value)
            })
    }

    /// Simulants inside their treatment window right now.
    pub fn coverage(&self, ids: &[SimulantId]) -> Result<Vec<SimulantId>> {
        self.treatment
            .is_covered(&self.population, ids, self.clock.now())
    }

    pub fn metrics(&self) -> Metrics {
        let mut metrics = Metrics::new();
        self.anemia_observer.metrics(&mut metrics);
        self.treatment_observer.metrics(&mut metrics);
        self.disability_observer.metrics(&mut metrics);
        for (observer, _) in &self.risk_observers {
            observer.metrics(&mut metrics);
        }
        metrics
    }
}
