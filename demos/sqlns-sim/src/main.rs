pub mod model;
pub mod output;
pub mod parameters;

use std::error::Error;

use log::info;
use sqlns::{Configuration, RunContext};

use model::SqlnsModel;
use output::{POPULATION_HEADERS, RunMetadata};
use parameters::Parameters;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let ctx = RunContext::<Parameters>::load()?;
    let parameters = ctx.input.clone().ok_or("missing run input")?;

    // Inline configuration, else a configuration file, else defaults.
    let configuration = match (&parameters.configuration, ctx.file("configuration")) {
        (Some(configuration), _) => configuration.clone(),
        (None, Some(path)) => {
            info!("loading configuration from {}", path.display());
            Configuration::from_toml_path(path)?
        }
        (None, None) => Configuration::default(),
    };
    let fingerprint = configuration.fingerprint()?;
    info!(
        "replicate {} with seed {}, configuration {fingerprint}",
        ctx.replicate, ctx.seed
    );

    let output = SqlnsModel::simulate(&parameters, configuration, ctx.seed)?;

    ctx.write_csv("sqlns_metrics.csv", &["measure", "value"], &output.metric_rows())?;
    ctx.write_csv("sqlns_population.csv", &POPULATION_HEADERS, &output.population)?;
    ctx.write_json(
        "run_metadata.json",
        &RunMetadata {
            seed: ctx.seed,
            replicate: ctx.replicate,
            steps: output.steps,
            configuration_fingerprint: fingerprint,
        },
    )?;
    Ok(())
}
