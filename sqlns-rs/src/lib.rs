//! SQ-LNS (small-quantity lipid-based nutrient supplement) intervention
//! components for a discrete-time child health microsimulation.

pub mod anemia;
pub mod clock;
pub mod config;
pub mod effect;
pub mod error;
pub mod observers;
pub mod population;
pub mod randomness;
pub mod run_context;
pub mod simulation;
pub mod treatment;

pub use config::Configuration;
pub use error::{Result, SqlnsError};
pub use run_context::RunContext;
pub use simulation::Simulation;
