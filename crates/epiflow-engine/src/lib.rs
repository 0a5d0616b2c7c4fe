//! Discrete-time compartmental integrator.
//!
//! Takes a validated framework plus a parameter set and evolves every
//! population synchronously across the simulation time vector: parameters
//! resolve in declaration order, link flows are rescaled so no compartment
//! is driven negative, junctions flush to zero within each step, and timed
//! compartments advance their duration bins. The outcome is an immutable
//! [`SimResult`]; any inconsistency aborts the run with an error naming the
//! population, entity and step.

pub mod batch;
pub mod compartment;
pub mod config;
pub mod error;
pub mod initialization;
pub mod integrator;
pub mod link;
pub mod overlay;
pub mod population;
pub mod result;

pub use batch::{run_batch, run_batch_with_overlays};
pub use config::SimConfig;
pub use error::{NumericalError, NumericalKind, SimulationError};
pub use integrator::{EngineState, Integrator};
pub use overlay::{ConstantOverlay, OverlayError, ParOverride, ParameterOverlay, StepView};
pub use result::{PopResult, SeriesGroup, SimResult};

use epiflow_core::{Framework, ParameterSet};

/// Build and run an integrator in one call.
pub fn simulate(
    framework: &Framework,
    parset: &ParameterSet,
    config: SimConfig,
) -> Result<SimResult, SimulationError> {
    Integrator::new(framework, parset, config)?.run()
}
