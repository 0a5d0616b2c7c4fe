//! Engine error types.
//!
//! Anything that goes wrong during stepping is a [`NumericalError`] carrying
//! the population, the entity (compartment, parameter or link) and the step
//! index it occurred at, so a failed run can be traced to a single model
//! quantity. [`SimulationError`] is the top-level type returned to callers;
//! no partially-integrated result is ever returned alongside one.

use epiflow_core::{FrameworkValidationError, ParameterSetError};

/// What went wrong numerically.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NumericalKind {
    #[error("value is not finite")]
    NonFinite,
    #[error("requested flow is negative ({0})")]
    NegativeFlow(f64),
    #[error("stock went negative ({0}) despite rescaling")]
    NegativeStock(f64),
    #[error("junction retains {0} after the bounded flush passes")]
    JunctionResidual(f64),
    #[error("duration bins diverge from total stock by {0}")]
    BinMismatch(f64),
    #[error("non-positive duration value ({0})")]
    NonPositiveDuration(f64),
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("{0}")]
    Evaluation(String),
}

/// A numerical failure during stepping (or initialization), with enough
/// context to name the offending quantity.
#[derive(Debug, Clone, thiserror::Error)]
#[error("population '{population}', '{entity}', step {step} (t={time}): {kind}")]
pub struct NumericalError {
    pub population: String,
    pub entity: String,
    pub step: usize,
    pub time: f64,
    pub kind: NumericalKind,
}

/// Top-level error for a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Framework(#[from] FrameworkValidationError),
    #[error(transparent)]
    Numerical(#[from] NumericalError),
    #[error(transparent)]
    ParameterSet(#[from] ParameterSetError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unknown population '{0}'")]
    UnknownPopulation(String),
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("parameter overlay failed at step {step}: {message}")]
    Overlay { step: usize, message: String },
}
