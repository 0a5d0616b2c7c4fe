//! Core data model for epiflow.
//!
//! This crate holds everything the integrator consumes read-only: sparse
//! [`TimeSeries`] storage with monotone cubic interpolation, the declarative
//! [`Framework`] topology with its structural validation, per-population
//! [`ParameterSet`] data, and formula evaluation for function parameters.
//! The stepping engine lives in `epiflow-engine`; the program coverage layer
//! in `epiflow-programs`.

pub mod expression;
pub mod framework;
pub mod parameters;
pub mod time_series;
pub mod validation;

pub use expression::{EvalContext, Expression, ExpressionError};
pub use framework::{
    Cascade, CascadeStage, CharacteristicSpec, CompartmentKind, CompartmentSpec, Framework,
    InteractionSpec, ParameterFormat, ParameterFunction, ParameterSpec, TransferSpec,
    TransitionSpec,
};
pub use parameters::{ParData, ParameterSet, ParameterSetError, PopulationDef};
pub use time_series::{TimeSeries, TimeSeriesError, TIME_TOLERANCE};
pub use validation::FrameworkValidationError;
