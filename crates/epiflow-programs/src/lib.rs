//! Program coverage layer for epiflow.
//!
//! Converts spending, coverage and capacity instructions into effective
//! parameter values: `people reached = min(spend / unit_cost, capacity)`,
//! `coverage = reached / eligible`, combined across programs by the covout
//! interaction mode (additive, random or nested) and applied to the engine
//! through its parameter-overlay seam.

pub mod coverage;
pub mod layer;
pub mod types;

pub use coverage::combine;
pub use layer::CoverageLayer;
pub use types::{
    ConfigurationError, CoverageInteraction, Covout, Program, ProgramInstructions, ProgramSet,
};
