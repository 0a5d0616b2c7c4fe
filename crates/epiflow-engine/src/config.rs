//! Simulation configuration.
//!
//! One immutable value constructed by the caller and passed into the
//! integrator. There is no module-level settings registry; two concurrent
//! runs with different configurations cannot interfere.

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Immutable run configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimConfig {
    /// First simulated time (years).
    pub start: f64,
    /// Last simulated time (inclusive, years).
    pub stop: f64,
    /// Step size (years).
    pub dt: f64,
    /// Absolute tolerance for conservation and junction-residual checks.
    pub tolerance: f64,
    /// Upper bound on duration bins per timed compartment; guards against a
    /// mistyped duration allocating an absurd bin count.
    pub max_timed_bins: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start: 2000.0,
            stop: 2035.0,
            dt: 0.25,
            tolerance: 1e-6,
            max_timed_bins: 1000,
        }
    }
}

impl SimConfig {
    /// Check the configuration and build the simulation time vector.
    pub fn time_vector(&self) -> Result<Vec<f64>, SimulationError> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(SimulationError::Config(format!(
                "step size must be positive, got {}",
                self.dt
            )));
        }
        if self.stop < self.start {
            return Err(SimulationError::Config(format!(
                "stop ({}) precedes start ({})",
                self.stop, self.start
            )));
        }
        let n_steps = ((self.stop - self.start) / self.dt).round() as usize + 1;
        Ok((0..n_steps)
            .map(|i| self.start + i as f64 * self.dt)
            .collect())
    }
}
