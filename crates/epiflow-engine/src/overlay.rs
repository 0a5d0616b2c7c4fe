//! Parameter overlays.
//!
//! An overlay replaces computed parameter values with externally-derived
//! ones — the program coverage layer is the one shipped in this workspace.
//! Overrides are collected once per step, before the declaration-order
//! parameter sweep, so later function parameters see the overridden values
//! of their dependencies; unit conversion happens after, as with any other
//! parameter value.

use std::collections::HashMap;

use crate::population::Population;

/// One replaced parameter value.
#[derive(Debug, Clone)]
pub struct ParOverride {
    pub parameter: String,
    pub population: String,
    pub value: f64,
}

/// Read-only view of current-step state, handed to overlays.
pub struct StepView<'a> {
    pops: &'a [Population],
    step: usize,
    time: f64,
    dt: f64,
}

impl<'a> StepView<'a> {
    pub(crate) fn new(pops: &'a [Population], step: usize, time: f64, dt: f64) -> Self {
        Self {
            pops,
            step,
            time,
            dt,
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn population_ids(&self) -> impl Iterator<Item = &str> {
        self.pops.iter().map(|p| p.id.as_str())
    }

    /// Current stock of a compartment, if it exists.
    pub fn stock(&self, population: &str, compartment: &str) -> Option<f64> {
        let pop = self.pops.iter().find(|p| p.id == population)?;
        let idx = *pop.comp_lookup.get(compartment)?;
        Some(pop.comps[idx].stock[self.step])
    }

    /// Sum of stocks over (population, compartment) pairs, skipping unknown
    /// pairs.
    pub fn total_stock<'b>(
        &self,
        pairs: impl Iterator<Item = (&'b str, &'b str)>,
    ) -> f64 {
        pairs
            .filter_map(|(pop, comp)| self.stock(pop, comp))
            .sum()
    }
}

/// Source of per-step parameter overrides.
pub trait ParameterOverlay: Send + Sync {
    /// Produce the overrides for this step. Returning an error aborts the
    /// run.
    fn overrides(&self, view: &StepView) -> Result<Vec<ParOverride>, OverlayError>;
}

/// Failure inside an overlay; wrapped by the engine with the step index.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct OverlayError(pub String);

/// Fixed overrides keyed by (parameter, population), applied at every step.
/// Used in tests and for simple what-if scenarios.
#[derive(Debug, Clone, Default)]
pub struct ConstantOverlay {
    values: HashMap<(String, String), f64>,
}

impl ConstantOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, parameter: &str, population: &str, value: f64) {
        self.values
            .insert((parameter.to_string(), population.to_string()), value);
    }
}

impl ParameterOverlay for ConstantOverlay {
    fn overrides(&self, _view: &StepView) -> Result<Vec<ParOverride>, OverlayError> {
        Ok(self
            .values
            .iter()
            .map(|((parameter, population), value)| ParOverride {
                parameter: parameter.clone(),
                population: population.clone(),
                value: *value,
            })
            .collect())
    }
}
