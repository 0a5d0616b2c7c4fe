//! Parameter sets: the per-population data feeding a framework.
//!
//! A [`ParameterSet`] pairs a framework with populations and their
//! time-indexed data: one [`TimeSeries`] per (parameter, population),
//! calibration scale factors, initialization values for databook-flagged
//! compartments/characteristics, transfer data and interaction weights.
//!
//! Parameter sets are plain values: batch runs clone one per sample, so a
//! worker never shares mutable state with another run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::time_series::{TimeSeries, TimeSeriesError};

/// A modeled population group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationDef {
    /// Short code name, used for lookups.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Populations of the same type are transfer-compatible.
    pub pop_type: String,
}

/// Per-parameter data across populations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParData {
    /// Population id -> time series.
    pub data: HashMap<String, TimeSeries>,
    /// Per-population calibration multiplier (default 1.0).
    #[serde(default)]
    pub y_factor: HashMap<String, f64>,
    /// Parameter-wide calibration multiplier.
    #[serde(default = "one")]
    pub meta_y_factor: f64,
}

fn one() -> f64 {
    1.0
}

impl Default for ParData {
    fn default() -> Self {
        Self {
            data: HashMap::new(),
            y_factor: HashMap::new(),
            meta_y_factor: one(),
        }
    }
}

impl ParData {
    pub fn y_factor(&self, pop: &str) -> f64 {
        self.y_factor.get(pop).copied().unwrap_or(1.0)
    }
}

/// Errors raised when reading a parameter set.
#[derive(Debug, thiserror::Error)]
pub enum ParameterSetError {
    #[error("no data for parameter '{parameter}' in population '{population}'")]
    MissingParameter {
        parameter: String,
        population: String,
    },
    #[error("no initial value for '{entity}' in population '{population}'")]
    MissingInitial { entity: String, population: String },
    #[error("parameter '{parameter}', population '{population}': {source}")]
    Series {
        parameter: String,
        population: String,
        source: TimeSeriesError,
    },
}

/// All population-level inputs for one simulation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    pub name: String,
    pub populations: Vec<PopulationDef>,
    /// Parameter id -> per-population data. Function parameters carry no
    /// entry here.
    pub pars: HashMap<String, ParData>,
    /// Initialization values: compartment/characteristic id -> population ->
    /// series sampled at the simulation start.
    #[serde(default)]
    pub initial: HashMap<String, HashMap<String, TimeSeries>>,
    /// Transfer id -> source population -> destination population -> series.
    #[serde(default)]
    pub transfers: HashMap<String, HashMap<String, HashMap<String, TimeSeries>>>,
    /// Interaction id -> from population -> to population -> weight series.
    #[serde(default)]
    pub interactions: HashMap<String, HashMap<String, HashMap<String, TimeSeries>>>,
}

impl ParameterSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn population(&self, id: &str) -> Option<&PopulationDef> {
        self.populations.iter().find(|p| p.id == id)
    }

    /// Insert or replace the series for (parameter, population).
    pub fn set_data(&mut self, parameter: &str, population: &str, series: TimeSeries) {
        self.pars
            .entry(parameter.to_string())
            .or_default()
            .data
            .insert(population.to_string(), series);
    }

    pub fn get_data(&self, parameter: &str, population: &str) -> Option<&TimeSeries> {
        self.pars.get(parameter)?.data.get(population)
    }

    pub fn set_y_factor(&mut self, parameter: &str, population: &str, factor: f64) {
        self.pars
            .entry(parameter.to_string())
            .or_default()
            .y_factor
            .insert(population.to_string(), factor);
    }

    pub fn set_meta_y_factor(&mut self, parameter: &str, factor: f64) {
        self.pars.entry(parameter.to_string()).or_default().meta_y_factor = factor;
    }

    /// Interpolate (parameter, population) onto `tvec` and apply the
    /// calibration factors `y_factor[pop] * meta_y_factor`.
    pub fn sample_scaled(
        &self,
        parameter: &str,
        population: &str,
        tvec: &[f64],
    ) -> Result<Vec<f64>, ParameterSetError> {
        let par_data = self
            .pars
            .get(parameter)
            .ok_or_else(|| ParameterSetError::MissingParameter {
                parameter: parameter.to_string(),
                population: population.to_string(),
            })?;
        let series =
            par_data
                .data
                .get(population)
                .ok_or_else(|| ParameterSetError::MissingParameter {
                    parameter: parameter.to_string(),
                    population: population.to_string(),
                })?;
        let scale = par_data.y_factor(population) * par_data.meta_y_factor;
        let mut values = series
            .interpolate(tvec)
            .map_err(|source| ParameterSetError::Series {
                parameter: parameter.to_string(),
                population: population.to_string(),
                source,
            })?;
        for v in &mut values {
            *v *= scale;
        }
        Ok(values)
    }

    /// Set the initialization series for a databook-flagged entity.
    pub fn set_initial(&mut self, entity: &str, population: &str, series: TimeSeries) {
        self.initial
            .entry(entity.to_string())
            .or_default()
            .insert(population.to_string(), series);
    }

    /// Initial value of a compartment/characteristic at the simulation start.
    pub fn initial_value(
        &self,
        entity: &str,
        population: &str,
        t0: f64,
    ) -> Result<f64, ParameterSetError> {
        let series = self
            .initial
            .get(entity)
            .and_then(|pops| pops.get(population))
            .ok_or_else(|| ParameterSetError::MissingInitial {
                entity: entity.to_string(),
                population: population.to_string(),
            })?;
        series.sample(t0).map_err(|source| ParameterSetError::Series {
            parameter: entity.to_string(),
            population: population.to_string(),
            source,
        })
    }

    pub fn set_transfer(
        &mut self,
        transfer: &str,
        from_pop: &str,
        to_pop: &str,
        series: TimeSeries,
    ) {
        self.transfers
            .entry(transfer.to_string())
            .or_default()
            .entry(from_pop.to_string())
            .or_default()
            .insert(to_pop.to_string(), series);
    }

    pub fn transfer_data(
        &self,
        transfer: &str,
        from_pop: &str,
        to_pop: &str,
    ) -> Option<&TimeSeries> {
        self.transfers.get(transfer)?.get(from_pop)?.get(to_pop)
    }

    pub fn set_interaction(
        &mut self,
        interaction: &str,
        from_pop: &str,
        to_pop: &str,
        series: TimeSeries,
    ) {
        self.interactions
            .entry(interaction.to_string())
            .or_default()
            .entry(from_pop.to_string())
            .or_default()
            .insert(to_pop.to_string(), series);
    }

    pub fn interaction_data(
        &self,
        interaction: &str,
        from_pop: &str,
        to_pop: &str,
    ) -> Option<&TimeSeries> {
        self.interactions.get(interaction)?.get(from_pop)?.get(to_pop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_scaled_applies_both_factors() {
        let mut ps = ParameterSet::new("default");
        ps.set_data("foi", "adults", TimeSeries::from_assumption(0.2, None));
        ps.set_y_factor("foi", "adults", 2.0);
        ps.set_meta_y_factor("foi", 3.0);
        let out = ps.sample_scaled("foi", "adults", &[2020.0]).unwrap();
        assert!((out[0] - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_parameter_is_error() {
        let ps = ParameterSet::new("default");
        assert!(matches!(
            ps.sample_scaled("ghost", "adults", &[2020.0]),
            Err(ParameterSetError::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_initial_value_sampled_at_start() {
        let mut ps = ParameterSet::new("default");
        let series = TimeSeries::from_pairs([(2000.0, 100.0), (2010.0, 200.0)]).unwrap();
        ps.set_initial("sus", "adults", series);
        let v = ps.initial_value("sus", "adults", 2000.0).unwrap();
        assert!((v - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut ps = ParameterSet::new("default");
        ps.set_data("foi", "adults", TimeSeries::from_assumption(0.2, None));
        let mut copy = ps.clone();
        copy.set_meta_y_factor("foi", 10.0);
        assert_eq!(ps.pars["foi"].meta_y_factor, 1.0);
    }
}
