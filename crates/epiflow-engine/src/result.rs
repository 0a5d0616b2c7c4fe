//! The frozen output of a run.
//!
//! A [`SimResult`] holds, per population, the recorded arrays for every
//! compartment, characteristic, parameter and link, aligned to the
//! simulation time vector, with name-based lookup. It is assembled once
//! when the integrator finalizes and never mutated.

use std::collections::HashMap;

use crate::config::SimConfig;
use crate::error::SimulationError;
use crate::population::Population;

/// A group of named series of equal length.
#[derive(Debug, Clone, Default)]
pub struct SeriesGroup {
    names: Vec<String>,
    values: Vec<Vec<f64>>,
    lookup: HashMap<String, usize>,
}

impl SeriesGroup {
    fn from_entries(entries: Vec<(String, Vec<f64>)>) -> Self {
        let mut group = Self::default();
        for (name, values) in entries {
            group.lookup.insert(name.clone(), group.names.len());
            group.names.push(name);
            group.values.push(values);
        }
        group
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.lookup.get(name).map(|&idx| self.values[idx].as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Vec::as_slice))
    }
}

/// Recorded arrays for one population.
#[derive(Debug, Clone)]
pub struct PopResult {
    pub id: String,
    /// Compartment stocks per step.
    pub compartments: SeriesGroup,
    /// Characteristic values per step.
    pub characteristics: SeriesGroup,
    /// Resolved parameter values per step, in declared units.
    pub parameters: SeriesGroup,
    /// Link flows: people moved between step t and t+1, recorded at t.
    pub links: SeriesGroup,
}

/// Immutable result of a completed run.
#[derive(Debug, Clone)]
pub struct SimResult {
    tvec: Vec<f64>,
    config: SimConfig,
    pops: Vec<PopResult>,
    lookup: HashMap<String, usize>,
}

impl SimResult {
    pub(crate) fn assemble(tvec: Vec<f64>, config: SimConfig, pops: Vec<Population>) -> Self {
        let mut out = Vec::with_capacity(pops.len());
        let mut lookup = HashMap::new();
        for pop in pops {
            lookup.insert(pop.id.clone(), out.len());
            out.push(PopResult {
                id: pop.id,
                compartments: SeriesGroup::from_entries(
                    pop.comps
                        .into_iter()
                        .map(|c| (c.id, c.stock))
                        .collect(),
                ),
                characteristics: SeriesGroup::from_entries(
                    pop.characs
                        .into_iter()
                        .map(|c| (c.id, c.values))
                        .collect(),
                ),
                parameters: SeriesGroup::from_entries(
                    pop.pars
                        .into_iter()
                        .map(|p| (p.id, p.values))
                        .collect(),
                ),
                links: SeriesGroup::from_entries(
                    pop.links.into_iter().map(|l| (l.id, l.flow)).collect(),
                ),
            });
        }
        Self {
            tvec,
            config,
            pops: out,
            lookup,
        }
    }

    /// The simulation time vector.
    pub fn tvec(&self) -> &[f64] {
        &self.tvec
    }

    pub fn dt(&self) -> f64 {
        self.config.dt
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn populations(&self) -> impl Iterator<Item = &PopResult> {
        self.pops.iter()
    }

    pub fn population(&self, id: &str) -> Result<&PopResult, SimulationError> {
        self.lookup
            .get(id)
            .map(|&idx| &self.pops[idx])
            .ok_or_else(|| SimulationError::UnknownName(id.to_string()))
    }

    /// Stock array of one compartment.
    pub fn compartment(&self, pop: &str, comp: &str) -> Result<&[f64], SimulationError> {
        self.population(pop)?
            .compartments
            .get(comp)
            .ok_or_else(|| SimulationError::UnknownName(comp.to_string()))
    }

    pub fn characteristic(&self, pop: &str, charac: &str) -> Result<&[f64], SimulationError> {
        self.population(pop)?
            .characteristics
            .get(charac)
            .ok_or_else(|| SimulationError::UnknownName(charac.to_string()))
    }

    /// Resolved values of one parameter, in its declared units.
    pub fn parameter(&self, pop: &str, par: &str) -> Result<&[f64], SimulationError> {
        self.population(pop)?
            .parameters
            .get(par)
            .ok_or_else(|| SimulationError::UnknownName(par.to_string()))
    }

    /// Per-step flow of one link.
    pub fn link_flow(&self, pop: &str, link: &str) -> Result<&[f64], SimulationError> {
        self.population(pop)?
            .links
            .get(link)
            .ok_or_else(|| SimulationError::UnknownName(link.to_string()))
    }
}
