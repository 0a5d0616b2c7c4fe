//! Type definitions for the program layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use epiflow_core::TimeSeries;

/// How per-program coverages combine when several programs target the same
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageInteraction {
    /// Deltas sum; coverages rescale if they total more than 1.
    Additive,
    /// Programs reach people independently; overlap follows from
    /// statistical independence.
    Random,
    /// Nested targeting: the highest-priority program covering a person
    /// determines their outcome.
    Nested,
}

/// A funded intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    pub label: String,
    /// Compartments whose occupants this program can reach.
    pub target_compartments: Vec<String>,
    /// Populations the program operates in.
    pub target_populations: Vec<String>,
    /// Baseline annual spending.
    pub spend: TimeSeries,
    /// Cost per person reached per year.
    pub unit_cost: TimeSeries,
    /// Maximum people reached per year, regardless of spending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<TimeSeries>,
    /// Direct coverage data; when present it bypasses the spend
    /// computation entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<TimeSeries>,
}

/// Coverage-to-outcome mapping for one (parameter, population): the value
/// the parameter takes with no coverage, and the value each program drives
/// it towards. Listing order of `outcomes` is the nested-mode priority,
/// first entry highest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Covout {
    pub parameter: String,
    pub population: String,
    pub baseline: f64,
    pub outcomes: Vec<(String, f64)>,
    pub interaction: CoverageInteraction,
}

/// A bundle of programs and their outcome mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramSet {
    pub name: String,
    pub programs: Vec<Program>,
    pub covouts: Vec<Covout>,
}

impl ProgramSet {
    pub fn program(&self, id: &str) -> Option<&Program> {
        self.programs.iter().find(|p| p.id == id)
    }
}

/// Time-indexed overwrites applied when running with programs: the years
/// the programs operate, and optional spending/coverage/capacity series
/// replacing each program's baseline data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramInstructions {
    pub start_year: f64,
    pub stop_year: f64,
    #[serde(default)]
    pub spending: HashMap<String, TimeSeries>,
    #[serde(default)]
    pub coverage: HashMap<String, TimeSeries>,
    #[serde(default)]
    pub capacity: HashMap<String, TimeSeries>,
}

impl ProgramInstructions {
    pub fn new(start_year: f64, stop_year: f64) -> Self {
        Self {
            start_year,
            stop_year,
            spending: HashMap::new(),
            coverage: HashMap::new(),
            capacity: HashMap::new(),
        }
    }
}

/// Problems detected while wiring programs to a framework — always raised
/// at construction, before any stepping.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("duplicate program '{0}'")]
    DuplicateProgram(String),
    #[error("program '{program}' targets unknown population '{population}'")]
    UnknownPopulation { program: String, population: String },
    #[error("program '{program}' targets unknown compartment '{compartment}'")]
    UnknownCompartment {
        program: String,
        compartment: String,
    },
    #[error("coverage outcome for '{parameter}' targets unknown parameter")]
    UnknownParameter { parameter: String },
    #[error("coverage outcome references unknown program '{program}'")]
    UnknownProgram { program: String },
    #[error("duplicate coverage outcome for parameter '{parameter}' in population '{population}'")]
    DuplicateCovout {
        parameter: String,
        population: String,
    },
    #[error("program '{0}' has neither unit cost data nor coverage data")]
    MissingUnitCost(String),
    #[error("instructions reference unknown program '{0}'")]
    InstructionUnknownProgram(String),
}
