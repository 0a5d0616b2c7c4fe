//! The coverage layer: wiring programs to an engine run.
//!
//! [`CoverageLayer`] validates a [`ProgramSet`] + [`ProgramInstructions`]
//! against a framework and its populations at construction, then acts as a
//! [`ParameterOverlay`]: each step it converts spending into people
//! reached, people reached into coverage of the eligible population, and
//! combines per-program coverages into effective parameter values.

use std::collections::HashMap;

use epiflow_core::{Framework, PopulationDef, TimeSeries};
use epiflow_engine::{OverlayError, ParOverride, ParameterOverlay, StepView};

use crate::coverage::combine;
use crate::types::{
    ConfigurationError, Covout, Program, ProgramInstructions, ProgramSet,
};

/// A validated program layer, ready to attach to an integrator.
#[derive(Debug)]
pub struct CoverageLayer {
    programs: Vec<Program>,
    covouts: Vec<Covout>,
    instructions: ProgramInstructions,
}

impl CoverageLayer {
    /// Validate and build. Every target must resolve against the framework
    /// and population list; failures here are configuration errors raised
    /// before any stepping.
    pub fn new(
        progset: ProgramSet,
        instructions: ProgramInstructions,
        framework: &Framework,
        populations: &[PopulationDef],
    ) -> Result<Self, ConfigurationError> {
        let mut seen = HashMap::new();
        for program in &progset.programs {
            if seen.insert(program.id.clone(), ()).is_some() {
                return Err(ConfigurationError::DuplicateProgram(program.id.clone()));
            }
            for pop in &program.target_populations {
                if !populations.iter().any(|p| &p.id == pop) {
                    return Err(ConfigurationError::UnknownPopulation {
                        program: program.id.clone(),
                        population: pop.clone(),
                    });
                }
            }
            for comp in &program.target_compartments {
                if framework.compartment(comp).is_none() {
                    return Err(ConfigurationError::UnknownCompartment {
                        program: program.id.clone(),
                        compartment: comp.clone(),
                    });
                }
            }
            let has_coverage = program.coverage.is_some()
                || instructions.coverage.contains_key(&program.id);
            if !has_coverage && !program.unit_cost.has_data() {
                return Err(ConfigurationError::MissingUnitCost(program.id.clone()));
            }
        }

        let mut covout_seen = HashMap::new();
        for covout in &progset.covouts {
            if framework.parameter(&covout.parameter).is_none() {
                return Err(ConfigurationError::UnknownParameter {
                    parameter: covout.parameter.clone(),
                });
            }
            if !populations.iter().any(|p| p.id == covout.population) {
                return Err(ConfigurationError::UnknownPopulation {
                    program: covout.parameter.clone(),
                    population: covout.population.clone(),
                });
            }
            if covout_seen
                .insert((covout.parameter.clone(), covout.population.clone()), ())
                .is_some()
            {
                return Err(ConfigurationError::DuplicateCovout {
                    parameter: covout.parameter.clone(),
                    population: covout.population.clone(),
                });
            }
            for (program_id, _) in &covout.outcomes {
                if progset.program(program_id).is_none() {
                    return Err(ConfigurationError::UnknownProgram {
                        program: program_id.clone(),
                    });
                }
            }
        }

        for id in instructions
            .spending
            .keys()
            .chain(instructions.coverage.keys())
            .chain(instructions.capacity.keys())
        {
            if progset.program(id).is_none() {
                return Err(ConfigurationError::InstructionUnknownProgram(id.clone()));
            }
        }

        Ok(Self {
            programs: progset.programs,
            covouts: progset.covouts,
            instructions,
        })
    }

    /// Fraction of its eligible population a program reaches at this step.
    fn program_coverage(
        &self,
        program: &Program,
        view: &StepView,
    ) -> Result<f64, OverlayError> {
        let t = view.time();
        let sample = |series: &TimeSeries, what: &str| {
            series.sample(t).map_err(|e| {
                OverlayError(format!("program '{}' {what}: {e}", program.id))
            })
        };

        // Direct coverage data bypasses the spend computation.
        if let Some(series) = self
            .instructions
            .coverage
            .get(&program.id)
            .or(program.coverage.as_ref())
        {
            return Ok(sample(series, "coverage")?.clamp(0.0, 1.0));
        }

        let spend_series = self
            .instructions
            .spending
            .get(&program.id)
            .unwrap_or(&program.spend);
        let spend = sample(spend_series, "spending")?;
        let unit_cost = sample(&program.unit_cost, "unit cost")?;
        if unit_cost <= 0.0 {
            return Err(OverlayError(format!(
                "program '{}' has non-positive unit cost {unit_cost}",
                program.id
            )));
        }
        let mut reached = spend / unit_cost;
        let capacity_series = self
            .instructions
            .capacity
            .get(&program.id)
            .or(program.capacity.as_ref());
        if let Some(series) = capacity_series {
            reached = reached.min(sample(series, "capacity")?);
        }

        let eligible = view.total_stock(program.target_populations.iter().flat_map(|pop| {
            program
                .target_compartments
                .iter()
                .map(move |comp| (pop.as_str(), comp.as_str()))
        }));
        if eligible <= 0.0 {
            return Ok(0.0);
        }
        Ok((reached / eligible).clamp(0.0, 1.0))
    }
}

impl ParameterOverlay for CoverageLayer {
    fn overrides(&self, view: &StepView) -> Result<Vec<ParOverride>, OverlayError> {
        let t = view.time();
        if t < self.instructions.start_year || t > self.instructions.stop_year {
            return Ok(Vec::new());
        }

        let mut coverages = HashMap::new();
        for program in &self.programs {
            coverages.insert(program.id.as_str(), self.program_coverage(program, view)?);
        }

        let mut overrides = Vec::with_capacity(self.covouts.len());
        for covout in &self.covouts {
            let entries: Vec<(f64, f64)> = covout
                .outcomes
                .iter()
                .map(|(program_id, outcome)| (coverages[program_id.as_str()], *outcome))
                .collect();
            let value = combine(covout.baseline, &entries, covout.interaction);
            overrides.push(ParOverride {
                parameter: covout.parameter.clone(),
                population: covout.population.clone(),
                value,
            });
        }
        Ok(overrides)
    }
}
