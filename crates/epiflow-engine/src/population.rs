//! Runtime state for one population.
//!
//! Built once from the framework and parameter set, then mutated in place,
//! one step at a time, by the integrator. Compartments, parameters, links
//! and characteristics are stored densely and addressed by index; id-based
//! lookups exist for construction and the final result only.

use std::collections::HashMap;

use epiflow_core::{
    CompartmentKind, EvalContext, Expression, Framework, ParameterFormat, ParameterFunction,
    ParameterSet, PopulationDef,
};

use crate::compartment::{Compartment, CompartmentVariant, TimedBins};
use crate::error::{NumericalError, NumericalKind, SimulationError};
use crate::link::Link;

/// Cross-population combination rule for aggregation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Average,
    Sum,
}

/// Where a parameter's per-step value comes from.
#[derive(Debug, Clone)]
pub enum ParSource {
    /// Scaled interpolation of databook data, precomputed over the whole
    /// time vector.
    Data(Vec<f64>),
    /// Formula over earlier-declared quantities of the same population.
    Function {
        expr: Expression,
        dependencies: Vec<String>,
        scale: f64,
    },
    /// Interaction-weighted combination of another parameter across
    /// populations.
    Aggregation {
        kind: AggregationKind,
        parameter: usize,
        interaction: String,
        scale: f64,
    },
}

/// A parameter's runtime state: resolved values in declared units.
#[derive(Debug, Clone)]
pub struct ParState {
    pub id: String,
    pub format: ParameterFormat,
    pub source: ParSource,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub values: Vec<f64>,
}

/// A characteristic component: either a compartment or another
/// characteristic (resolved earlier in `charac_order`).
#[derive(Debug, Clone, Copy)]
pub enum ComponentRef {
    Compartment(usize),
    Characteristic(usize),
}

/// A characteristic's runtime state.
#[derive(Debug, Clone)]
pub struct CharacState {
    pub id: String,
    pub components: Vec<ComponentRef>,
    pub denominator: Option<ComponentRef>,
    pub values: Vec<f64>,
}

/// All runtime state for one population.
#[derive(Debug, Clone)]
pub struct Population {
    pub id: String,
    pub pop_type: String,
    pub comps: Vec<Compartment>,
    pub comp_lookup: HashMap<String, usize>,
    pub links: Vec<Link>,
    pub out_links: Vec<Vec<usize>>,
    pub in_links: Vec<Vec<usize>>,
    pub pars: Vec<ParState>,
    pub par_lookup: HashMap<String, usize>,
    pub characs: Vec<CharacState>,
    pub charac_lookup: HashMap<String, usize>,
    /// Characteristic indices in dependency order.
    pub charac_order: Vec<usize>,
    pub n_junctions: usize,
}

impl Population {
    pub fn build(
        framework: &Framework,
        parset: &ParameterSet,
        pop: &PopulationDef,
        tvec: &[f64],
        dt: f64,
        max_timed_bins: usize,
    ) -> Result<Self, SimulationError> {
        let n_steps = tvec.len();
        let comp_lookup = framework.compartment_lookup();

        let par_lookup: HashMap<String, usize> = framework
            .parameters
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.id.clone(), idx))
            .collect();

        // Links first; timed compartments need their flush link index.
        let mut links = Vec::with_capacity(framework.transitions.len());
        for tr in &framework.transitions {
            let link = Link::new(
                tr.id.clone(),
                comp_lookup[&tr.source],
                comp_lookup[&tr.dest],
                par_lookup[&tr.parameter],
                n_steps,
            );
            links.push(link);
        }

        let mut comps = Vec::with_capacity(framework.compartments.len());
        for spec in &framework.compartments {
            let variant = match &spec.kind {
                CompartmentKind::Plain => CompartmentVariant::Plain,
                CompartmentKind::Junction => CompartmentVariant::Junction,
                CompartmentKind::Source => CompartmentVariant::Source,
                CompartmentKind::Sink => CompartmentVariant::Sink,
                CompartmentKind::Timed {
                    duration_parameter,
                    duration_group,
                } => {
                    let duration =
                        parset.sample_scaled(duration_parameter, &pop.id, &[tvec[0]])?[0];
                    if !duration.is_finite() || duration < 0.0 {
                        return Err(NumericalError {
                            population: pop.id.clone(),
                            entity: duration_parameter.clone(),
                            step: 0,
                            time: tvec[0],
                            kind: NumericalKind::NonPositiveDuration(duration),
                        }
                        .into());
                    }
                    let n_bins = (duration / dt).round() as usize;
                    if n_bins > max_timed_bins {
                        return Err(SimulationError::Config(format!(
                            "timed compartment '{}' needs {} bins (duration {} / dt {}), \
                             exceeding the configured maximum of {}",
                            spec.id, n_bins, duration, dt, max_timed_bins
                        )));
                    }
                    let flush_link = framework
                        .transitions
                        .iter()
                        .position(|tr| {
                            tr.source == spec.id && tr.parameter == *duration_parameter
                        })
                        .ok_or_else(|| {
                            epiflow_core::FrameworkValidationError::FlushLinkCount {
                                compartment: spec.id.clone(),
                                found: 0,
                            }
                        })?;
                    CompartmentVariant::Timed(TimedBins::new(
                        n_bins,
                        flush_link,
                        duration_group.clone(),
                    ))
                }
            };
            comps.push(Compartment::new(spec.id.clone(), variant, n_steps));
        }

        // Mark flush links now that compartments exist.
        for (idx, link) in links.iter_mut().enumerate() {
            if let Some(bins) = comps[link.source].timed() {
                if bins.flush_link == idx {
                    link.is_flush = true;
                }
            }
        }

        let mut out_links = vec![Vec::new(); comps.len()];
        let mut in_links = vec![Vec::new(); comps.len()];
        for (idx, link) in links.iter().enumerate() {
            out_links[link.source].push(idx);
            in_links[link.dest].push(idx);
        }

        let mut pars = Vec::with_capacity(framework.parameters.len());
        for spec in &framework.parameters {
            let scale = parset
                .pars
                .get(&spec.id)
                .map(|pd| pd.y_factor(&pop.id) * pd.meta_y_factor)
                .unwrap_or(1.0);
            let source = match &spec.function {
                Some(ParameterFunction::Expression { formula }) => ParSource::Function {
                    expr: formula.clone(),
                    dependencies: spec.dependencies.clone(),
                    scale,
                },
                Some(ParameterFunction::SrcPopAvg {
                    parameter,
                    interaction,
                }) => ParSource::Aggregation {
                    kind: AggregationKind::Average,
                    parameter: par_lookup[parameter],
                    interaction: interaction.clone(),
                    scale,
                },
                Some(ParameterFunction::SrcPopSum {
                    parameter,
                    interaction,
                }) => ParSource::Aggregation {
                    kind: AggregationKind::Sum,
                    parameter: par_lookup[parameter],
                    interaction: interaction.clone(),
                    scale,
                },
                None => {
                    if parset.get_data(&spec.id, &pop.id).is_some() {
                        ParSource::Data(parset.sample_scaled(&spec.id, &pop.id, tvec)?)
                    } else if spec.format == ParameterFormat::Proportion {
                        // Unspecified junction shares mean an equal split;
                        // a unit weight per link normalizes to that.
                        ParSource::Data(vec![1.0; n_steps])
                    } else {
                        return Err(epiflow_core::ParameterSetError::MissingParameter {
                            parameter: spec.id.clone(),
                            population: pop.id.clone(),
                        }
                        .into());
                    }
                }
            };
            pars.push(ParState {
                id: spec.id.clone(),
                format: spec.format,
                source,
                min: spec.min,
                max: spec.max,
                values: vec![f64::NAN; n_steps],
            });
        }

        let charac_lookup: HashMap<String, usize> = framework
            .characteristics
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.id.clone(), idx))
            .collect();
        let resolve_ref = |id: &str| -> ComponentRef {
            if let Some(&idx) = comp_lookup.get(id) {
                ComponentRef::Compartment(idx)
            } else {
                ComponentRef::Characteristic(charac_lookup[id])
            }
        };
        let mut characs = Vec::with_capacity(framework.characteristics.len());
        for spec in &framework.characteristics {
            characs.push(CharacState {
                id: spec.id.clone(),
                components: spec.components.iter().map(|c| resolve_ref(c)).collect(),
                denominator: spec.denominator.as_deref().map(|d| resolve_ref(d)),
                values: vec![f64::NAN; n_steps],
            });
        }
        let charac_order = charac_dependency_order(&characs);

        let n_junctions = comps.iter().filter(|c| c.is_junction()).count();

        Ok(Self {
            id: pop.id.clone(),
            pop_type: pop.pop_type.clone(),
            comps,
            comp_lookup,
            links,
            out_links,
            in_links,
            pars,
            par_lookup,
            characs,
            charac_lookup,
            charac_order,
            n_junctions,
        })
    }

    /// Evaluate every characteristic at `step` from current stocks.
    pub fn resolve_characteristics(&mut self, step: usize) {
        for k in 0..self.charac_order.len() {
            let idx = self.charac_order[k];
            let mut numerator = 0.0;
            for j in 0..self.characs[idx].components.len() {
                let component = self.characs[idx].components[j];
                numerator += self.component_value(component, step);
            }
            let value = match self.characs[idx].denominator {
                Some(denom) => {
                    let d = self.component_value(denom, step);
                    if d == 0.0 {
                        0.0
                    } else {
                        numerator / d
                    }
                }
                None => numerator,
            };
            self.characs[idx].values[step] = value;
        }
    }

    fn component_value(&self, component: ComponentRef, step: usize) -> f64 {
        match component {
            ComponentRef::Compartment(idx) => self.comps[idx].stock[step],
            ComponentRef::Characteristic(idx) => self.characs[idx].values[step],
        }
    }

    /// Evaluate a function parameter at `step`. Dependencies, compartments
    /// and characteristics must already hold step values.
    pub fn evaluate_function(
        &self,
        par_idx: usize,
        step: usize,
        t: f64,
        dt: f64,
    ) -> Result<f64, NumericalError> {
        let par = &self.pars[par_idx];
        let ParSource::Function {
            expr,
            dependencies,
            scale,
        } = &par.source
        else {
            unreachable!("evaluate_function called on a non-function parameter");
        };
        let mut ctx = EvalContext::new(t, dt);
        for dep in dependencies {
            let value = if let Some(&idx) = self.par_lookup.get(dep) {
                self.pars[idx].values[step]
            } else if let Some(&idx) = self.comp_lookup.get(dep) {
                self.comps[idx].stock[step]
            } else {
                self.characs[self.charac_lookup[dep]].values[step]
            };
            ctx.set(dep, value);
        }
        let value = expr.evaluate(&ctx).map_err(|e| NumericalError {
            population: self.id.clone(),
            entity: par.id.clone(),
            step,
            time: t,
            kind: NumericalKind::Evaluation(e.to_string()),
        })?;
        Ok(value * scale)
    }

    /// Total people across compartments, excluding sources and sinks.
    pub fn total_alive(&self, step: usize) -> f64 {
        self.comps
            .iter()
            .filter(|c| !c.is_source() && !c.is_sink())
            .map(|c| c.stock[step])
            .sum()
    }
}

/// Characteristics ordered so every referenced characteristic resolves
/// before its referrer. Validation guarantees acyclicity.
fn charac_dependency_order(characs: &[CharacState]) -> Vec<usize> {
    fn visit(
        idx: usize,
        characs: &[CharacState],
        done: &mut Vec<bool>,
        order: &mut Vec<usize>,
    ) {
        if done[idx] {
            return;
        }
        done[idx] = true;
        let deps = characs[idx]
            .components
            .iter()
            .chain(characs[idx].denominator.as_ref());
        for dep in deps {
            if let ComponentRef::Characteristic(dep_idx) = dep {
                visit(*dep_idx, characs, done, order);
            }
        }
        order.push(idx);
    }

    let mut done = vec![false; characs.len()];
    let mut order = Vec::with_capacity(characs.len());
    for idx in 0..characs.len() {
        visit(idx, characs, &mut done, &mut order);
    }
    order
}
