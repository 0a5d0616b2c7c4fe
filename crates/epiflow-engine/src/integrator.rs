//! The discrete-time integrator.
//!
//! Orchestrates all populations synchronously across the simulation time
//! vector. Each step runs the same phase sequence: resolve parameters in
//! declaration order, compute link flows with conservation rescaling, apply
//! flows to all compartments, flush junctions to a fixed point, advance
//! timed-compartment bins. Steps are strictly sequential; every population's
//! step-t state is read before any step-t+1 state is written.

use std::collections::HashMap;

use tracing::{debug, info, trace};

use epiflow_core::{Framework, ParameterFormat, ParameterSet};

use crate::compartment::CompartmentVariant;
use crate::config::SimConfig;
use crate::error::{NumericalError, NumericalKind, SimulationError};
use crate::initialization::initial_stocks;
use crate::link::per_step_fraction;
use crate::overlay::{ParameterOverlay, StepView};
use crate::population::{AggregationKind, ParSource, Population};
use crate::result::SimResult;

/// Lifecycle of an integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Topology instantiated, initial stocks assigned.
    Built,
    /// Stepping through the time vector.
    Stepping,
    /// Run complete; the result has been frozen.
    Finalized,
}

/// One (source population, destination population) leg of a transfer,
/// instantiated over every plain/timed compartment.
#[derive(Debug, Clone)]
struct TransferPair {
    id: String,
    from_pop: usize,
    to_pop: usize,
    format: ParameterFormat,
    /// Interpolated rate per step.
    values: Vec<f64>,
    /// Participating compartment indices.
    comps: Vec<usize>,
    /// Applied flow per compartment slot per step.
    flows: Vec<Vec<f64>>,
}

/// One weighted edge of an interaction matrix.
#[derive(Debug, Clone)]
struct InteractionWeight {
    from_pop: usize,
    to_pop: usize,
    values: Vec<f64>,
}

/// The integrator: populations plus cross-population couplings, mutated one
/// step at a time, frozen into a [`SimResult`] when stepping completes.
pub struct Integrator {
    config: SimConfig,
    tvec: Vec<f64>,
    pops: Vec<Population>,
    pop_lookup: HashMap<String, usize>,
    transfers: Vec<TransferPair>,
    /// Per population, per compartment: (pair index, compartment slot) of
    /// every transfer leaving that compartment.
    transfer_out: Vec<Vec<Vec<(usize, usize)>>>,
    interactions: HashMap<String, Vec<InteractionWeight>>,
    overlay: Option<Box<dyn ParameterOverlay>>,
    state: EngineState,
}

impl Integrator {
    /// Validate the framework, instantiate the runtime topology and assign
    /// initial stocks.
    pub fn new(
        framework: &Framework,
        parset: &ParameterSet,
        config: SimConfig,
    ) -> Result<Self, SimulationError> {
        framework.validate()?;
        let tvec = config.time_vector()?;

        if parset.populations.is_empty() {
            return Err(SimulationError::Config(
                "parameter set declares no populations".into(),
            ));
        }

        let mut pops = Vec::with_capacity(parset.populations.len());
        let mut pop_lookup = HashMap::new();
        for popdef in &parset.populations {
            if pop_lookup
                .insert(popdef.id.clone(), pops.len())
                .is_some()
            {
                return Err(SimulationError::Config(format!(
                    "duplicate population '{}'",
                    popdef.id
                )));
            }
            pops.push(Population::build(
                framework,
                parset,
                popdef,
                &tvec,
                config.dt,
                config.max_timed_bins,
            )?);
        }

        let transfers = build_transfers(framework, parset, &pops, &pop_lookup, &tvec)?;
        let mut transfer_out: Vec<Vec<Vec<(usize, usize)>>> = pops
            .iter()
            .map(|p| vec![Vec::new(); p.comps.len()])
            .collect();
        for (xi, pair) in transfers.iter().enumerate() {
            for (slot, &ci) in pair.comps.iter().enumerate() {
                transfer_out[pair.from_pop][ci].push((xi, slot));
            }
        }

        let interactions = build_interactions(framework, parset, &pop_lookup, &tvec)?;

        let mut integrator = Self {
            config,
            tvec,
            pops,
            pop_lookup,
            transfers,
            transfer_out,
            interactions,
            overlay: None,
            state: EngineState::Built,
        };
        integrator.assign_initial_stocks(framework, parset)?;
        Ok(integrator)
    }

    /// Attach a parameter overlay (e.g. the program coverage layer).
    pub fn with_overlay(mut self, overlay: Box<dyn ParameterOverlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn time_vector(&self) -> &[f64] {
        &self.tvec
    }

    /// Integrate over the full time vector and freeze the result.
    pub fn run(mut self) -> Result<SimResult, SimulationError> {
        let n_steps = self.tvec.len();
        info!(
            populations = self.pops.len(),
            steps = n_steps,
            dt = self.config.dt,
            "starting integration"
        );
        self.state = EngineState::Stepping;

        self.resolve_step(0)?;
        self.flush_junctions(0, 0)?;
        // Flushing can move step-0 stock; recorded characteristics must
        // reflect the flushed state.
        for pop in &mut self.pops {
            pop.resolve_characteristics(0);
        }

        for step in 0..n_steps - 1 {
            self.compute_flows(step)?;
            self.apply_flows(step)?;
            self.flush_junctions(step, step + 1)?;
            self.advance_bins(step + 1)?;
            self.resolve_step(step + 1)?;
        }

        self.state = EngineState::Finalized;
        info!("integration finished");
        Ok(SimResult::assemble(
            self.tvec,
            self.config,
            self.pops,
        ))
    }

    fn assign_initial_stocks(
        &mut self,
        framework: &Framework,
        parset: &ParameterSet,
    ) -> Result<(), SimulationError> {
        let t0 = self.tvec[0];
        for pop in &mut self.pops {
            let popdef = parset
                .population(&pop.id)
                .expect("populations were built from this parset");
            let stocks = initial_stocks(framework, parset, popdef, t0, self.config.tolerance)?;
            for (comp, value) in pop.comps.iter_mut().zip(stocks) {
                comp.stock[0] = value;
                if let Some(bins) = comp.timed_mut() {
                    bins.seed_uniform(value);
                }
            }
        }
        Ok(())
    }

    /// Resolve every parameter (and characteristic) at `step`, in framework
    /// declaration order, across all populations.
    fn resolve_step(&mut self, step: usize) -> Result<(), SimulationError> {
        let t = self.tvec[step];
        let dt = self.config.dt;

        for pop in &mut self.pops {
            pop.resolve_characteristics(step);
        }

        let overrides = self.collect_overrides(step, t)?;

        let n_pars = self.pops.first().map(|p| p.pars.len()).unwrap_or(0);
        for k in 0..n_pars {
            for pi in 0..self.pops.len() {
                let computed = match &self.pops[pi].pars[k].source {
                    ParSource::Data(values) => values[step],
                    ParSource::Function { .. } => {
                        self.pops[pi].evaluate_function(k, step, t, dt)?
                    }
                    ParSource::Aggregation {
                        kind,
                        parameter,
                        interaction,
                        scale,
                    } => self.aggregate(*kind, *parameter, interaction, pi, step) * scale,
                };
                let mut value = overrides
                    .get(&(pi, k))
                    .copied()
                    .unwrap_or(computed);
                let par = &self.pops[pi].pars[k];
                if let Some(min) = par.min {
                    value = value.max(min);
                }
                if let Some(max) = par.max {
                    value = value.min(max);
                }
                if !value.is_finite() {
                    return Err(NumericalError {
                        population: self.pops[pi].id.clone(),
                        entity: par.id.clone(),
                        step,
                        time: t,
                        kind: NumericalKind::NonFinite,
                    }
                    .into());
                }
                self.pops[pi].pars[k].values[step] = value;
            }
        }
        Ok(())
    }

    fn collect_overrides(
        &self,
        step: usize,
        t: f64,
    ) -> Result<HashMap<(usize, usize), f64>, SimulationError> {
        let mut map = HashMap::new();
        let Some(overlay) = &self.overlay else {
            return Ok(map);
        };
        let view = StepView::new(&self.pops, step, t, self.config.dt);
        let list = overlay
            .overrides(&view)
            .map_err(|e| SimulationError::Overlay {
                step,
                message: e.0,
            })?;
        for ov in list {
            let pi = *self
                .pop_lookup
                .get(&ov.population)
                .ok_or_else(|| SimulationError::Overlay {
                    step,
                    message: format!("override targets unknown population '{}'", ov.population),
                })?;
            let ki = *self.pops[pi]
                .par_lookup
                .get(&ov.parameter)
                .ok_or_else(|| SimulationError::Overlay {
                    step,
                    message: format!("override targets unknown parameter '{}'", ov.parameter),
                })?;
            map.insert((pi, ki), ov.value);
        }
        Ok(map)
    }

    /// Interaction-weighted combination of `parameter` across populations,
    /// evaluated for the destination population `to_pop`.
    fn aggregate(
        &self,
        kind: AggregationKind,
        parameter: usize,
        interaction: &str,
        to_pop: usize,
        step: usize,
    ) -> f64 {
        let Some(weights) = self.interactions.get(interaction) else {
            return 0.0;
        };
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for w in weights.iter().filter(|w| w.to_pop == to_pop) {
            let value = self.pops[w.from_pop].pars[parameter].values[step];
            let weight = w.values[step];
            weighted += weight * value;
            total_weight += weight;
        }
        match kind {
            AggregationKind::Sum => weighted,
            AggregationKind::Average => {
                if total_weight == 0.0 {
                    0.0
                } else {
                    weighted / total_weight
                }
            }
        }
    }

    /// Compute every link and transfer flow for `step`, rescaling each
    /// compartment's total outflow down to its available stock.
    fn compute_flows(&mut self, step: usize) -> Result<(), SimulationError> {
        let dt = self.config.dt;
        let t = self.tvec[step];

        let mut link_req: Vec<Vec<f64>> = self
            .pops
            .iter()
            .map(|p| vec![0.0; p.links.len()])
            .collect();
        let mut transfer_req: Vec<Vec<f64>> = self
            .transfers
            .iter()
            .map(|pair| vec![0.0; pair.comps.len()])
            .collect();

        // Requested within-population flows.
        for (pi, pop) in self.pops.iter().enumerate() {
            for (ci, comp) in pop.comps.iter().enumerate() {
                match &comp.variant {
                    CompartmentVariant::Junction | CompartmentVariant::Sink => continue,
                    CompartmentVariant::Source => {
                        for &li in &pop.out_links[ci] {
                            let par = &pop.pars[pop.links[li].parameter];
                            let value = par.values[step];
                            if value < 0.0 {
                                return Err(numerical(
                                    pop,
                                    &pop.links[li].id,
                                    step,
                                    t,
                                    NumericalKind::NegativeFlow(value),
                                ));
                            }
                            link_req[pi][li] = value * dt;
                        }
                    }
                    CompartmentVariant::Plain | CompartmentVariant::Timed(_) => {
                        let eligible = comp.eligible(step);
                        for &li in &pop.out_links[ci] {
                            let link = &pop.links[li];
                            if link.is_flush {
                                link_req[pi][li] =
                                    comp.timed().expect("flush implies timed").expiring();
                                continue;
                            }
                            let par = &pop.pars[link.parameter];
                            let value = par.values[step];
                            link_req[pi][li] = match par.format {
                                ParameterFormat::Number => {
                                    if value < 0.0 {
                                        return Err(numerical(
                                            pop,
                                            &link.id,
                                            step,
                                            t,
                                            NumericalKind::NegativeFlow(value),
                                        ));
                                    }
                                    value * dt
                                }
                                ParameterFormat::Probability | ParameterFormat::Duration => {
                                    let fraction = per_step_fraction(par.format, value, dt)
                                        .map_err(|kind| {
                                            numerical(pop, &link.id, step, t, kind)
                                        })?;
                                    eligible * fraction
                                }
                                // Junction routing happens in the flush phase.
                                ParameterFormat::Proportion => 0.0,
                            };
                        }
                    }
                }
            }
        }

        // Requested transfer flows.
        for (xi, pair) in self.transfers.iter().enumerate() {
            let from = &self.pops[pair.from_pop];
            let value = pair.values[step];
            match pair.format {
                ParameterFormat::Probability => {
                    let fraction = per_step_fraction(pair.format, value, dt)
                        .map_err(|kind| numerical(from, &pair.id, step, t, kind))?;
                    for (slot, &ci) in pair.comps.iter().enumerate() {
                        transfer_req[xi][slot] = from.comps[ci].eligible(step) * fraction;
                    }
                }
                ParameterFormat::Number => {
                    if value < 0.0 {
                        return Err(numerical(
                            from,
                            &pair.id,
                            step,
                            t,
                            NumericalKind::NegativeFlow(value),
                        ));
                    }
                    // An absolute count moves people in proportion to where
                    // they currently are.
                    let pool: f64 = pair
                        .comps
                        .iter()
                        .map(|&ci| from.comps[ci].eligible(step))
                        .sum();
                    if pool > 0.0 {
                        let total = value * dt;
                        for (slot, &ci) in pair.comps.iter().enumerate() {
                            transfer_req[xi][slot] =
                                total * from.comps[ci].eligible(step) / pool;
                        }
                    }
                }
                _ => unreachable!("transfer formats are checked at build"),
            }
        }

        // Uniform rescale per compartment: if requested outflow exceeds the
        // available stock, every outgoing flow shrinks by the same factor.
        for pi in 0..self.pops.len() {
            let pop = &self.pops[pi];
            for ci in 0..pop.comps.len() {
                let comp = &pop.comps[ci];
                if comp.is_source() || comp.is_sink() || comp.is_junction() {
                    continue;
                }
                let available = comp.eligible(step);
                let mut requested = 0.0;
                for &li in &pop.out_links[ci] {
                    if !pop.links[li].is_flush {
                        requested += link_req[pi][li];
                    }
                }
                for &(xi, slot) in &self.transfer_out[pi][ci] {
                    requested += transfer_req[xi][slot];
                }
                if requested > available && requested > 0.0 {
                    let scale = if available > 0.0 {
                        available / requested
                    } else {
                        0.0
                    };
                    trace!(
                        population = %pop.id,
                        compartment = %comp.id,
                        requested,
                        available,
                        "rescaling outflows"
                    );
                    for &li in &pop.out_links[ci] {
                        if !pop.links[li].is_flush {
                            link_req[pi][li] *= scale;
                        }
                    }
                    for &(xi, slot) in &self.transfer_out[pi][ci] {
                        transfer_req[xi][slot] *= scale;
                    }
                }
            }
        }

        for (pi, pop) in self.pops.iter_mut().enumerate() {
            for (li, link) in pop.links.iter_mut().enumerate() {
                link.flow[step] = link_req[pi][li];
            }
        }
        for (xi, pair) in self.transfers.iter_mut().enumerate() {
            for (slot, flows) in pair.flows.iter_mut().enumerate() {
                flows[step] = transfer_req[xi][slot];
            }
        }
        Ok(())
    }

    /// Apply the computed flows: subtract outflows (with per-bin draws on
    /// timed sources), add inflows, stage timed arrivals.
    fn apply_flows(&mut self, step: usize) -> Result<(), SimulationError> {
        let next = step + 1;

        for pop in &mut self.pops {
            for comp in &mut pop.comps {
                comp.stock[next] = if comp.is_source() {
                    0.0
                } else {
                    comp.stock[step]
                };
            }
        }

        // Per-bin draw profiles of voluntary outflows from timed sources,
        // used to stage position-preserving arrivals.
        let mut link_draws: HashMap<(usize, usize), Vec<f64>> = HashMap::new();
        let mut transfer_draws: HashMap<(usize, usize), Vec<f64>> = HashMap::new();

        // Outflows.
        for pi in 0..self.pops.len() {
            let transfer_out = &self.transfer_out[pi];
            let transfers = &self.transfers;
            let pop = &mut self.pops[pi];
            for ci in 0..pop.comps.len() {
                if pop.comps[ci].is_source()
                    || pop.comps[ci].is_sink()
                    || pop.comps[ci].is_junction()
                {
                    continue;
                }
                let mut voluntary = 0.0;
                let mut flush = 0.0;
                for &li in &pop.out_links[ci] {
                    if pop.links[li].is_flush {
                        flush += pop.links[li].flow[step];
                    } else {
                        voluntary += pop.links[li].flow[step];
                    }
                }
                let mut transfer_total = 0.0;
                for &(xi, slot) in &transfer_out[ci] {
                    transfer_total += transfers[xi].flows[slot][step];
                }

                if let Some(bins) = pop.comps[ci].timed() {
                    let bins_before = bins.bins.clone();
                    let eligible = bins.eligible();
                    if eligible > 0.0 {
                        let profile = |flow: f64| -> Vec<f64> {
                            bins_before[..bins_before.len() - 1]
                                .iter()
                                .map(|&b| flow * b / eligible)
                                .collect()
                        };
                        for &li in &pop.out_links[ci] {
                            if !pop.links[li].is_flush && pop.links[li].flow[step] > 0.0 {
                                link_draws
                                    .insert((pi, li), profile(pop.links[li].flow[step]));
                            }
                        }
                        for &(xi, slot) in &transfer_out[ci] {
                            let flow = transfers[xi].flows[slot][step];
                            if flow > 0.0 {
                                transfer_draws.insert((xi, slot), profile(flow));
                            }
                        }
                    }
                    let bins = pop.comps[ci].timed_mut().expect("timed");
                    bins.draw_proportional(voluntary + transfer_total);
                    bins.draw_expiring(flush);
                }

                pop.comps[ci].stock[next] -= voluntary + flush + transfer_total;
            }
        }

        // Within-population inflows.
        for pi in 0..self.pops.len() {
            let pop = &mut self.pops[pi];
            for li in 0..pop.links.len() {
                let flow = pop.links[li].flow[step];
                if flow == 0.0 {
                    continue;
                }
                let src = pop.links[li].source;
                let dst = pop.links[li].dest;
                let is_flush = pop.links[li].is_flush;
                let src_timing = pop.comps[src]
                    .timed()
                    .map(|b| (b.group.clone(), b.n_bins()));
                pop.comps[dst].stock[next] += flow;
                if let Some(dst_bins) = pop.comps[dst].timed_mut() {
                    let preserves = !is_flush
                        && matches!(
                            &src_timing,
                            Some((Some(group), n))
                                if Some(group) == dst_bins.group.as_ref()
                                    && *n == dst_bins.n_bins()
                        );
                    if preserves {
                        if let Some(profile) = link_draws.get(&(pi, li)) {
                            for (bin, &amount) in profile.iter().enumerate() {
                                dst_bins.stage_carried(bin, amount);
                            }
                        } else {
                            dst_bins.stage_fresh(flow);
                        }
                    } else {
                        dst_bins.stage_fresh(flow);
                    }
                }
            }
        }

        // Cross-population transfer inflows, remapping bin positions when
        // the durations differ.
        for xi in 0..self.transfers.len() {
            let (from_pop, to_pop) = (self.transfers[xi].from_pop, self.transfers[xi].to_pop);
            for slot in 0..self.transfers[xi].comps.len() {
                let flow = self.transfers[xi].flows[slot][step];
                if flow == 0.0 {
                    continue;
                }
                let ci = self.transfers[xi].comps[slot];
                let src_bins = self.pops[from_pop].comps[ci]
                    .timed()
                    .map(|b| b.n_bins());
                self.pops[to_pop].comps[ci].stock[next] += flow;
                if let Some(dst_bins) = self.pops[to_pop].comps[ci].timed_mut() {
                    match (src_bins, transfer_draws.get(&(xi, slot))) {
                        (Some(n_src), Some(profile)) if n_src > 0 && dst_bins.n_bins() > 0 => {
                            let n_dst = dst_bins.n_bins();
                            for (bin, &amount) in profile.iter().enumerate() {
                                let mapped = bin * n_dst / n_src;
                                dst_bins.stage_carried(mapped, amount);
                            }
                        }
                        _ => dst_bins.stage_fresh(flow),
                    }
                }
            }
        }
        Ok(())
    }

    /// Redistribute junction stock along outgoing links until every
    /// junction is empty, bounded by the junction count. Zero-bin timed
    /// compartments pass their arrivals straight through here as well.
    fn flush_junctions(
        &mut self,
        flow_step: usize,
        record_step: usize,
    ) -> Result<(), SimulationError> {
        let tol = self.config.tolerance;
        let t = self.tvec[flow_step];

        for pi in 0..self.pops.len() {
            let pop = &mut self.pops[pi];
            let pass_throughs = pop
                .comps
                .iter()
                .filter(|c| c.timed().is_some_and(|b| b.is_pass_through()))
                .count();
            let bound = pop.n_junctions + pass_throughs + 1;

            for _pass in 0..bound {
                let mut moved = false;
                for ci in 0..pop.comps.len() {
                    let (is_junction, is_pass_through) = match &pop.comps[ci].variant {
                        CompartmentVariant::Junction => (true, false),
                        CompartmentVariant::Timed(bins) => (false, bins.is_pass_through()),
                        _ => (false, false),
                    };
                    if !is_junction && !is_pass_through {
                        continue;
                    }
                    let amount = pop.comps[ci].stock[record_step];
                    if amount <= tol {
                        continue;
                    }

                    let shares: Vec<(usize, f64)> = if is_pass_through {
                        let bins = pop.comps[ci].timed().expect("timed");
                        vec![(bins.flush_link, amount)]
                    } else {
                        let out = &pop.out_links[ci];
                        let mut weights: Vec<f64> = out
                            .iter()
                            .map(|&li| pop.pars[pop.links[li].parameter].values[flow_step])
                            .collect();
                        if let Some(&bad) = weights.iter().find(|w| **w < 0.0) {
                            return Err(NumericalError {
                                population: pop.id.clone(),
                                entity: pop.comps[ci].id.clone(),
                                step: record_step,
                                time: t,
                                kind: NumericalKind::NegativeFlow(bad),
                            }
                            .into());
                        }
                        let total: f64 = weights.iter().sum();
                        if total <= 0.0 {
                            // Unspecified shares split equally.
                            weights = vec![1.0; out.len()];
                        }
                        let total: f64 = weights.iter().sum();
                        out.iter()
                            .zip(weights)
                            .map(|(&li, w)| (li, amount * w / total))
                            .collect()
                    };

                    pop.comps[ci].stock[record_step] = 0.0;
                    if let Some(bins) = pop.comps[ci].timed_mut() {
                        bins.drain_fresh();
                    }
                    for (li, share) in shares {
                        pop.links[li].flow[flow_step] += share;
                        let dst = pop.links[li].dest;
                        pop.comps[dst].stock[record_step] += share;
                        if let Some(dst_bins) = pop.comps[dst].timed_mut() {
                            dst_bins.stage_fresh(share);
                        }
                    }
                    moved = true;
                }
                if !moved {
                    break;
                }
            }

            for comp in &pop.comps {
                if comp.is_junction() {
                    let residual = comp.stock[record_step];
                    if residual > tol {
                        return Err(NumericalError {
                            population: pop.id.clone(),
                            entity: comp.id.clone(),
                            step: record_step,
                            time: t,
                            kind: NumericalKind::JunctionResidual(residual),
                        }
                        .into());
                    }
                }
            }
            if pop.n_junctions > 0 {
                debug!(population = %pop.id, "junctions flushed");
            }
        }
        Ok(())
    }

    /// Age duration bins, admit staged arrivals, and verify the bin-sum and
    /// non-negativity invariants for the completed step.
    fn advance_bins(&mut self, record_step: usize) -> Result<(), SimulationError> {
        let tol = self.config.tolerance;
        let t = self.tvec[record_step];
        for pop in &mut self.pops {
            for comp in &mut pop.comps {
                let stock = comp.stock[record_step];
                if stock < -tol {
                    return Err(NumericalError {
                        population: pop.id.clone(),
                        entity: comp.id.clone(),
                        step: record_step,
                        time: t,
                        kind: NumericalKind::NegativeStock(stock),
                    }
                    .into());
                }
                if stock < 0.0 {
                    comp.stock[record_step] = 0.0; // round-off
                }
                let id = comp.id.clone();
                let stock = comp.stock[record_step];
                if let Some(bins) = comp.timed_mut() {
                    bins.advance();
                    for bin in &mut bins.bins {
                        if *bin < 0.0 {
                            *bin = 0.0; // round-off from proportional draws
                        }
                    }
                    let drift = (bins.total() - stock).abs();
                    if drift > tol.max(tol * stock) {
                        return Err(NumericalError {
                            population: pop.id.clone(),
                            entity: id,
                            step: record_step,
                            time: t,
                            kind: NumericalKind::BinMismatch(drift),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

fn numerical(
    pop: &Population,
    entity: &str,
    step: usize,
    time: f64,
    kind: NumericalKind,
) -> SimulationError {
    NumericalError {
        population: pop.id.clone(),
        entity: entity.to_string(),
        step,
        time,
        kind,
    }
    .into()
}

fn build_transfers(
    framework: &Framework,
    parset: &ParameterSet,
    pops: &[Population],
    pop_lookup: &HashMap<String, usize>,
    tvec: &[f64],
) -> Result<Vec<TransferPair>, SimulationError> {
    let mut pairs = Vec::new();
    for spec in &framework.transfers {
        if !matches!(
            spec.format,
            ParameterFormat::Probability | ParameterFormat::Number
        ) {
            return Err(SimulationError::Config(format!(
                "transfer '{}' must be in probability or number format",
                spec.id
            )));
        }
        let Some(legs) = parset.transfers.get(&spec.id) else {
            continue;
        };
        for (from_id, dests) in legs {
            for (to_id, series) in dests {
                let from_pop = *pop_lookup
                    .get(from_id)
                    .ok_or_else(|| SimulationError::UnknownPopulation(from_id.clone()))?;
                let to_pop = *pop_lookup
                    .get(to_id)
                    .ok_or_else(|| SimulationError::UnknownPopulation(to_id.clone()))?;
                if from_pop == to_pop {
                    return Err(SimulationError::Config(format!(
                        "transfer '{}' connects population '{}' to itself",
                        spec.id, from_id
                    )));
                }
                if pops[from_pop].pop_type != pops[to_pop].pop_type {
                    return Err(SimulationError::Config(format!(
                        "transfer '{}' connects incompatible population types '{}' and '{}'",
                        spec.id, pops[from_pop].pop_type, pops[to_pop].pop_type
                    )));
                }
                let values = series.interpolate(tvec).map_err(|source| {
                    epiflow_core::ParameterSetError::Series {
                        parameter: spec.id.clone(),
                        population: from_id.clone(),
                        source,
                    }
                })?;
                let comps: Vec<usize> = pops[from_pop]
                    .comps
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| {
                        matches!(
                            c.variant,
                            CompartmentVariant::Plain | CompartmentVariant::Timed(_)
                        )
                    })
                    .map(|(ci, _)| ci)
                    .collect();
                let flows = vec![vec![0.0; tvec.len()]; comps.len()];
                pairs.push(TransferPair {
                    id: spec.id.clone(),
                    from_pop,
                    to_pop,
                    format: spec.format,
                    values,
                    comps,
                    flows,
                });
            }
        }
    }
    Ok(pairs)
}

fn build_interactions(
    framework: &Framework,
    parset: &ParameterSet,
    pop_lookup: &HashMap<String, usize>,
    tvec: &[f64],
) -> Result<HashMap<String, Vec<InteractionWeight>>, SimulationError> {
    let mut out = HashMap::new();
    for spec in &framework.interactions {
        let mut weights = Vec::new();
        if let Some(legs) = parset.interactions.get(&spec.id) {
            for (from_id, dests) in legs {
                for (to_id, series) in dests {
                    let from_pop = *pop_lookup
                        .get(from_id)
                        .ok_or_else(|| SimulationError::UnknownPopulation(from_id.clone()))?;
                    let to_pop = *pop_lookup
                        .get(to_id)
                        .ok_or_else(|| SimulationError::UnknownPopulation(to_id.clone()))?;
                    let values = series.interpolate(tvec).map_err(|source| {
                        epiflow_core::ParameterSetError::Series {
                            parameter: spec.id.clone(),
                            population: from_id.clone(),
                            source,
                        }
                    })?;
                    weights.push(InteractionWeight {
                        from_pop,
                        to_pop,
                        values,
                    });
                }
            }
        }
        out.insert(spec.id.clone(), weights);
    }
    Ok(out)
}
