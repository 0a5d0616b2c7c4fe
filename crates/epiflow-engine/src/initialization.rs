//! Characteristic-driven initialization.
//!
//! The databook provides initial values for a subset of compartments and
//! characteristics. Compartment stocks at the first step are the
//! least-squares solution of the linear system those values imply:
//! a compartment entry is a unit row, a characteristic entry a row summing
//! its component compartments (moved onto the denominator when one is
//! declared, i.e. `sum(components) - value * sum(denominator) = 0`).

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use epiflow_core::{
    CharacteristicSpec, CompartmentKind, Framework, ParameterSet, PopulationDef,
};

use crate::error::{NumericalError, NumericalKind, SimulationError};

/// Solve initial compartment stocks for one population.
///
/// Returns one value per framework compartment, in declaration order.
/// Sources and sinks initialize to zero regardless of databook content.
pub fn initial_stocks(
    framework: &Framework,
    parset: &ParameterSet,
    pop: &PopulationDef,
    t0: f64,
    tolerance: f64,
) -> Result<Vec<f64>, SimulationError> {
    let n_comps = framework.compartments.len();
    let numerical = |entity: &str, kind: NumericalKind| NumericalError {
        population: pop.id.clone(),
        entity: entity.to_string(),
        step: 0,
        time: t0,
        kind,
    };

    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut rhs: Vec<f64> = Vec::new();

    for comp in &framework.compartments {
        if !comp.databook_init {
            continue;
        }
        let value = parset.initial_value(&comp.id, &pop.id, t0)?;
        let mut row = vec![0.0; n_comps];
        row[framework.compartment_index(&comp.id).expect("own id")] = 1.0;
        rows.push(row);
        rhs.push(value);
    }

    for charac in &framework.characteristics {
        if !charac.databook_init {
            continue;
        }
        let value = parset.initial_value(&charac.id, &pop.id, t0)?;
        let mut row = vec![0.0; n_comps];
        expand_components(framework, charac, 1.0, &mut row)
            .map_err(|msg| numerical(&charac.id, NumericalKind::Initialization(msg)))?;
        if let Some(denominator) = &charac.denominator {
            let mut denom_row = vec![0.0; n_comps];
            expand_entity(framework, denominator, 1.0, &mut denom_row)
                .map_err(|msg| numerical(&charac.id, NumericalKind::Initialization(msg)))?;
            for (coeff, denom_coeff) in row.iter_mut().zip(&denom_row) {
                *coeff -= value * denom_coeff;
            }
            rhs.push(0.0);
        } else {
            rhs.push(value);
        }
        rows.push(row);
    }

    if rows.is_empty() {
        // Nothing flagged for initialization: everything starts empty.
        return Ok(vec![0.0; n_comps]);
    }

    let a = DMatrix::from_fn(rows.len(), n_comps, |r, c| rows[r][c]);
    let b = DVector::from_vec(rhs);
    let svd = a.clone().svd(true, true);
    let x = svd
        .solve(&b, tolerance)
        .map_err(|e| numerical("initialization", NumericalKind::Initialization(e.to_string())))?;

    let residual = (&a * &x - &b).norm();
    let scale = b.norm().max(1.0);
    if residual > tolerance.sqrt() * scale {
        return Err(numerical(
            "initialization",
            NumericalKind::Initialization(format!(
                "databook initial values are inconsistent (residual {residual:.3e})"
            )),
        )
        .into());
    }

    let mut stocks = Vec::with_capacity(n_comps);
    for (idx, comp) in framework.compartments.iter().enumerate() {
        let mut value = x[idx];
        if value < -tolerance {
            return Err(numerical(
                &comp.id,
                NumericalKind::NegativeStock(value),
            )
            .into());
        }
        if value < 0.0 {
            value = 0.0; // round-off
        }
        if matches!(comp.kind, CompartmentKind::Source | CompartmentKind::Sink) {
            value = 0.0;
        }
        stocks.push(value);
    }
    debug!(
        population = %pop.id,
        total = stocks.iter().sum::<f64>(),
        "initialized compartment stocks"
    );
    Ok(stocks)
}

/// Accumulate a characteristic's components into compartment coefficients,
/// expanding nested characteristics. Nested characteristics must not carry
/// denominators: a ratio cannot contribute linearly to a population count.
fn expand_components(
    framework: &Framework,
    charac: &CharacteristicSpec,
    weight: f64,
    row: &mut [f64],
) -> Result<(), String> {
    for component in &charac.components {
        expand_entity(framework, component, weight, row)?;
    }
    Ok(())
}

fn expand_entity(
    framework: &Framework,
    id: &str,
    weight: f64,
    row: &mut [f64],
) -> Result<(), String> {
    if let Some(idx) = framework.compartment_index(id) {
        row[idx] += weight;
        return Ok(());
    }
    let nested = framework
        .characteristic(id)
        .ok_or_else(|| format!("unknown component '{id}'"))?;
    if nested.denominator.is_some() {
        return Err(format!(
            "characteristic '{}' has a denominator and cannot be a component of another characteristic's initialization",
            nested.id
        ));
    }
    expand_components(framework, nested, weight, row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use epiflow_core::{
        CharacteristicSpec, CompartmentKind, CompartmentSpec, TimeSeries,
    };

    fn framework_and_parset() -> (Framework, ParameterSet, PopulationDef) {
        let mut fw = Framework::new("init-test");
        for id in ["sus", "inf", "rec"] {
            fw.compartments.push(CompartmentSpec {
                id: id.into(),
                name: id.into(),
                kind: CompartmentKind::Plain,
                databook_init: false,
            });
        }
        let pop = PopulationDef {
            id: "adults".into(),
            name: "Adults".into(),
            pop_type: "default".into(),
        };
        let mut ps = ParameterSet::new("test");
        ps.populations.push(pop.clone());
        (fw, ps, pop)
    }

    #[test]
    fn test_direct_compartment_values() {
        let (mut fw, mut ps, pop) = framework_and_parset();
        for comp in &mut fw.compartments {
            comp.databook_init = true;
        }
        ps.set_initial("sus", "adults", TimeSeries::from_assumption(90.0, None));
        ps.set_initial("inf", "adults", TimeSeries::from_assumption(10.0, None));
        ps.set_initial("rec", "adults", TimeSeries::from_assumption(0.0, None));
        let stocks = initial_stocks(&fw, &ps, &pop, 2000.0, 1e-6).unwrap();
        assert!((stocks[0] - 90.0).abs() < 1e-6);
        assert!((stocks[1] - 10.0).abs() < 1e-6);
        assert!(stocks[2].abs() < 1e-6);
    }

    #[test]
    fn test_characteristic_total_with_compartment() {
        // Total population characteristic plus one direct compartment value
        // pins down a two-compartment system.
        let (mut fw, mut ps, pop) = framework_and_parset();
        fw.compartments.truncate(2);
        fw.compartments[1].databook_init = true;
        fw.characteristics.push(CharacteristicSpec {
            id: "alive".into(),
            name: "alive".into(),
            components: vec!["sus".into(), "inf".into()],
            denominator: None,
            databook_init: true,
        });
        ps.set_initial("alive", "adults", TimeSeries::from_assumption(100.0, None));
        ps.set_initial("inf", "adults", TimeSeries::from_assumption(25.0, None));
        let stocks = initial_stocks(&fw, &ps, &pop, 2000.0, 1e-6).unwrap();
        assert!((stocks[0] - 75.0).abs() < 1e-6);
        assert!((stocks[1] - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_denominator_characteristic() {
        // alive = 200, prevalence inf/alive = 0.1, rec = 0.
        let (mut fw, mut ps, pop) = framework_and_parset();
        fw.compartments[2].databook_init = true;
        fw.characteristics.push(CharacteristicSpec {
            id: "alive".into(),
            name: "alive".into(),
            components: vec!["sus".into(), "inf".into(), "rec".into()],
            denominator: None,
            databook_init: true,
        });
        fw.characteristics.push(CharacteristicSpec {
            id: "prev".into(),
            name: "prevalence".into(),
            components: vec!["inf".into()],
            denominator: Some("alive".into()),
            databook_init: true,
        });
        ps.set_initial("alive", "adults", TimeSeries::from_assumption(200.0, None));
        ps.set_initial("prev", "adults", TimeSeries::from_assumption(0.1, None));
        ps.set_initial("rec", "adults", TimeSeries::from_assumption(0.0, None));
        let stocks = initial_stocks(&fw, &ps, &pop, 2000.0, 1e-6).unwrap();
        assert!((stocks[1] - 20.0).abs() < 1e-4);
        assert!((stocks[0] - 180.0).abs() < 1e-4);
    }

    #[test]
    fn test_inconsistent_values_rejected() {
        let (mut fw, mut ps, pop) = framework_and_parset();
        fw.compartments.truncate(1);
        fw.compartments[0].databook_init = true;
        fw.characteristics.push(CharacteristicSpec {
            id: "alive".into(),
            name: "alive".into(),
            components: vec!["sus".into()],
            denominator: None,
            databook_init: true,
        });
        ps.set_initial("sus", "adults", TimeSeries::from_assumption(50.0, None));
        ps.set_initial("alive", "adults", TimeSeries::from_assumption(100.0, None));
        assert!(initial_stocks(&fw, &ps, &pop, 2000.0, 1e-6).is_err());
    }

    #[test]
    fn test_negative_solution_rejected() {
        let (mut fw, mut ps, pop) = framework_and_parset();
        fw.compartments.truncate(2);
        fw.compartments[1].databook_init = true;
        fw.characteristics.push(CharacteristicSpec {
            id: "alive".into(),
            name: "alive".into(),
            components: vec!["sus".into(), "inf".into()],
            denominator: None,
            databook_init: true,
        });
        ps.set_initial("alive", "adults", TimeSeries::from_assumption(10.0, None));
        ps.set_initial("inf", "adults", TimeSeries::from_assumption(25.0, None));
        assert!(initial_stocks(&fw, &ps, &pop, 2000.0, 1e-6).is_err());
    }
}
