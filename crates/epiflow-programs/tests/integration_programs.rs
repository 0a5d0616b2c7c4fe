//! The coverage layer driving a real engine run: spend-derived coverage
//! overriding a transition parameter, instruction windows, and
//! construction-time configuration errors.

use epiflow_core::{
    CompartmentKind, CompartmentSpec, Framework, ParameterFormat, ParameterSpec, ParameterSet,
    PopulationDef, TimeSeries, TransitionSpec,
};
use epiflow_engine::{Integrator, SimConfig};
use epiflow_programs::{
    ConfigurationError, CoverageInteraction, CoverageLayer, Covout, Program, ProgramInstructions,
    ProgramSet,
};

fn constant(value: f64) -> TimeSeries {
    TimeSeries::from_assumption(value, None)
}

/// Untreated <- treatment parameter -> treated, with 1000 people eligible.
fn treatment_model() -> (Framework, ParameterSet) {
    let mut fw = Framework::new("treatment");
    fw.compartments = vec![
        CompartmentSpec {
            id: "untreated".into(),
            name: "untreated".into(),
            kind: CompartmentKind::Plain,
            databook_init: true,
        },
        CompartmentSpec {
            id: "treated".into(),
            name: "treated".into(),
            kind: CompartmentKind::Plain,
            databook_init: true,
        },
    ];
    fw.parameters = vec![ParameterSpec {
        id: "tx_rate".into(),
        name: "treatment initiation".into(),
        format: ParameterFormat::Probability,
        function: None,
        dependencies: vec![],
        min: None,
        max: None,
    }];
    fw.transitions = vec![TransitionSpec {
        id: "initiation".into(),
        source: "untreated".into(),
        dest: "treated".into(),
        parameter: "tx_rate".into(),
    }];
    let mut ps = ParameterSet::new("default");
    ps.populations.push(PopulationDef {
        id: "adults".into(),
        name: "Adults".into(),
        pop_type: "default".into(),
    });
    ps.set_data("tx_rate", "adults", constant(0.1));
    ps.set_initial("untreated", "adults", constant(1000.0));
    ps.set_initial("treated", "adults", constant(0.0));
    (fw, ps)
}

fn outreach_program() -> Program {
    Program {
        id: "outreach".into(),
        label: "Treatment outreach".into(),
        target_compartments: vec!["untreated".into()],
        target_populations: vec!["adults".into()],
        // $50,000/year at $100 per person reaches 500 people.
        spend: constant(50_000.0),
        unit_cost: constant(100.0),
        capacity: None,
        coverage: None,
    }
}

fn progset(baseline: f64, outcome: f64) -> ProgramSet {
    ProgramSet {
        name: "response".into(),
        programs: vec![outreach_program()],
        covouts: vec![Covout {
            parameter: "tx_rate".into(),
            population: "adults".into(),
            baseline,
            outcomes: vec![("outreach".into(), outcome)],
            interaction: CoverageInteraction::Additive,
        }],
    }
}

fn config() -> SimConfig {
    SimConfig {
        start: 2000.0,
        stop: 2001.0,
        dt: 0.25,
        ..Default::default()
    }
}

#[test]
fn test_spend_derived_coverage_overrides_parameter() {
    let (fw, ps) = treatment_model();
    let layer = CoverageLayer::new(
        progset(0.1, 0.9),
        ProgramInstructions::new(2000.0, 2010.0),
        &fw,
        &ps.populations,
    )
    .unwrap();

    let result = Integrator::new(&fw, &ps, config())
        .unwrap()
        .with_overlay(Box::new(layer))
        .run()
        .unwrap();

    // 500 of 1000 eligible reached: coverage 0.5, so the effective rate is
    // 0.1 + 0.5 * (0.9 - 0.1) = 0.5 at the first step.
    let tx_rate = result.parameter("adults", "tx_rate").unwrap();
    assert!((tx_rate[0] - 0.5).abs() < 1e-9);
    // As people start treatment the eligible pool shrinks, coverage rises,
    // and the effective rate climbs towards the program outcome.
    assert!(tx_rate[1] > tx_rate[0]);
    assert!(tx_rate.iter().all(|&v| v <= 0.9 + 1e-9));
}

#[test]
fn test_outside_instruction_window_keeps_databook_value() {
    let (fw, ps) = treatment_model();
    let layer = CoverageLayer::new(
        progset(0.1, 0.9),
        // Programs only active from 2005; this run ends in 2001.
        ProgramInstructions::new(2005.0, 2010.0),
        &fw,
        &ps.populations,
    )
    .unwrap();

    let result = Integrator::new(&fw, &ps, config())
        .unwrap()
        .with_overlay(Box::new(layer))
        .run()
        .unwrap();
    let tx_rate = result.parameter("adults", "tx_rate").unwrap();
    assert!(tx_rate.iter().all(|&v| (v - 0.1).abs() < 1e-9));
}

#[test]
fn test_capacity_caps_people_reached() {
    let (fw, ps) = treatment_model();
    let mut program = outreach_program();
    program.capacity = Some(constant(200.0));
    let layer = CoverageLayer::new(
        ProgramSet {
            name: "response".into(),
            programs: vec![program],
            covouts: progset(0.1, 0.9).covouts,
        },
        ProgramInstructions::new(2000.0, 2010.0),
        &fw,
        &ps.populations,
    )
    .unwrap();

    let result = Integrator::new(&fw, &ps, config())
        .unwrap()
        .with_overlay(Box::new(layer))
        .run()
        .unwrap();
    // Capacity 200 of 1000 eligible: coverage 0.2, rate 0.1 + 0.2*0.8.
    let tx_rate = result.parameter("adults", "tx_rate").unwrap();
    assert!((tx_rate[0] - 0.26).abs() < 1e-9);
}

#[test]
fn test_coverage_instruction_bypasses_spending() {
    let (fw, ps) = treatment_model();
    let mut instructions = ProgramInstructions::new(2000.0, 2010.0);
    instructions
        .coverage
        .insert("outreach".into(), constant(1.0));
    let layer =
        CoverageLayer::new(progset(0.1, 0.9), instructions, &fw, &ps.populations).unwrap();

    let result = Integrator::new(&fw, &ps, config())
        .unwrap()
        .with_overlay(Box::new(layer))
        .run()
        .unwrap();
    // Full coverage pins the parameter at the program outcome.
    let tx_rate = result.parameter("adults", "tx_rate").unwrap();
    assert!(tx_rate.iter().all(|&v| (v - 0.9).abs() < 1e-9));
}

#[test]
fn test_unknown_parameter_rejected_at_construction() {
    let (fw, ps) = treatment_model();
    let mut set = progset(0.1, 0.9);
    set.covouts[0].parameter = "ghost".into();
    let err = CoverageLayer::new(
        set,
        ProgramInstructions::new(2000.0, 2010.0),
        &fw,
        &ps.populations,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigurationError::UnknownParameter { .. }));
}

#[test]
fn test_unknown_instruction_program_rejected() {
    let (fw, ps) = treatment_model();
    let mut instructions = ProgramInstructions::new(2000.0, 2010.0);
    instructions.spending.insert("ghost".into(), constant(1.0));
    let err = CoverageLayer::new(progset(0.1, 0.9), instructions, &fw, &ps.populations)
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::InstructionUnknownProgram(_)
    ));
}

#[test]
fn test_program_targeting_unknown_population_rejected() {
    let (fw, ps) = treatment_model();
    let mut set = progset(0.1, 0.9);
    set.programs[0].target_populations = vec!["elderly".into()];
    let err = CoverageLayer::new(
        set,
        ProgramInstructions::new(2000.0, 2010.0),
        &fw,
        &ps.populations,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigurationError::UnknownPopulation { .. }));
}
