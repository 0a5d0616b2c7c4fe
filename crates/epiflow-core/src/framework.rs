//! Framework: the declarative model topology.
//!
//! A [`Framework`] names the compartments, characteristics, parameters and
//! transitions of the model, along with cross-population transfers,
//! interaction weight matrices and cascade definitions. It is constructed by
//! an external authoring layer, validated once with [`Framework::validate`],
//! and consumed read-only by the engine.
//!
//! Compartment and parameter variants are tagged enums with exhaustive
//! dispatch at every use site; adding a new kind is a compile-time-visible
//! change, not a new subclass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expression::Expression;

/// The behavioural kind of a compartment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompartmentKind {
    /// Ordinary stock.
    Plain,
    /// Zero-residence stock: all inflow is redistributed along outgoing
    /// links within the same step.
    Junction,
    /// Infinite supply feeding birth/import flows; holds no stock.
    Source,
    /// Pure absorber (deaths, emigration); never flows out.
    Sink,
    /// Duration-tracked stock subdivided into residence bins.
    Timed {
        /// Id of the `Duration`-format parameter giving the dwell time.
        /// The outgoing transition driven by this parameter is the flush
        /// (expiry) link.
        duration_parameter: String,
        /// Transitions between timed compartments sharing a group label
        /// preserve bin position.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_group: Option<String>,
    },
}

impl CompartmentKind {
    pub fn is_junction(&self) -> bool {
        matches!(self, CompartmentKind::Junction)
    }

    pub fn is_timed(&self) -> bool {
        matches!(self, CompartmentKind::Timed { .. })
    }
}

/// Declared units of a parameter, driving unit conversion and which
/// transitions the parameter may drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterFormat {
    /// Absolute people per year.
    Number,
    /// Annualized probability.
    Probability,
    /// Dimensionless share; only valid on junction outflows.
    Proportion,
    /// Mean residence time in years.
    Duration,
}

/// How a derived parameter obtains its value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterFunction {
    /// Formula over earlier-declared parameters, compartments and
    /// characteristics of the same population.
    Expression { formula: Expression },
    /// Interaction-weighted average of another parameter across populations.
    SrcPopAvg {
        parameter: String,
        interaction: String,
    },
    /// Interaction-weighted sum of another parameter across populations.
    SrcPopSum {
        parameter: String,
        interaction: String,
    },
}

/// A parameter declaration. Declaration order is authoritative: a function
/// parameter may only depend on quantities declared strictly earlier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub id: String,
    pub name: String,
    pub format: ParameterFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<ParameterFunction>,
    /// Parameter/compartment/characteristic ids a function reads. Must cover
    /// every variable in the formula.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Optional clamp applied after resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// A compartment declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompartmentSpec {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: CompartmentKind,
    /// Whether the databook provides an initial value for this compartment.
    #[serde(default)]
    pub databook_init: bool,
}

/// A characteristic: a named sum of compartments (or other characteristics),
/// optionally normalized by a denominator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacteristicSpec {
    pub id: String,
    pub name: String,
    pub components: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator: Option<String>,
    #[serde(default)]
    pub databook_init: bool,
}

/// A directed transition between two compartments, driven by a parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub id: String,
    pub source: String,
    pub dest: String,
    pub parameter: String,
}

/// A named cross-population coupling moving people between the same
/// compartment of two populations of the same type (aging, migration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSpec {
    pub id: String,
    pub name: String,
    pub format: ParameterFormat,
}

/// A named weight matrix used by `SrcPopAvg`/`SrcPopSum` parameters
/// (e.g. force-of-infection mixing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionSpec {
    pub id: String,
    pub name: String,
}

/// One stage of a cascade: a label and the compartments/characteristics it
/// contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeStage {
    pub name: String,
    pub members: Vec<String>,
}

/// A cascade: ordered stages, each a subset of its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cascade {
    pub name: String,
    pub stages: Vec<CascadeStage>,
}

/// The complete declarative model topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Framework {
    pub name: String,
    #[serde(default)]
    pub compartments: Vec<CompartmentSpec>,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
    #[serde(default)]
    pub transfers: Vec<TransferSpec>,
    #[serde(default)]
    pub interactions: Vec<InteractionSpec>,
    #[serde(default)]
    pub cascades: Vec<Cascade>,
}

impl Framework {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn compartment(&self, id: &str) -> Option<&CompartmentSpec> {
        self.compartments.iter().find(|c| c.id == id)
    }

    pub fn characteristic(&self, id: &str) -> Option<&CharacteristicSpec> {
        self.characteristics.iter().find(|c| c.id == id)
    }

    pub fn parameter(&self, id: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.id == id)
    }

    /// Index of a parameter in declaration order.
    pub fn parameter_index(&self, id: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.id == id)
    }

    pub fn compartment_index(&self, id: &str) -> Option<usize> {
        self.compartments.iter().position(|c| c.id == id)
    }

    pub fn transfer(&self, id: &str) -> Option<&TransferSpec> {
        self.transfers.iter().find(|t| t.id == id)
    }

    pub fn interaction(&self, id: &str) -> Option<&InteractionSpec> {
        self.interactions.iter().find(|i| i.id == id)
    }

    /// Transitions leaving the given compartment, in declaration order.
    pub fn transitions_from<'a>(
        &'a self,
        comp_id: &'a str,
    ) -> impl Iterator<Item = &'a TransitionSpec> + 'a {
        self.transitions.iter().filter(move |tr| tr.source == comp_id)
    }

    /// Transitions entering the given compartment, in declaration order.
    pub fn transitions_into<'a>(
        &'a self,
        comp_id: &'a str,
    ) -> impl Iterator<Item = &'a TransitionSpec> + 'a {
        self.transitions.iter().filter(move |tr| tr.dest == comp_id)
    }

    /// Map from compartment id to its index, for dense runtime storage.
    pub fn compartment_lookup(&self) -> HashMap<String, usize> {
        self.compartments
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.id.clone(), idx))
            .collect()
    }
}
