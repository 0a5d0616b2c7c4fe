//! Runtime transition links and unit conversion.

use epiflow_core::ParameterFormat;

use crate::error::NumericalKind;

/// A directed transition between two compartments of one population.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: String,
    pub source: usize,
    pub dest: usize,
    /// Index of the driving parameter in the population's parameter list.
    pub parameter: usize,
    /// Whether this is the flush (expiry) link of a timed source.
    pub is_flush: bool,
    /// Applied flow per step; `flow[step]` moves people between `step` and
    /// `step + 1`.
    pub flow: Vec<f64>,
}

impl Link {
    pub fn new(
        id: impl Into<String>,
        source: usize,
        dest: usize,
        parameter: usize,
        n_steps: usize,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            dest,
            parameter,
            is_flush: false,
            flow: vec![0.0; n_steps],
        }
    }
}

/// Convert an annualized parameter value into the per-step outflow fraction
/// of the eligible stock.
///
/// The conversions are exact, not first-order: an annual probability `p`
/// compounds to `1 - (1-p)^dt` over a fractional year, and a mean residence
/// time `d` becomes the exponential decay fraction `1 - exp(-dt/d)`. Number
/// and proportion formats do not describe a fraction of stock and are
/// handled by the caller.
pub fn per_step_fraction(
    format: ParameterFormat,
    value: f64,
    dt: f64,
) -> Result<f64, NumericalKind> {
    match format {
        ParameterFormat::Probability => {
            if value < 0.0 {
                return Err(NumericalKind::NegativeFlow(value));
            }
            // An annual probability above 1 saturates: the compartment
            // empties within the year.
            let p = value.min(1.0);
            Ok(1.0 - (1.0 - p).powf(dt))
        }
        ParameterFormat::Duration => {
            if value <= 0.0 {
                return Err(NumericalKind::NonPositiveDuration(value));
            }
            Ok(1.0 - (-dt / value).exp())
        }
        ParameterFormat::Number | ParameterFormat::Proportion => Ok(0.0),
    }
}
