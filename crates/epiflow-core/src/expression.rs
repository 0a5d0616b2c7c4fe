//! Expression evaluation for function parameters.
//!
//! Framework-declared function parameters carry a formula string evaluated
//! each step against the already-resolved values of their dependencies.
//! Formulas are evaluated with `evalexpr` after a preprocessing pass that
//! accepts the spreadsheet-flavoured syntax model authors actually write:
//! Python-style `**` for exponentiation, bare math function names
//! (`exp(x)` rather than `math::exp(x)`), and `log` for the natural
//! logarithm.
//!
//! Two variables are always available: `t` (current simulation time) and
//! `dt` (step size), along with the constants `pi` and `e`.

use std::collections::{BTreeSet, HashMap};

use evalexpr::{
    build_operator_tree, ContextWithMutableVariables, EvalexprError, HashMapContext, Node, Value,
};
use serde::{Deserialize, Serialize};

const SPECIAL_VARS: &[&str] = &["t", "dt", "pi", "e"];

/// Math functions that evalexpr exposes under the `math::` namespace.
/// Longest names first so that e.g. `asin` is rewritten before `sin`.
const MATH_FUNCTIONS: &[&str] = &[
    "atan2", "asinh", "acosh", "atanh", "log10", "asin", "acos", "atan", "sinh", "cosh", "tanh",
    "log2", "sqrt", "cbrt", "sin", "cos", "tan", "exp", "abs", "pow", "ln",
];

/// Errors raised when parsing or evaluating a formula.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("invalid formula '{formula}': {source}")]
    Parse {
        formula: String,
        source: EvalexprError,
    },
    #[error("failed to evaluate '{formula}': {source}")]
    Eval {
        formula: String,
        source: EvalexprError,
    },
    #[error("formula '{formula}' did not evaluate to a number")]
    NotANumber { formula: String },
}

/// Named values a formula is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    values: HashMap<String, f64>,
    t: f64,
    dt: f64,
}

impl EvalContext {
    pub fn new(t: f64, dt: f64) -> Self {
        Self {
            values: HashMap::new(),
            t,
            dt,
        }
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    fn to_evalexpr(&self) -> HashMapContext {
        let mut ctx = HashMapContext::new();
        for (name, value) in &self.values {
            ctx.set_value(name.clone(), Value::Float(*value)).ok();
        }
        ctx.set_value("t".into(), Value::Float(self.t)).ok();
        ctx.set_value("dt".into(), Value::Float(self.dt)).ok();
        ctx.set_value("pi".into(), Value::Float(std::f64::consts::PI))
            .ok();
        ctx.set_value("e".into(), Value::Float(std::f64::consts::E))
            .ok();
        ctx
    }
}

/// Rewrite author syntax into evalexpr syntax.
fn preprocess(formula: &str) -> String {
    let mut result = formula.replace("**", "^");
    // Plain log means natural log here; evalexpr's math::log wants a base.
    result = rewrite_calls(&result, "log", "ln");
    for func in MATH_FUNCTIONS {
        let namespaced = format!("math::{func}");
        result = rewrite_calls(&result, func, &namespaced);
    }
    result
}

/// Replace `name(` call sites with `replacement(`, respecting identifier
/// boundaries and skipping already-namespaced calls.
fn rewrite_calls(formula: &str, name: &str, replacement: &str) -> String {
    let pattern = format!("{name}(");
    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;
    while let Some(pos) = rest.find(&pattern) {
        let preceding = rest[..pos].chars().next_back();
        let boundary = match preceding {
            Some(c) => !c.is_alphanumeric() && c != '_' && c != ':',
            None => true,
        };
        out.push_str(&rest[..pos]);
        if boundary {
            out.push_str(replacement);
        } else {
            out.push_str(name);
        }
        out.push('(');
        rest = &rest[pos + pattern.len()..];
    }
    out.push_str(rest);
    out
}

/// A parsed formula with its cached operator tree.
#[derive(Debug, Clone)]
pub struct Expression {
    /// The formula as written by the model author.
    pub formula: String,
    tree: Node,
}

// An expression serializes as its formula string; deserialization re-parses
// so the cached tree is always present.
impl Serialize for Expression {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.formula)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let formula = String::deserialize(deserializer)?;
        Expression::parse(&formula).map_err(serde::de::Error::custom)
    }
}

impl Expression {
    /// Parse a formula, reporting syntax errors up front.
    pub fn parse(formula: &str) -> Result<Self, ExpressionError> {
        let preprocessed = preprocess(formula);
        let tree = build_operator_tree(&preprocessed).map_err(|source| ExpressionError::Parse {
            formula: formula.to_string(),
            source,
        })?;
        Ok(Self {
            formula: formula.to_string(),
            tree,
        })
    }

    /// Evaluate against the given context.
    pub fn evaluate(&self, context: &EvalContext) -> Result<f64, ExpressionError> {
        let ctx = context.to_evalexpr();
        match self.tree.eval_with_context(&ctx) {
            Ok(Value::Float(x)) => Ok(x),
            Ok(Value::Int(x)) => Ok(x as f64),
            Ok(_) => Err(ExpressionError::NotANumber {
                formula: self.formula.clone(),
            }),
            Err(source) => Err(ExpressionError::Eval {
                formula: self.formula.clone(),
                source,
            }),
        }
    }

    /// Variable names the formula reads, excluding the always-available
    /// specials. Sorted, so validation diagnostics are deterministic.
    pub fn variables(&self) -> Vec<String> {
        let mut vars = BTreeSet::new();
        for ident in self.tree.iter_variable_identifiers() {
            if !SPECIAL_VARS.contains(&ident) {
                vars.insert(ident.to_string());
            }
        }
        vars.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(formula: &str, vars: &[(&str, f64)]) -> f64 {
        let expr = Expression::parse(formula).unwrap();
        let mut ctx = EvalContext::new(0.0, 0.25);
        for (name, value) in vars {
            ctx.set(name, *value);
        }
        expr.evaluate(&ctx).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("foi * susceptible", &[("foi", 0.5), ("susceptible", 100.0)]), 50.0);
    }

    #[test]
    fn test_python_power_operator() {
        assert_eq!(eval("base ** 2", &[("base", 3.0)]), 9.0);
    }

    #[test]
    fn test_math_functions_without_prefix() {
        let y = eval("exp(-rate)", &[("rate", 1.0)]);
        assert!((y - (-1.0f64).exp()).abs() < 1e-12);
        let y = eval("log(x)", &[("x", std::f64::consts::E)]);
        assert!((y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_identifier_boundary_not_rewritten() {
        // `analog` contains `log` but is a variable, not a call.
        assert_eq!(eval("analog + 1", &[("analog", 2.0)]), 3.0);
    }

    #[test]
    fn test_special_variables() {
        let expr = Expression::parse("t + dt").unwrap();
        let ctx = EvalContext::new(2020.0, 0.25);
        assert_eq!(expr.evaluate(&ctx).unwrap(), 2020.25);
    }

    #[test]
    fn test_variables_excludes_specials() {
        let expr = Expression::parse("beta * contacts * t / dt").unwrap();
        assert_eq!(expr.variables(), vec!["beta".to_string(), "contacts".to_string()]);
    }

    #[test]
    fn test_parse_error_reported() {
        assert!(Expression::parse("beta *").is_err());
    }

    #[test]
    fn test_missing_variable_errors() {
        let expr = Expression::parse("beta * 2").unwrap();
        let ctx = EvalContext::new(0.0, 1.0);
        assert!(expr.evaluate(&ctx).is_err());
    }

    #[test]
    fn test_deserialized_formula_evaluates() {
        let expr: Expression = serde_json::from_str("\"gamma * 2\"").unwrap();
        let mut ctx = EvalContext::new(0.0, 1.0);
        ctx.set("gamma", 0.5);
        assert_eq!(expr.evaluate(&ctx).unwrap(), 1.0);
    }
}
