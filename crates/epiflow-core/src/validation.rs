//! Structural validation of a [`Framework`].
//!
//! Every check here runs before a single simulation step: a framework that
//! passes validation cannot produce a junction deadlock, an unresolvable
//! dependency, or a mis-formatted transition at runtime.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::framework::{
    CompartmentKind, Framework, ParameterFormat, ParameterFunction,
};

/// Structural problems detected before stepping.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkValidationError {
    #[error("duplicate name '{0}'")]
    DuplicateName(String),
    #[error("'{referrer}' references unknown '{referenced}'")]
    UnknownReference {
        referrer: String,
        referenced: String,
    },
    #[error("transition '{0}' connects a compartment to itself")]
    SelfTransition(String),
    #[error("junction '{junction}' outflow parameter '{parameter}' must be in proportion format")]
    JunctionOutflowFormat {
        junction: String,
        parameter: String,
    },
    #[error("junction '{0}' has no outgoing transitions")]
    JunctionNoOutflow(String),
    #[error("junction '{0}' cannot reach a non-junction compartment")]
    JunctionNoTerminal(String),
    #[error("proportion parameter '{parameter}' drives non-junction transition '{transition}'")]
    ProportionOutsideJunction {
        parameter: String,
        transition: String,
    },
    #[error(
        "parameter '{parameter}' depends on '{dependency}' which is declared later; \
         dependencies must resolve strictly earlier in declaration order"
    )]
    DependencyOrder {
        parameter: String,
        dependency: String,
    },
    #[error("parameter '{parameter}' formula reads '{variable}' which is not a declared dependency")]
    UndeclaredDependency {
        parameter: String,
        variable: String,
    },
    #[error("timed compartment '{compartment}' duration parameter '{parameter}' is not in duration format")]
    DurationFormat {
        compartment: String,
        parameter: String,
    },
    #[error(
        "timed compartment '{compartment}' must have exactly one outgoing transition driven by \
         its duration parameter, found {found}"
    )]
    FlushLinkCount { compartment: String, found: usize },
    #[error("source compartment '{0}' has an incoming transition")]
    SourceInflow(String),
    #[error("transition '{transition}' out of source '{compartment}' must be driven by a number-format parameter")]
    SourceOutflowFormat {
        compartment: String,
        transition: String,
    },
    #[error("sink compartment '{0}' has an outgoing transition")]
    SinkOutflow(String),
    #[error("cascade '{cascade}' stage '{stage}' is not nested within the preceding stage")]
    CascadeNotNested { cascade: String, stage: String },
    #[error("characteristic '{0}' is part of a component cycle")]
    CharacteristicCycle(String),
}

impl Framework {
    /// Run all structural checks. An `Ok` framework is safe to integrate.
    pub fn validate(&self) -> Result<(), FrameworkValidationError> {
        self.check_unique_names()?;
        self.check_references()?;
        self.check_sources_and_sinks()?;
        self.check_junctions()?;
        self.check_proportion_usage()?;
        self.check_timed_compartments()?;
        self.check_dependency_order()?;
        self.check_characteristics()?;
        self.check_cascades()?;
        Ok(())
    }

    /// Compartments, characteristics and parameters share the expression
    /// variable namespace; transitions, transfers and interactions each get
    /// their own.
    fn check_unique_names(&self) -> Result<(), FrameworkValidationError> {
        let mut seen = HashSet::new();
        let variable_names = self
            .compartments
            .iter()
            .map(|c| &c.id)
            .chain(self.characteristics.iter().map(|c| &c.id))
            .chain(self.parameters.iter().map(|p| &p.id));
        for id in variable_names {
            if !seen.insert(id.as_str()) {
                return Err(FrameworkValidationError::DuplicateName(id.clone()));
            }
        }
        for ids in [
            self.transitions.iter().map(|t| &t.id).collect::<Vec<_>>(),
            self.transfers.iter().map(|t| &t.id).collect(),
            self.interactions.iter().map(|i| &i.id).collect(),
        ] {
            let mut seen = HashSet::new();
            for id in ids {
                if !seen.insert(id.as_str()) {
                    return Err(FrameworkValidationError::DuplicateName(id.clone()));
                }
            }
        }
        Ok(())
    }

    fn check_references(&self) -> Result<(), FrameworkValidationError> {
        for tr in &self.transitions {
            for comp in [&tr.source, &tr.dest] {
                if self.compartment(comp).is_none() {
                    return Err(FrameworkValidationError::UnknownReference {
                        referrer: tr.id.clone(),
                        referenced: comp.clone(),
                    });
                }
            }
            if self.parameter(&tr.parameter).is_none() {
                return Err(FrameworkValidationError::UnknownReference {
                    referrer: tr.id.clone(),
                    referenced: tr.parameter.clone(),
                });
            }
            if tr.source == tr.dest {
                return Err(FrameworkValidationError::SelfTransition(tr.id.clone()));
            }
        }
        for charac in &self.characteristics {
            for comp in charac
                .components
                .iter()
                .chain(charac.denominator.as_ref())
            {
                if self.compartment(comp).is_none() && self.characteristic(comp).is_none() {
                    return Err(FrameworkValidationError::UnknownReference {
                        referrer: charac.id.clone(),
                        referenced: comp.clone(),
                    });
                }
            }
        }
        for par in &self.parameters {
            if let Some(ParameterFunction::SrcPopAvg { parameter, interaction })
            | Some(ParameterFunction::SrcPopSum { parameter, interaction }) = &par.function
            {
                if self.parameter(parameter).is_none() {
                    return Err(FrameworkValidationError::UnknownReference {
                        referrer: par.id.clone(),
                        referenced: parameter.clone(),
                    });
                }
                if self.interaction(interaction).is_none() {
                    return Err(FrameworkValidationError::UnknownReference {
                        referrer: par.id.clone(),
                        referenced: interaction.clone(),
                    });
                }
            }
            for dep in &par.dependencies {
                if self.parameter(dep).is_none()
                    && self.compartment(dep).is_none()
                    && self.characteristic(dep).is_none()
                {
                    return Err(FrameworkValidationError::UnknownReference {
                        referrer: par.id.clone(),
                        referenced: dep.clone(),
                    });
                }
            }
        }
        for cascade in &self.cascades {
            for stage in &cascade.stages {
                for member in &stage.members {
                    if self.compartment(member).is_none() && self.characteristic(member).is_none() {
                        return Err(FrameworkValidationError::UnknownReference {
                            referrer: cascade.name.clone(),
                            referenced: member.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_sources_and_sinks(&self) -> Result<(), FrameworkValidationError> {
        for comp in &self.compartments {
            match comp.kind {
                CompartmentKind::Source => {
                    if self.transitions_into(&comp.id).next().is_some() {
                        return Err(FrameworkValidationError::SourceInflow(comp.id.clone()));
                    }
                    for tr in self.transitions_from(&comp.id) {
                        let par = self.parameter(&tr.parameter).expect("checked above");
                        if par.format != ParameterFormat::Number {
                            return Err(FrameworkValidationError::SourceOutflowFormat {
                                compartment: comp.id.clone(),
                                transition: tr.id.clone(),
                            });
                        }
                    }
                }
                CompartmentKind::Sink => {
                    if self.transitions_from(&comp.id).next().is_some() {
                        return Err(FrameworkValidationError::SinkOutflow(comp.id.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Junction outflows must be proportion-format, and every junction must
    /// reach a non-junction terminal. Reachability is breadth-first across
    /// junction-to-junction edges, so a junction cycle with no terminal leak
    /// is rejected here instead of looping at runtime.
    fn check_junctions(&self) -> Result<(), FrameworkValidationError> {
        for comp in &self.compartments {
            if !comp.kind.is_junction() {
                continue;
            }
            let mut outflows = 0;
            for tr in self.transitions_from(&comp.id) {
                outflows += 1;
                let par = self.parameter(&tr.parameter).expect("checked above");
                if par.format != ParameterFormat::Proportion {
                    return Err(FrameworkValidationError::JunctionOutflowFormat {
                        junction: comp.id.clone(),
                        parameter: par.id.clone(),
                    });
                }
            }
            if outflows == 0 {
                return Err(FrameworkValidationError::JunctionNoOutflow(comp.id.clone()));
            }

            let mut visited = HashSet::new();
            let mut queue = VecDeque::from([comp.id.as_str()]);
            let mut terminal_found = false;
            while let Some(current) = queue.pop_front() {
                if !visited.insert(current) {
                    continue;
                }
                for tr in self.transitions_from(current) {
                    let dest = self.compartment(&tr.dest).expect("checked above");
                    if dest.kind.is_junction() {
                        queue.push_back(&dest.id);
                    } else {
                        terminal_found = true;
                    }
                }
                if terminal_found {
                    break;
                }
            }
            if !terminal_found {
                return Err(FrameworkValidationError::JunctionNoTerminal(comp.id.clone()));
            }
        }
        Ok(())
    }

    fn check_proportion_usage(&self) -> Result<(), FrameworkValidationError> {
        for tr in &self.transitions {
            let par = self.parameter(&tr.parameter).expect("checked above");
            let source = self.compartment(&tr.source).expect("checked above");
            if par.format == ParameterFormat::Proportion && !source.kind.is_junction() {
                return Err(FrameworkValidationError::ProportionOutsideJunction {
                    parameter: par.id.clone(),
                    transition: tr.id.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_timed_compartments(&self) -> Result<(), FrameworkValidationError> {
        for comp in &self.compartments {
            let CompartmentKind::Timed {
                ref duration_parameter,
                ..
            } = comp.kind
            else {
                continue;
            };
            let par = self.parameter(duration_parameter).ok_or_else(|| {
                FrameworkValidationError::UnknownReference {
                    referrer: comp.id.clone(),
                    referenced: duration_parameter.clone(),
                }
            })?;
            if par.format != ParameterFormat::Duration {
                return Err(FrameworkValidationError::DurationFormat {
                    compartment: comp.id.clone(),
                    parameter: par.id.clone(),
                });
            }
            let flush_links = self
                .transitions_from(&comp.id)
                .filter(|tr| &tr.parameter == duration_parameter)
                .count();
            if flush_links != 1 {
                return Err(FrameworkValidationError::FlushLinkCount {
                    compartment: comp.id.clone(),
                    found: flush_links,
                });
            }
        }
        Ok(())
    }

    /// Declaration (row) order is authoritative: a function parameter may
    /// only read parameters declared strictly earlier. Out-of-order
    /// dependencies are an error here, never silently reordered.
    fn check_dependency_order(&self) -> Result<(), FrameworkValidationError> {
        let order: HashMap<&str, usize> = self
            .parameters
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.id.as_str(), idx))
            .collect();
        for (idx, par) in self.parameters.iter().enumerate() {
            let Some(function) = &par.function else {
                continue;
            };
            match function {
                ParameterFunction::Expression { formula } => {
                    for variable in formula.variables() {
                        if !par.dependencies.contains(&variable) {
                            return Err(FrameworkValidationError::UndeclaredDependency {
                                parameter: par.id.clone(),
                                variable,
                            });
                        }
                    }
                    for dep in &par.dependencies {
                        if let Some(&dep_idx) = order.get(dep.as_str()) {
                            if dep_idx >= idx {
                                return Err(FrameworkValidationError::DependencyOrder {
                                    parameter: par.id.clone(),
                                    dependency: dep.clone(),
                                });
                            }
                        }
                        // Compartments and characteristics are step-t state,
                        // always resolved before parameters.
                    }
                }
                ParameterFunction::SrcPopAvg { parameter, .. }
                | ParameterFunction::SrcPopSum { parameter, .. } => {
                    let dep_idx = order[parameter.as_str()];
                    if dep_idx >= idx {
                        return Err(FrameworkValidationError::DependencyOrder {
                            parameter: par.id.clone(),
                            dependency: parameter.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_characteristics(&self) -> Result<(), FrameworkValidationError> {
        // Depth-first cycle check over characteristic-to-characteristic
        // component edges.
        fn visit<'a>(
            fw: &'a Framework,
            id: &'a str,
            visiting: &mut HashSet<&'a str>,
            done: &mut HashSet<&'a str>,
        ) -> Result<(), FrameworkValidationError> {
            if done.contains(id) {
                return Ok(());
            }
            if !visiting.insert(id) {
                return Err(FrameworkValidationError::CharacteristicCycle(id.to_string()));
            }
            if let Some(charac) = fw.characteristic(id) {
                for component in charac.components.iter().chain(charac.denominator.as_ref()) {
                    visit(fw, component, visiting, done)?;
                }
            }
            visiting.remove(id);
            done.insert(id);
            Ok(())
        }

        let mut done = HashSet::new();
        for charac in &self.characteristics {
            visit(self, &charac.id, &mut HashSet::new(), &mut done)?;
        }
        Ok(())
    }

    fn check_cascades(&self) -> Result<(), FrameworkValidationError> {
        for cascade in &self.cascades {
            for pair in cascade.stages.windows(2) {
                let outer: HashSet<&str> = pair[0].members.iter().map(String::as_str).collect();
                if !pair[1].members.iter().all(|m| outer.contains(m.as_str())) {
                    return Err(FrameworkValidationError::CascadeNotNested {
                        cascade: cascade.name.clone(),
                        stage: pair[1].name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
