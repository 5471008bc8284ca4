//! Pre-flight checks on a step list.

use std::collections::HashMap;

use thiserror::Error;

use super::types::Step;

/// A step list that must not run at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' depends on '{dependency}', which comes later")]
    ForwardDependency { step: String, dependency: String },

    /// Two sessions claim the same exclusive resource.
    #[error("{resource} is bound by both '{first}' and '{second}'")]
    DuplicateResourceBinding {
        resource: String,
        first: String,
        second: String,
    },
}

/// Check ids are unique and every dependency refers to an earlier step.
pub fn validate_steps(steps: &[Step]) -> Result<(), SchedulerError> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        if positions.insert(step.id.as_str(), index).is_some() {
            return Err(SchedulerError::DuplicateStep(step.id.clone()));
        }
    }

    for (index, step) in steps.iter().enumerate() {
        for dependency in &step.depends_on {
            match positions.get(dependency.as_str()) {
                None => {
                    return Err(SchedulerError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    })
                }
                Some(&position) if position >= index => {
                    return Err(SchedulerError::ForwardDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}
