//! Initialisation order of interdependent workspaces.

use super::WorkspaceDefinition;
use crate::error::ConfigurationError;
use std::collections::{BTreeMap, BTreeSet};

/// Orders workspaces so every workspace comes after its dependencies.
///
/// Kahn's algorithm; among workspaces that are ready at the same time the
/// smallest id goes first, so the order is deterministic.
///
/// # Errors
///
/// Duplicate ids, dependencies on undeclared workspaces and cycles are
/// configuration errors.
pub fn resolve_initialization_order(
    definitions: &[WorkspaceDefinition],
) -> Result<Vec<String>, ConfigurationError> {
    let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for def in definitions {
        if dependencies.contains_key(def.id.as_str()) {
            return Err(ConfigurationError::DuplicateWorkspaceId { id: def.id.clone() });
        }
        dependencies.insert(&def.id, def.dependencies.iter().map(String::as_str).collect());
    }

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, deps) in &dependencies {
        for dep in deps {
            if !dependencies.contains_key(dep) {
                return Err(ConfigurationError::MissingDependency {
                    workspace: id.to_string(),
                    dependency: dep.to_string(),
                });
            }
            dependents.entry(*dep).or_default().push(*id);
        }
    }

    let mut remaining: BTreeMap<&str, usize> = dependencies
        .iter()
        .map(|(id, deps)| (*id, deps.len()))
        .collect();
    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(definitions.len());
    while let Some(id) = ready.pop_first() {
        remaining.remove(id);
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(n) = remaining.get_mut(dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if !remaining.is_empty() {
        return Err(ConfigurationError::DependencyCycle {
            workspaces: remaining.keys().map(|id| id.to_string()).collect(),
        });
    }
    Ok(order)
}
