//! Pipeline step declarations and dependency resolution

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use docflow_config::StepConfig;
use serde::{Deserialize, Serialize};

use crate::{
    error::{WorkflowError, WorkflowResult},
    models::{StepId, StepStatus, WorkflowState},
};

/// A declared step and its predecessors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepDefinition {
    /// Step identifier
    pub id: StepId,
    /// Human readable name
    pub name: String,
    /// Steps that must be completed or saved first
    pub depends_on: BTreeSet<StepId>,
}

impl StepDefinition {
    /// Create a step definition
    pub fn new(
        id: StepId,
        name: impl Into<String>,
        depends_on: impl IntoIterator<Item = StepId>,
    ) -> Self {
        StepDefinition {
            id,
            name: name.into(),
            depends_on: depends_on.into_iter().collect(),
        }
    }
}

/// Validated set of steps forming a DAG
///
/// Handles:
/// - Rejecting duplicate ids, unknown or self dependencies
/// - Detecting and reporting circular dependencies
/// - Building a deterministic execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    steps: BTreeMap<StepId, StepDefinition>,
    order: Vec<StepId>,
}

impl Pipeline {
    /// Validate `steps` and build the pipeline
    pub fn new(steps: Vec<StepDefinition>) -> WorkflowResult<Self> {
        if steps.is_empty() {
            return Err(WorkflowError::ConfigurationError(
                "pipeline must declare at least one step".to_string(),
            ));
        }

        let mut map = BTreeMap::new();
        for step in steps {
            let id = step.id;
            if map.insert(id, step).is_some() {
                return Err(WorkflowError::ConfigurationError(format!(
                    "duplicate step id {}",
                    id
                )));
            }
        }

        for step in map.values() {
            if step.depends_on.contains(&step.id) {
                return Err(WorkflowError::ConfigurationError(format!(
                    "step {} depends on itself",
                    step.id
                )));
            }
            if let Some(missing) = step.depends_on.iter().find(|d| !map.contains_key(d)) {
                return Err(WorkflowError::ConfigurationError(format!(
                    "step {} depends on undeclared step {}",
                    step.id, missing
                )));
            }
        }

        Self::detect_circular_dependencies(&map)?;
        let order = Self::topological_sort(&map)?;

        Ok(Pipeline { steps: map, order })
    }

    /// The linear documentation pipeline: each step depends on the previous one
    pub fn documentation_default() -> Self {
        let names = [
            "project-analysis",
            "architecture-overview",
            "file-analysis",
            "api-reference",
            "summary",
        ];

        let steps: BTreeMap<StepId, StepDefinition> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let id = i as StepId + 1;
                let deps = if id > 1 { vec![id - 1] } else { vec![] };
                (id, StepDefinition::new(id, *name, deps))
            })
            .collect();
        let order = steps.keys().copied().collect();

        Pipeline { steps, order }
    }

    /// Build from configuration declarations
    pub fn from_config(steps: &[StepConfig]) -> WorkflowResult<Self> {
        Self::new(
            steps
                .iter()
                .map(|s| StepDefinition::new(s.id, s.name.clone(), s.depends_on.iter().copied()))
                .collect(),
        )
    }

    /// Look up a step
    pub fn step(&self, id: StepId) -> Option<&StepDefinition> {
        self.steps.get(&id)
    }

    /// All steps ordered by id
    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.values()
    }

    /// All step ids ordered by id
    pub fn step_ids(&self) -> impl Iterator<Item = StepId> + '_ {
        self.steps.keys().copied()
    }

    /// Number of declared steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; a pipeline has at least one step
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Topological order, ties broken by step id
    pub fn execution_order(&self) -> &[StepId] {
        &self.order
    }

    /// Declared predecessors of `id` whose status does not satisfy the gate
    pub fn unmet_dependencies(
        &self,
        id: StepId,
        state: &WorkflowState,
    ) -> WorkflowResult<Vec<StepId>> {
        let step = self
            .step(id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Step not found: {}", id)))?;

        Ok(step
            .depends_on
            .iter()
            .copied()
            .filter(|dep| !state.status(*dep).map(|s| s.is_done()).unwrap_or(false))
            .collect())
    }

    /// Steps that may start now: not started or failed, with all predecessors done
    pub fn ready_steps(&self, state: &WorkflowState) -> Vec<StepId> {
        self.order
            .iter()
            .copied()
            .filter(|id| {
                matches!(
                    state.status(*id),
                    Some(StepStatus::NotStarted) | Some(StepStatus::Failed)
                )
            })
            .filter(|id| {
                self.unmet_dependencies(*id, state)
                    .map(|missing| missing.is_empty())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Kahn's algorithm with a sorted ready set so equal-rank steps run by id
    fn topological_sort(steps: &BTreeMap<StepId, StepDefinition>) -> WorkflowResult<Vec<StepId>> {
        let mut remaining: HashMap<StepId, usize> = steps
            .values()
            .map(|s| (s.id, s.depends_on.len()))
            .collect();
        let mut ready: BTreeSet<StepId> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(steps.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for dependent in steps.values().filter(|s| s.depends_on.contains(&id)) {
                if let Some(count) = remaining.get_mut(&dependent.id) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.id);
                    }
                }
            }
        }

        if order.len() != steps.len() {
            return Err(WorkflowError::ConfigurationError(
                "Could not determine execution order for all steps".to_string(),
            ));
        }

        Ok(order)
    }

    fn detect_circular_dependencies(
        steps: &BTreeMap<StepId, StepDefinition>,
    ) -> WorkflowResult<()> {
        let mut visited = HashSet::new();
        for id in steps.keys() {
            let mut rec_stack = HashSet::new();
            Self::dfs_detect_cycle(steps, *id, &mut visited, &mut rec_stack)?;
        }
        Ok(())
    }

    fn dfs_detect_cycle(
        steps: &BTreeMap<StepId, StepDefinition>,
        id: StepId,
        visited: &mut HashSet<StepId>,
        rec_stack: &mut HashSet<StepId>,
    ) -> WorkflowResult<()> {
        if visited.contains(&id) {
            return Ok(());
        }
        rec_stack.insert(id);

        if let Some(step) = steps.get(&id) {
            for dep in &step.depends_on {
                if rec_stack.contains(dep) {
                    return Err(WorkflowError::ConfigurationError(format!(
                        "Circular dependency detected: {} -> {}",
                        id, dep
                    )));
                }
                Self::dfs_detect_cycle(steps, *dep, visited, rec_stack)?;
            }
        }

        rec_stack.remove(&id);
        visited.insert(id);
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::documentation_default()
    }
}
