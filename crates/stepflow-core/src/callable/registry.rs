//! Name-indexed registry of step callables and predicates.

use std::collections::HashMap;

use super::{BoxPredicate, BoxStep, CallableError, Predicate, StepCallable};
use crate::graph::{Condition, EdgeKind, ValidatedGraph};

/// Registry of available step callables and predicates, indexed by name.
///
/// Populated once at startup and then shared read-only (`Arc`). Registering
/// a name twice is an error rather than a silent replacement.
#[derive(Debug, Default, Clone)]
pub struct CallableRegistry {
    steps: HashMap<String, BoxStep>,
    predicates: HashMap<String, BoxPredicate>,
}

impl CallableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step callable under `name`.
    pub fn register_step<T: StepCallable + 'static>(
        &mut self,
        name: impl Into<String>,
        callable: T,
    ) -> Result<(), CallableError> {
        let name = name.into();
        if self.steps.contains_key(&name) {
            return Err(CallableError::Duplicate(name));
        }
        tracing::debug!(callable = name.as_str(), "registered step callable");
        self.steps.insert(name, BoxStep::new(callable));
        Ok(())
    }

    /// Register a predicate under `name`.
    pub fn register_predicate<T: Predicate + 'static>(
        &mut self,
        name: impl Into<String>,
        predicate: T,
    ) -> Result<(), CallableError> {
        let name = name.into();
        if self.predicates.contains_key(&name) {
            return Err(CallableError::Duplicate(name));
        }
        tracing::debug!(predicate = name.as_str(), "registered predicate");
        self.predicates.insert(name, BoxPredicate::new(predicate));
        Ok(())
    }

    pub fn step(&self, name: &str) -> Option<&BoxStep> {
        self.steps.get(name)
    }

    pub fn predicate(&self, name: &str) -> Option<&BoxPredicate> {
        self.predicates.get(name)
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn has_predicate(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    /// Registered step names, sorted.
    pub fn step_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Registered predicate names, sorted.
    pub fn predicate_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.predicates.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Resolve every callable `graph` needs, keyed by node id and predicate
    /// name. Fails on the first unregistered name.
    pub fn resolve(&self, graph: &ValidatedGraph) -> Result<ResolvedCallables, CallableError> {
        let mut steps = HashMap::with_capacity(graph.nodes().len());
        for node in graph.nodes() {
            let step = self
                .step(&node.callable)
                .ok_or_else(|| CallableError::Unknown(node.callable.clone()))?;
            steps.insert(node.id.clone(), step.clone());
        }

        let mut predicates = HashMap::new();
        for edge in graph.edges() {
            if let EdgeKind::Branch {
                condition: Condition::Predicate(name),
            } = &edge.kind
            {
                let predicate = self
                    .predicate(name)
                    .ok_or_else(|| CallableError::Unknown(name.clone()))?;
                predicates.insert(name.clone(), predicate.clone());
            }
        }

        Ok(ResolvedCallables { steps, predicates })
    }
}

/// Callables resolved for one graph: steps keyed by node id, predicates by
/// name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCallables {
    steps: HashMap<String, BoxStep>,
    predicates: HashMap<String, BoxPredicate>,
}

impl ResolvedCallables {
    pub fn step_for(&self, node_id: &str) -> Option<&BoxStep> {
        self.steps.get(node_id)
    }

    pub fn predicate(&self, name: &str) -> Option<&BoxPredicate> {
        self.predicates.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{FnPredicate, SyncFnStep};
    use crate::graph::validate;
    use serde_json::json;
    use stepflow_types::graph::{Context, GraphDefinition};

    fn registry() -> CallableRegistry {
        let mut registry = CallableRegistry::new();
        registry
            .register_step("tools.noop", SyncFnStep::new(Ok))
            .unwrap();
        registry
            .register_predicate("always", FnPredicate::new(|_: &Context| Ok(true)))
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry
            .register_step("tools.noop", SyncFnStep::new(Ok))
            .unwrap_err();
        assert_eq!(err, CallableError::Duplicate("tools.noop".to_string()));

        let err = registry
            .register_predicate("always", FnPredicate::new(|_: &Context| Ok(false)))
            .unwrap_err();
        assert_eq!(err, CallableError::Duplicate("always".to_string()));
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = registry();
        registry
            .register_step("a.first", SyncFnStep::new(Ok))
            .unwrap();
        assert_eq!(registry.step_names(), vec!["a.first", "tools.noop"]);
        assert_eq!(registry.predicate_names(), vec!["always"]);
        assert!(registry.has_step("tools.noop"));
        assert!(!registry.has_predicate("tools.noop"));
    }

    #[test]
    fn test_resolve_graph() {
        let def: GraphDefinition = serde_json::from_value(json!({
            "id": "g", "name": "g", "start_node": "a",
            "nodes": [
                {"id": "a", "callable": "tools.noop"},
                {"id": "b", "callable": "tools.noop"}
            ],
            "edges": [
                {"from": "a", "to": "b", "type": "branch", "condition": {"callable": "always"}}
            ]
        }))
        .unwrap();
        let graph = validate(&def).unwrap();

        let resolved = registry().resolve(&graph).unwrap();
        assert!(resolved.step_for("a").is_some());
        assert!(resolved.step_for("b").is_some());
        assert!(resolved.predicate("always").is_some());

        let empty = CallableRegistry::new();
        assert_eq!(
            empty.resolve(&graph).unwrap_err(),
            CallableError::Unknown("tools.noop".to_string())
        );
    }
}
