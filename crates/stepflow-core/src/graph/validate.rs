//! Structural validation of graph definitions.
//!
//! `validate` turns a loose [`GraphDefinition`] into a [`ValidatedGraph`]:
//! typed edges with pre-parsed conditions, per-node routing tables, and
//! non-fatal diagnostics. Validation is pure; a validated graph is never
//! mutated afterwards and is shared between runs behind an `Arc`.

use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;
use serde::Serialize;
use stepflow_types::graph::{ConditionSpec, EdgeType, GraphDefinition, LoopConfig, NodeDefinition};
use thiserror::Error;

use crate::callable::CallableRegistry;
use crate::expression::{CompiledExpr, EvalError};

// ---------------------------------------------------------------------------
// Errors and diagnostics
// ---------------------------------------------------------------------------

/// A hard structural error. Graphs with any of these are rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyIdentifier(String),

    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("start node '{0}' is not declared")]
    UnknownStartNode(String),

    #[error("edge #{edge_index} references undeclared node '{node}'")]
    UnknownEdgeNode { edge_index: usize, node: String },

    #[error("node '{from}' has more than one sequential edge")]
    ConflictingSequential { from: String },

    #[error("loop edge #{edge_index} has max_iterations {max_iterations}, must be at least 1")]
    InvalidLoopLimit { edge_index: usize, max_iterations: u32 },

    #[error("branch edge #{edge_index} has no condition")]
    MissingCondition { edge_index: usize },

    #[error("edge #{edge_index} has an invalid expression: {error}")]
    InvalidExpression { edge_index: usize, error: EvalError },

    #[error("unknown callable '{name}'")]
    UnknownCallable { name: String },
}

/// A non-fatal finding surfaced alongside a valid graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphDiagnostic {
    /// The node can never be entered from `start_node`.
    UnreachableNode { node: String },
    /// A loop edge whose node has neither a branch nor a sequential edge to
    /// fall through to; the run completes at that node once the loop exits.
    LoopWithoutFallback { edge_index: usize, from: String },
}

impl std::fmt::Display for GraphDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphDiagnostic::UnreachableNode { node } => {
                write!(f, "node '{node}' is unreachable from the start node")
            }
            GraphDiagnostic::LoopWithoutFallback { edge_index, from } => write!(
                f,
                "loop edge #{edge_index} from '{from}' has no branch or sequential fallback"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Validated graph
// ---------------------------------------------------------------------------

/// How a branch edge decides whether it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Expression(CompiledExpr),
    /// Name of a registered predicate callable.
    Predicate(String),
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Expression(expr) => write!(f, "{}", expr.source()),
            Condition::Predicate(name) => write!(f, "predicate '{name}'"),
        }
    }
}

/// Typed edge payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeKind {
    Sequential,
    Branch {
        condition: Condition,
    },
    Loop {
        max_iterations: u32,
        until: Option<CompiledExpr>,
    },
}

/// An edge of a validated graph. `index` is its declaration position and
/// serves as its identity (loop counters, error attribution).
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub index: usize,
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn edge_type(&self) -> EdgeType {
        match self.kind {
            EdgeKind::Sequential => EdgeType::Sequential,
            EdgeKind::Branch { .. } => EdgeType::Branch,
            EdgeKind::Loop { .. } => EdgeType::Loop,
        }
    }
}

/// Outgoing edge indices of one node, grouped by kind, each in declaration
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routes {
    pub branches: Vec<usize>,
    pub loops: Vec<usize>,
    pub sequential: Option<usize>,
}

impl Routes {
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.loops.is_empty() && self.sequential.is_none()
    }
}

/// A graph that passed validation. Immutable.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    definition: GraphDefinition,
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    routes: HashMap<String, Routes>,
    diagnostics: Vec<GraphDiagnostic>,
}

impl ValidatedGraph {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn start_node(&self) -> &str {
        &self.definition.start_node
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.node_index.get(id).map(|&i| &self.definition.nodes[i])
    }

    pub fn nodes(&self) -> &[NodeDefinition] {
        &self.definition.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    /// Outgoing routes of `node`; empty for terminal nodes.
    pub fn routes(&self, node: &str) -> &Routes {
        static EMPTY: Routes = Routes {
            branches: Vec::new(),
            loops: Vec::new(),
            sequential: None,
        };
        self.routes.get(node).unwrap_or(&EMPTY)
    }

    pub fn diagnostics(&self) -> &[GraphDiagnostic] {
        &self.diagnostics
    }

    /// The definition this graph was validated from.
    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    /// Every callable name the graph needs: node callables first (in node
    /// order), then predicate names, without duplicates.
    pub fn required_callables(&self) -> (Vec<&str>, Vec<&str>) {
        let mut seen = HashSet::new();
        let steps = self
            .definition
            .nodes
            .iter()
            .map(|n| n.callable.as_str())
            .filter(|name| seen.insert(*name))
            .collect();

        let mut seen = HashSet::new();
        let predicates = self
            .edges
            .iter()
            .filter_map(|e| match &e.kind {
                EdgeKind::Branch {
                    condition: Condition::Predicate(name),
                } => Some(name.as_str()),
                _ => None,
            })
            .filter(|name| seen.insert(*name))
            .collect();

        (steps, predicates)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a graph definition.
///
/// Checks, in order:
/// - graph id, node ids and callable names are non-blank
/// - at least one node exists and node ids are unique
/// - `start_node` is declared
/// - every edge endpoint is declared
/// - at most one sequential edge per source node
/// - branch edges carry a condition; every expression parses
/// - loop edges have `max_iterations >= 1`
pub fn validate(definition: &GraphDefinition) -> Result<ValidatedGraph, ValidationError> {
    if definition.id.trim().is_empty() {
        return Err(ValidationError::EmptyIdentifier("graph id".to_string()));
    }
    if definition.nodes.is_empty() {
        return Err(ValidationError::EmptyGraph);
    }

    let mut node_index = HashMap::with_capacity(definition.nodes.len());
    for (i, node) in definition.nodes.iter().enumerate() {
        if node.id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier(format!("id of node #{i}")));
        }
        if node.callable.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier(format!(
                "callable of node '{}'",
                node.id
            )));
        }
        if node_index.insert(node.id.clone(), i).is_some() {
            return Err(ValidationError::DuplicateNode(node.id.clone()));
        }
    }

    if !node_index.contains_key(&definition.start_node) {
        return Err(ValidationError::UnknownStartNode(
            definition.start_node.clone(),
        ));
    }

    let mut edges = Vec::with_capacity(definition.edges.len());
    let mut routes: HashMap<String, Routes> = HashMap::new();

    for (edge_index, def) in definition.edges.iter().enumerate() {
        for endpoint in [&def.from, &def.to] {
            if !node_index.contains_key(endpoint) {
                return Err(ValidationError::UnknownEdgeNode {
                    edge_index,
                    node: endpoint.clone(),
                });
            }
        }

        let compile = |source: &str| {
            CompiledExpr::compile(source)
                .map_err(|error| ValidationError::InvalidExpression { edge_index, error })
        };

        let kind = match def.edge_type {
            EdgeType::Sequential => EdgeKind::Sequential,
            EdgeType::Branch => {
                let condition = match &def.condition {
                    Some(ConditionSpec::Expression { expression }) if !expression.trim().is_empty() => {
                        Condition::Expression(compile(expression)?)
                    }
                    Some(ConditionSpec::Callable { callable }) if !callable.trim().is_empty() => {
                        Condition::Predicate(callable.clone())
                    }
                    _ => return Err(ValidationError::MissingCondition { edge_index }),
                };
                EdgeKind::Branch { condition }
            }
            EdgeType::Loop => {
                let config = def.loop_config.clone().unwrap_or_else(LoopConfig::default);
                if config.max_iterations < 1 {
                    return Err(ValidationError::InvalidLoopLimit {
                        edge_index,
                        max_iterations: config.max_iterations,
                    });
                }
                let until = match config.until_expression.as_deref() {
                    Some(source) if !source.trim().is_empty() => Some(compile(source)?),
                    _ => None,
                };
                EdgeKind::Loop {
                    max_iterations: config.max_iterations,
                    until,
                }
            }
        };

        let node_routes = routes.entry(def.from.clone()).or_default();
        match kind {
            EdgeKind::Sequential => {
                if node_routes.sequential.is_some() {
                    return Err(ValidationError::ConflictingSequential {
                        from: def.from.clone(),
                    });
                }
                node_routes.sequential = Some(edge_index);
            }
            EdgeKind::Branch { .. } => node_routes.branches.push(edge_index),
            EdgeKind::Loop { .. } => node_routes.loops.push(edge_index),
        }

        edges.push(Edge {
            index: edge_index,
            from: def.from.clone(),
            to: def.to.clone(),
            kind,
        });
    }

    let diagnostics = diagnose(definition, &node_index, &edges, &routes);
    for diagnostic in &diagnostics {
        tracing::warn!(graph_id = definition.id.as_str(), "{diagnostic}");
    }

    Ok(ValidatedGraph {
        definition: definition.clone(),
        node_index,
        edges,
        routes,
        diagnostics,
    })
}

/// Validate, then check that every node callable and predicate name is
/// registered.
pub fn validate_with_callables(
    definition: &GraphDefinition,
    registry: &CallableRegistry,
) -> Result<ValidatedGraph, ValidationError> {
    let graph = validate(definition)?;
    check_callables(&graph, registry)?;
    Ok(graph)
}

/// Check that every callable a validated graph needs is registered.
pub fn check_callables(
    graph: &ValidatedGraph,
    registry: &CallableRegistry,
) -> Result<(), ValidationError> {
    let (steps, predicates) = graph.required_callables();
    if let Some(name) = steps.into_iter().find(|name| !registry.has_step(name)) {
        return Err(ValidationError::UnknownCallable {
            name: name.to_string(),
        });
    }
    if let Some(name) = predicates
        .into_iter()
        .find(|name| !registry.has_predicate(name))
    {
        return Err(ValidationError::UnknownCallable {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn diagnose(
    definition: &GraphDefinition,
    node_index: &HashMap<String, usize>,
    edges: &[Edge],
    routes: &HashMap<String, Routes>,
) -> Vec<GraphDiagnostic> {
    let mut graph = DiGraph::<&str, usize>::new();
    let indices: Vec<_> = definition
        .nodes
        .iter()
        .map(|n| graph.add_node(n.id.as_str()))
        .collect();
    for edge in edges {
        graph.add_edge(
            indices[node_index[&edge.from]],
            indices[node_index[&edge.to]],
            edge.index,
        );
    }

    let mut reachable = HashSet::new();
    let mut dfs = Dfs::new(&graph, indices[node_index[&definition.start_node]]);
    while let Some(nx) = dfs.next(&graph) {
        reachable.insert(nx);
    }

    let mut diagnostics: Vec<GraphDiagnostic> = indices
        .iter()
        .filter(|nx| !reachable.contains(*nx))
        .map(|&nx| GraphDiagnostic::UnreachableNode {
            node: graph[nx].to_string(),
        })
        .collect();

    for edge in edges {
        if matches!(edge.kind, EdgeKind::Loop { .. })
            && routes
                .get(&edge.from)
                .is_some_and(|r| r.sequential.is_none() && r.branches.is_empty())
        {
            diagnostics.push(GraphDiagnostic::LoopWithoutFallback {
                edge_index: edge.index,
                from: edge.from.clone(),
            });
        }
    }

    diagnostics
}
