//! Graph definition types for stepflow.
//!
//! `GraphDefinition` is the exchange format accepted from clients (JSON or
//! YAML). It is deliberately loose: edges are flat records carrying a `type`
//! tag plus optional `condition`/`loop` payloads. The validator in
//! `stepflow-core` turns a definition into a typed, immutable graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The shared state threaded through every node invocation of a run.
///
/// Insertion order is preserved (serde_json `preserve_order`).
pub type Context = serde_json::Map<String, Value>;

/// Default loop cap when a loop edge omits its `loop` block.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

// ---------------------------------------------------------------------------
// Graph Definition
// ---------------------------------------------------------------------------

/// A graph as submitted for registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Client-chosen identifier, unique within the graph registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The node every run enters first.
    pub start_node: String,
    /// Nodes; ids must be unique.
    pub nodes: Vec<NodeDefinition>,
    /// Edges in declaration order. Order matters for branch selection.
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

/// A single step in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node identifier, unique within the graph.
    pub id: String,
    /// Name of the registered step callable this node invokes.
    pub callable: String,
    /// Optional display name (defaults to `id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque metadata carried for clients; never read by the engine.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl NodeDefinition {
    /// Display name, falling back to the node id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default)]
    pub edge_type: EdgeType,
    /// Required for branch edges, ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,
    /// Loop settings; a loop edge without this block uses the defaults.
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopConfig>,
}

/// The kind of an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    #[default]
    Sequential,
    Branch,
    Loop,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeType::Sequential => write!(f, "sequential"),
            EdgeType::Branch => write!(f, "branch"),
            EdgeType::Loop => write!(f, "loop"),
        }
    }
}

/// How a branch decides whether it fires.
///
/// ```json
/// { "expression": "context.get('issues', 0) == 0" }
/// { "callable": "review.is_clean" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    /// A sandboxed expression evaluated against the context.
    Expression { expression: String },
    /// A registered predicate callable.
    Callable { callable: String },
}

/// Bounds for a loop edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum number of times the loop edge may be traversed per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Exit test; when it evaluates true the loop edge is not taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_expression: Option<String>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            until_expression: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_definition_parses_exchange_format() {
        let payload = json!({
            "id": "review",
            "name": "Review",
            "start_node": "submit",
            "nodes": [
                {"id": "submit", "callable": "review.submit"},
                {"id": "review", "callable": "review.review", "name": "Review step"}
            ],
            "edges": [
                {"from": "submit", "to": "review"},
                {
                    "from": "review", "to": "submit", "type": "loop",
                    "loop": {"max_iterations": 3, "until_expression": "issues_open == 0"}
                },
                {
                    "from": "review", "to": "submit", "type": "branch",
                    "condition": {"callable": "review.has_issues"}
                }
            ]
        });

        let def: GraphDefinition = serde_json::from_value(payload).unwrap();
        assert_eq!(def.nodes[1].display_name(), "Review step");
        assert_eq!(def.nodes[0].display_name(), "submit");
        assert_eq!(def.edges[0].edge_type, EdgeType::Sequential);
        assert_eq!(def.edges[1].edge_type, EdgeType::Loop);
        assert_eq!(
            def.edges[1].loop_config.as_ref().unwrap().until_expression.as_deref(),
            Some("issues_open == 0")
        );
        assert_eq!(
            def.edges[2].condition,
            Some(ConditionSpec::Callable {
                callable: "review.has_issues".to_string()
            })
        );
    }

    #[test]
    fn test_expression_condition_serializes_flat() {
        let cond = ConditionSpec::Expression {
            expression: "a == 1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&cond).unwrap(),
            json!({"expression": "a == 1"})
        );
    }

    #[test]
    fn test_loop_config_defaults() {
        let cfg: LoopConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(cfg.until_expression.is_none());
    }

    #[test]
    fn test_edge_serializes_loop_key() {
        let edge = EdgeDefinition {
            from: "a".to_string(),
            to: "b".to_string(),
            edge_type: EdgeType::Loop,
            condition: None,
            loop_config: Some(LoopConfig::default()),
        };
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["type"], "loop");
        assert_eq!(value["loop"]["max_iterations"], 5);
        assert!(value.get("condition").is_none());
    }
}
