//! Versioned, language-agnostic encoding of a dependency graph.
//!
//! ```json
//! {"version": 1, "nodes": ["gen", "reco"], "edges": [["gen", "reco"]]}
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

/// Current encoding version.
pub const GRAPH_ENCODING_VERSION: u32 = 1;

/// Node list plus `[dependency, dependent]` edge list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedGraph {
    pub version: u32,
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
}

impl EncodedGraph {
    /// Create an encoding at the current version.
    pub fn new(nodes: Vec<String>, edges: Vec<(String, String)>) -> Self {
        Self {
            version: GRAPH_ENCODING_VERSION,
            nodes,
            edges,
        }
    }

    /// Parse and validate from a JSON value.
    pub fn from_value(value: serde_json::Value) -> SchedResult<Self> {
        let graph: EncodedGraph = serde_json::from_value(value)
            .map_err(|e| SchedError::InvalidGraph(e.to_string()))?;
        graph.validate()?;
        Ok(graph)
    }

    /// Parse and validate from JSON text.
    pub fn from_json(text: &str) -> SchedResult<Self> {
        let graph: EncodedGraph =
            serde_json::from_str(text).map_err(|e| SchedError::InvalidGraph(e.to_string()))?;
        graph.validate()?;
        Ok(graph)
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> SchedResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check version, node uniqueness and edge endpoints.
    pub fn validate(&self) -> SchedResult<()> {
        if self.version != GRAPH_ENCODING_VERSION {
            return Err(SchedError::InvalidGraph(format!(
                "unsupported version {}",
                self.version
            )));
        }
        let mut known = BTreeSet::new();
        for node in &self.nodes {
            if !known.insert(node.as_str()) {
                return Err(SchedError::InvalidGraph(format!("duplicate node {node}")));
            }
        }
        for (from, to) in &self.edges {
            for end in [from, to] {
                if !known.contains(end.as_str()) {
                    return Err(SchedError::InvalidGraph(format!(
                        "edge {from} -> {to} references unknown node {end}"
                    )));
                }
            }
            if from == to {
                return Err(SchedError::InvalidGraph(format!("self edge on {from}")));
            }
        }
        Ok(())
    }

    /// Order-independent edge set.
    pub fn edge_set(&self) -> BTreeSet<(&str, &str)> {
        self.edges
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect()
    }

    /// Order-independent node set.
    pub fn node_set(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let graph = EncodedGraph::new(
            vec!["gen".into(), "reco".into()],
            vec![("gen".into(), "reco".into())],
        );
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(
            value,
            json!({"version": 1, "nodes": ["gen", "reco"], "edges": [["gen", "reco"]]})
        );
    }

    #[test]
    fn test_rejects_unknown_endpoint() {
        let err = EncodedGraph::from_value(json!({
            "version": 1, "nodes": ["a"], "edges": [["a", "b"]]
        }))
        .unwrap_err();
        assert!(matches!(err, SchedError::InvalidGraph(_)));
    }

    #[test]
    fn test_rejects_future_version() {
        let err = EncodedGraph::from_json(r#"{"version": 7, "nodes": [], "edges": []}"#).unwrap_err();
        assert!(err.to_string().contains("unsupported version 7"));
    }

    #[test]
    fn test_rejects_duplicate_nodes() {
        let graph = EncodedGraph::new(vec!["a".into(), "a".into()], vec![]);
        assert!(graph.validate().is_err());
    }
}
