//! Read-only views over a subset of a [`Graph`].
//!
//! Partitioning selects nodes of a host graph and describes the selection as
//! an [`IndexedSubGraph`]. A [`GraphView`] is the filtered graph a backend
//! sees for one fused node: the selected nodes in order plus the boundary
//! inputs and outputs declared by the subgraph's [`MetaDef`].

use crate::graph::{Graph, Node, NodeId, TensorInfo};
use crate::{OnnxError, Result};
use std::collections::{BTreeMap, HashSet};

/// Description of a fused node produced by partitioning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaDef {
    pub name: String,
    pub domain: String,
    pub since_version: i64,
    /// Boundary inputs, in call order.
    pub inputs: Vec<String>,
    /// Boundary outputs, in result order.
    pub outputs: Vec<String>,
}

/// A set of host graph nodes claimed by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedSubGraph {
    /// Node IDs; views sort them topologically.
    pub nodes: Vec<NodeId>,
    pub meta_def: Option<MetaDef>,
}

/// A filtered view of a graph.
#[derive(Debug, Clone)]
pub struct GraphView<'g> {
    graph: &'g Graph,
    nodes: Vec<NodeId>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    name: String,
}

impl<'g> GraphView<'g> {
    /// View covering the whole graph with its declared boundary.
    pub fn full(graph: &'g Graph) -> Result<Self> {
        Ok(Self {
            graph,
            nodes: graph.topological_order()?,
            inputs: graph.inputs.clone(),
            outputs: graph.outputs.clone(),
            name: graph.metadata.name.clone(),
        })
    }

    /// View over the nodes of an indexed subgraph.
    ///
    /// The subgraph must carry a meta definition; its inputs and outputs
    /// become the view's boundary. Nodes are re-sorted topologically.
    pub fn from_indexed(graph: &'g Graph, sub_graph: &IndexedSubGraph) -> Result<Self> {
        let meta_def = sub_graph.meta_def.as_ref().ok_or_else(|| {
            OnnxError::InvalidGraph("Indexed subgraph has no meta definition".to_string())
        })?;

        let mut seen = HashSet::new();
        for &id in &sub_graph.nodes {
            graph.node(id)?;
            if !seen.insert(id) {
                return Err(OnnxError::InvalidGraph(format!(
                    "Node {} appears twice in subgraph '{}'",
                    id, meta_def.name
                )));
            }
        }

        for name in meta_def.inputs.iter().chain(&meta_def.outputs) {
            graph.tensor_id(name)?;
        }

        Ok(Self {
            graph,
            nodes: graph.topological_order_of(&sub_graph.nodes)?,
            inputs: meta_def.inputs.clone(),
            outputs: meta_def.outputs.clone(),
            name: meta_def.name.clone(),
        })
    }

    /// Name of the view (graph name or meta definition name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying graph.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Node IDs covered by the view, in view order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Nodes covered by the view, in view order.
    pub fn nodes(&self) -> impl Iterator<Item = &'g Node> + '_ {
        let graph = self.graph;
        self.nodes.iter().map(move |&id| &graph.nodes[id])
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Tensor info for a value visible in the view.
    pub fn tensor(&self, name: &str) -> Result<&'g TensorInfo> {
        self.graph.tensor_by_name(name)
    }

    /// Operator set versions keyed by domain.
    pub fn domain_to_version(&self) -> &'g BTreeMap<String, i64> {
        &self.graph.metadata.opset_imports
    }

    /// True when the underlying graph is nested inside a node attribute.
    pub fn is_subgraph(&self) -> bool {
        self.graph.metadata.is_subgraph
    }

    /// Initializers consumed by the view's nodes, in first-use order.
    pub fn initializers(&self) -> Vec<&'g TensorInfo> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for node in self.nodes() {
            for input in node.inputs.iter().filter(|i| !i.is_empty()) {
                if self.graph.is_initializer(input)
                    && seen.insert(input.as_str())
                    && let Ok(info) = self.graph.tensor_by_name(input)
                {
                    result.push(info);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DataType, TensorKind, TensorShape};

    fn graph() -> Graph {
        let mut graph = Graph::new();
        for (name, kind) in [
            ("x", TensorKind::Input),
            ("w", TensorKind::Weight),
            ("a", TensorKind::Intermediate),
            ("y", TensorKind::Output),
        ] {
            graph.add_tensor(TensorInfo {
                name: name.to_string(),
                dtype: DataType::F32,
                shape: TensorShape::Static(vec![2]),
                kind,
                initializer: (kind == TensorKind::Weight).then(|| vec![0; 8]),
            });
        }
        graph.inputs.push("x".to_string());
        graph.outputs.push("y".to_string());
        graph.add_node(Node::new("Add").with_io("add", &["x", "w"], &["a"]));
        graph.add_node(Node::new("Relu").with_io("relu", &["a"], &["y"]));
        graph
    }

    #[test]
    fn test_full_view() {
        let graph = graph();
        let view = GraphView::full(&graph).unwrap();
        assert_eq!(view.node_ids(), &[0, 1]);
        assert_eq!(view.inputs(), &["x".to_string()]);
        assert_eq!(view.initializers().len(), 1);
        assert!(!view.is_subgraph());
    }

    #[test]
    fn test_indexed_view_uses_meta_def_boundary() {
        let graph = graph();
        let sub_graph = IndexedSubGraph {
            nodes: vec![1],
            meta_def: Some(MetaDef {
                name: "tail".to_string(),
                inputs: vec!["a".to_string()],
                outputs: vec!["y".to_string()],
                ..Default::default()
            }),
        };
        let view = GraphView::from_indexed(&graph, &sub_graph).unwrap();
        assert_eq!(view.name(), "tail");
        assert_eq!(view.inputs(), &["a".to_string()]);
        assert_eq!(view.nodes().count(), 1);
        assert!(view.initializers().is_empty());
    }

    #[test]
    fn test_indexed_view_requires_meta_def() {
        let graph = graph();
        let sub_graph = IndexedSubGraph {
            nodes: vec![0],
            meta_def: None,
        };
        assert!(GraphView::from_indexed(&graph, &sub_graph).is_err());
    }

    #[test]
    fn test_indexed_view_rejects_unknown_node() {
        let graph = graph();
        let sub_graph = IndexedSubGraph {
            nodes: vec![7],
            meta_def: Some(MetaDef::default()),
        };
        assert!(GraphView::from_indexed(&graph, &sub_graph).is_err());
    }

    #[test]
    fn test_indexed_view_sorts_nodes() {
        let graph = graph();
        let sub_graph = IndexedSubGraph {
            nodes: vec![1, 0],
            meta_def: Some(MetaDef {
                name: "fused".to_string(),
                inputs: vec!["x".to_string(), "w".to_string()],
                outputs: vec!["y".to_string()],
                ..Default::default()
            }),
        };
        let view = GraphView::from_indexed(&graph, &sub_graph).unwrap();
        assert_eq!(view.node_ids(), &[0, 1]);
        let ops: Vec<&str> = view.nodes().map(|n| n.op_type.as_str()).collect();
        assert_eq!(ops, vec!["Add", "Relu"]);
    }
}
