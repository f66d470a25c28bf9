//! Graph and node structures
//!
//! A node is a single generic record tagged by operator type; control-flow
//! operators carry whole subgraphs (or lists of subgraphs) as attribute
//! values, which is how nested scopes arise. Each graph owns the constants
//! ("initializers") defined in its own scope; inner scopes may reference
//! constants from enclosing scopes, so lookup during rewriting walks the
//! scope chain rather than a single flat map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tensor::{TensorData, ValueInfo};

/// An attribute value attached to a graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    /// A nested subgraph (branch body, loop body, ...)
    Graph(Graph),
    /// A list of nested subgraphs
    Graphs(Vec<Graph>),
}

impl Attribute {
    /// Returns true if this attribute carries one or more subgraphs
    pub fn is_graph(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::Graphs(_))
    }
}

/// A single computation node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node name; may be empty
    pub name: String,
    /// Operator type tag
    pub op_type: String,
    /// Operator domain; empty for the default domain
    pub domain: String,
    /// Ordered input value names
    pub inputs: Vec<String>,
    /// Ordered output value names
    pub outputs: Vec<String>,
    /// Attribute name to value mapping
    pub attributes: BTreeMap<String, Attribute>,
}

impl Node {
    /// Creates a new node in the default operator domain
    pub fn new(
        name: impl Into<String>,
        op_type: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            domain: String::new(),
            inputs,
            outputs,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the operator domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Adds an attribute to the node
    pub fn with_attr(mut self, key: impl Into<String>, val: Attribute) -> Self {
        self.attributes.insert(key.into(), val);
        self
    }

    /// Returns true if any attribute carries a subgraph
    pub fn has_subgraphs(&self) -> bool {
        self.attributes.values().any(Attribute::is_graph)
    }
}

/// One lexical scope of a model: nodes plus the constants and declared
/// inputs registered at this level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Graph name
    pub name: String,
    /// Computation nodes in execution order
    pub nodes: Vec<Node>,
    /// Declared inputs of this scope
    pub inputs: Vec<ValueInfo>,
    /// Declared outputs of this scope
    pub outputs: Vec<ValueInfo>,
    /// Constants defined in this scope, in registration order
    pub initializers: Vec<TensorData>,
}

impl Graph {
    /// Creates an empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends a computation node
    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Declares a graph input
    pub fn add_input(&mut self, value: ValueInfo) {
        self.inputs.push(value);
    }

    /// Declares a graph output
    pub fn add_output(&mut self, value: ValueInfo) {
        self.outputs.push(value);
    }

    /// Registers a constant tensor in this scope
    pub fn add_initializer(&mut self, tensor: TensorData) {
        self.initializers.push(tensor);
    }

    /// Looks up a constant defined in this scope
    pub fn initializer(&self, name: &str) -> Option<&TensorData> {
        self.initializers.iter().find(|t| t.name == name)
    }

    /// Removes and returns a constant defined in this scope
    pub fn take_initializer(&mut self, name: &str) -> Option<TensorData> {
        let idx = self.initializers.iter().position(|t| t.name == name)?;
        Some(self.initializers.remove(idx))
    }

    /// Removes the first declared input with the given name, if any
    pub fn remove_input(&mut self, name: &str) -> bool {
        match self.inputs.iter().position(|v| v.name == name) {
            Some(idx) => {
                self.inputs.remove(idx);
                true
            }
            None => false,
        }
    }
}
