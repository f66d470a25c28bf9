//! Top-level model container

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::Graph;

/// An operator-set import declared by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsetImport {
    /// Operator domain; empty for the default domain
    pub domain: String,
    /// Opset version within the domain
    pub version: i64,
}

impl OpsetImport {
    /// Creates a new opset import entry
    pub fn new(domain: impl Into<String>, version: i64) -> Self {
        Self {
            domain: domain.into(),
            version,
        }
    }
}

/// A complete graph model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// IR format version
    pub ir_version: i64,
    /// Tool that produced the model
    pub producer_name: String,
    /// Declared operator-set imports
    pub opset_imports: Vec<OpsetImport>,
    /// Root graph
    pub graph: Graph,
    /// Free-form model metadata
    pub metadata: BTreeMap<String, String>,
}

impl Model {
    /// Creates a model around a root graph with default-domain opset 17
    pub fn new(graph: Graph) -> Self {
        Self {
            ir_version: 9,
            producer_name: String::from("marmot"),
            opset_imports: vec![OpsetImport::new("", 17)],
            graph,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), val.into());
        self
    }

    /// Returns true if the given operator domain is already imported
    pub fn has_opset(&self, domain: &str) -> bool {
        self.opset_imports.iter().any(|o| o.domain == domain)
    }

    /// Appends an opset import entry
    pub fn add_opset(&mut self, domain: impl Into<String>, version: i64) {
        self.opset_imports.push(OpsetImport::new(domain, version));
    }
}
