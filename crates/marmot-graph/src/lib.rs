//! Graph-IR model representation and container I/O for Marmot
//!
//! This crate provides the in-memory representation of a computational-graph
//! model: nodes with string-tagged operator types, nested subgraph-valued
//! attributes, per-scope constant tensors ("initializers"), and the
//! opset-domain import list. Models are stored as a JSON container with an
//! optional external little-endian tensor-data sidecar.

pub mod error;
pub mod graph;
pub mod io;
pub mod model;
pub mod tensor;

pub use error::{Error, Result};
pub use graph::{Attribute, Graph, Node};
pub use io::{load_model, save_model};
pub use model::{Model, OpsetImport};
pub use tensor::{DataType, ExternalData, TensorData, TensorValues, ValueInfo};
