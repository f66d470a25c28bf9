//! Scope-aware graph rewrite pass
//!
//! Walks a model's root graph and every subgraph reachable through
//! graph-valued node attributes, depth first. For each `MatMul` whose second
//! operand resolves (innermost scope first) to a constant 2-D fp32 tensor,
//! the constant is replaced by its packed 4-bit form and the node by the
//! fused `MatMulQ4` operator.
//!
//! Scope frames are the graphs themselves, pushed onto an explicit stack
//! that mirrors the recursion: a constant is always removed from the scope
//! that defines it, never from an ancestor, and each scope's node list is
//! swapped in whole once the scope has been fully processed.

use std::mem;

use marmot_graph::{Attribute, Graph, Model, Node, TensorData};
use tracing::{debug, info, trace};

use crate::error::{QuantError, Result};
use crate::quantizer::{self, BlkQuantType, BLOCK_SIZE};

/// Operator domain of the fused quantized matrix-multiply
pub const FUSED_DOMAIN: &str = "ai.marmot";

/// Opset version registered for [`FUSED_DOMAIN`]
pub const FUSED_DOMAIN_VERSION: i64 = 1;

/// Operator type of the fused node
pub const FUSED_OP: &str = "MatMulQ4";

/// Operator type eligible for rewriting
const MATMUL_OP: &str = "MatMul";

/// Suffix appended to rewritten node names and packed-weight tensors
const PACKED_SUFFIX: &str = "_Q4";

/// Rewrites eligible `MatMul` nodes in a model to the fused 4-bit form
pub struct GraphRewriter {
    qtype: BlkQuantType,
    rewritten: usize,
}

impl GraphRewriter {
    /// Creates a rewriter for the given quantization variant
    pub fn new(qtype: BlkQuantType) -> Self {
        Self {
            qtype,
            rewritten: 0,
        }
    }

    /// Rewrites the model in place, returning the number of fused nodes
    ///
    /// The fused-operator domain is added to the model's opset imports at
    /// most once, regardless of how many nodes are rewritten or how many
    /// times this is invoked.
    pub fn rewrite(&mut self, model: &mut Model) -> Result<usize> {
        if !model.has_opset(FUSED_DOMAIN) {
            model.add_opset(FUSED_DOMAIN, FUSED_DOMAIN_VERSION);
        }

        self.rewritten = 0;
        let root = mem::take(&mut model.graph);
        let mut stack: Vec<Graph> = Vec::new();
        model.graph = self.rewrite_scope(root, &mut stack)?;

        info!(nodes = self.rewritten, "graph rewrite complete");
        Ok(self.rewritten)
    }

    /// Rewrites one scope; `stack` holds the enclosing scopes, outermost first
    fn rewrite_scope(&mut self, mut graph: Graph, stack: &mut Vec<Graph>) -> Result<Graph> {
        trace!(scope = %graph.name, depth = stack.len(), "entering scope");
        let nodes = mem::take(&mut graph.nodes);
        stack.push(graph);
        let outcome = self.rewrite_nodes(nodes, stack);
        let mut graph = stack.pop().expect("scope stack out of sync with recursion");
        // Swap the rewritten node list in whole so no caller ever observes
        // a partially rewritten scope.
        graph.nodes = outcome?;
        Ok(graph)
    }

    fn rewrite_nodes(&mut self, nodes: Vec<Node>, stack: &mut Vec<Graph>) -> Result<Vec<Node>> {
        let mut new_nodes = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            // Recurse into subgraph-valued attributes first so nested
            // scopes are rewritten before the node itself is examined.
            for attr in node.attributes.values_mut() {
                match attr {
                    Attribute::Graph(sub) => {
                        let rewritten = self.rewrite_scope(mem::take(sub), stack)?;
                        *sub = rewritten;
                    }
                    Attribute::Graphs(subs) => {
                        for sub in subs.iter_mut() {
                            let rewritten = self.rewrite_scope(mem::take(sub), stack)?;
                            *sub = rewritten;
                        }
                    }
                    _ => {}
                }
            }
            new_nodes.push(self.rewrite_matmul(node, stack)?);
        }
        Ok(new_nodes)
    }

    /// Rewrites a single node if it is an eligible constant-weight `MatMul`;
    /// otherwise returns it unchanged
    fn rewrite_matmul(&mut self, node: Node, stack: &mut Vec<Graph>) -> Result<Node> {
        if node.op_type != MATMUL_OP {
            return Ok(node);
        }
        let weight_name = match node.inputs.get(1) {
            Some(name) => name.clone(),
            None => return Err(QuantError::MalformedNode(node.name.clone())),
        };

        let Some(scope_idx) = find_defining_scope(stack, &weight_name) else {
            trace!(node = %node.name, input = %weight_name, "weight is not a constant, skipping");
            return Ok(node);
        };

        // Eligibility gate on the resolved constant: only 2-D fp32 weights
        // are rewritten; anything else passes through untouched.
        let (rows, cols, quantized) = {
            let tensor = match stack[scope_idx].initializer(&weight_name) {
                Some(t) => t,
                None => return Ok(node),
            };
            if !tensor.is_matrix() {
                trace!(node = %node.name, input = %weight_name, "weight is not 2-D, skipping");
                return Ok(node);
            }
            let Some(values) = tensor.values.as_f32() else {
                trace!(node = %node.name, input = %weight_name, "weight is not fp32, skipping");
                return Ok(node);
            };
            let qw = quantizer::quantize_matrix(values, &tensor.dims, self.qtype)?;
            (tensor.dims[0], tensor.dims[1], qw)
        };

        let output = match node.outputs.first() {
            Some(out) => out.clone(),
            None => return Err(QuantError::MalformedNode(node.name.clone())),
        };

        debug!(
            node = %node.name,
            weight = %weight_name,
            rows,
            cols,
            "replacing MatMul with fused 4-bit node"
        );

        // All registration changes land in the scope that defines the
        // constant, which is not necessarily the innermost one.
        let packed_dims = quantized.packed_dims().to_vec();
        let param_dims = quantized.param_dims().to_vec();
        let scope = &mut stack[scope_idx];
        scope.take_initializer(&weight_name);
        scope.remove_input(&weight_name);

        let packed_name = format!("{weight_name}{PACKED_SUFFIX}");
        let scales_name = format!("{weight_name}_scales");
        scope.add_initializer(TensorData::new_u8(
            packed_name.clone(),
            packed_dims,
            quantized.packed,
        )?);
        scope.add_initializer(TensorData::new_f32(
            scales_name.clone(),
            param_dims.clone(),
            quantized.scales,
        )?);

        let mut inputs = vec![node.inputs[0].clone(), packed_name, scales_name];
        if !self.qtype.is_symmetric() {
            let zp_name = format!("{weight_name}_zero_points");
            scope.add_initializer(TensorData::new_u8(
                zp_name.clone(),
                param_dims,
                quantized.zero_points,
            )?);
            inputs.push(zp_name);
        }

        let fused_name = if node.name.is_empty() {
            String::new()
        } else {
            format!("{}{PACKED_SUFFIX}", node.name)
        };

        self.rewritten += 1;
        Ok(Node::new(fused_name, FUSED_OP, inputs, vec![output])
            .with_domain(FUSED_DOMAIN)
            .with_attr("K", Attribute::Int(rows as i64))
            .with_attr("N", Attribute::Int(cols as i64))
            .with_attr("bits", Attribute::Int(4))
            .with_attr("block_size", Attribute::Int(BLOCK_SIZE as i64)))
    }
}

/// Finds the index of the innermost scope defining `name`, if any
fn find_defining_scope(stack: &[Graph], name: &str) -> Option<usize> {
    (0..stack.len())
        .rev()
        .find(|&i| stack[i].initializer(name).is_some())
}

/// Quantizes every eligible `MatMul` weight in the model
///
/// Convenience wrapper over [`GraphRewriter`].
pub fn quantize_model(model: &mut Model, qtype: BlkQuantType) -> Result<usize> {
    GraphRewriter::new(qtype).rewrite(model)
}
