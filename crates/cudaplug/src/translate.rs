//! Graph-to-operation translation pass.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::context::CreationContext;
use crate::error::{PluginError, PluginResult};
use crate::ir::{Graph, GraphNode, NodeRef, OutputRef, PARAMETER_OPCODE, RESULT_OPCODE};
use crate::memory::WorkbufferRequest;
use crate::operation::Operation;
use crate::registry::OperationRegistry;
use crate::tensor::{TensorId, TensorSpec};

/// Operations for one network, in execution order, plus the tensor slots they use.
#[derive(Debug)]
pub struct TranslatedGraph {
    pub name: String,
    pub operations: Vec<Box<dyn Operation>>,
    /// Spec of every tensor slot, indexed by [`TensorId::index`].
    pub tensor_specs: Vec<TensorSpec>,
    /// Slots fed by `Parameter` nodes, in graph order.
    pub parameters: Vec<TensorId>,
    /// Slots consumed by `Result` nodes, in graph order.
    pub results: Vec<TensorId>,
}

impl TranslatedGraph {
    pub fn operation(&self, index: usize) -> Option<&dyn Operation> {
        self.operations.get(index).map(|op| op.as_ref())
    }

    pub fn workbuffer_requests(&self) -> Vec<WorkbufferRequest> {
        self.operations
            .iter()
            .map(|op| op.workbuffer_request())
            .collect()
    }

    pub fn tensor_spec(&self, id: TensorId) -> Option<&TensorSpec> {
        self.tensor_specs.get(id.index())
    }
}

/// Builds one operation per node of `graph`, in node order.
///
/// Each output port gets a fresh tensor slot. The first node whose opcode has no factory, or
/// whose factory rejects it, aborts the whole network with [`PluginError::Translation`].
pub fn translate(
    registry: &OperationRegistry,
    context: &CreationContext,
    graph: &Graph,
) -> PluginResult<TranslatedGraph> {
    graph.validate()?;

    let mut slots: HashMap<OutputRef, TensorId> = HashMap::new();
    let mut tensor_specs = Vec::new();
    let mut operations = Vec::with_capacity(graph.nodes().len());
    let mut parameters = Vec::new();
    let mut results = Vec::new();

    for (index, graph_node) in graph.nodes().iter().enumerate() {
        let input_ids = graph_node
            .sources
            .iter()
            .map(|source| {
                slots.get(source).copied().ok_or_else(|| {
                    translation_error(
                        graph,
                        graph_node,
                        PluginError::invalid_node(
                            &graph_node.friendly_name,
                            format!("input {}:{} has no tensor slot", source.node, source.port),
                        ),
                    )
                })
            })
            .collect::<PluginResult<Vec<_>>>()?;

        let mut output_ids = Vec::with_capacity(graph_node.outputs.len());
        for (port, spec) in graph_node.outputs.iter().enumerate() {
            let id = TensorId::try_from(tensor_specs.len()).map_err(|_| {
                translation_error(
                    graph,
                    graph_node,
                    PluginError::invalid_node(
                        &graph_node.friendly_name,
                        format!("output {port} exceeds the u32 tensor id range"),
                    ),
                )
            })?;
            tensor_specs.push(spec.clone());
            slots.insert(OutputRef { node: index, port }, id);
            output_ids.push(id);
        }

        match graph_node.type_info.name() {
            PARAMETER_OPCODE => parameters.extend(output_ids.iter().copied()),
            RESULT_OPCODE => results.extend(input_ids.iter().copied()),
            _ => {}
        }

        let node: NodeRef = Arc::clone(graph_node) as NodeRef;
        let operation = registry
            .create_operation(context, &node, input_ids, output_ids)
            .map_err(|err| {
                if err.is_unknown_operation() {
                    log::debug!(
                        "network `{}`: no operation registered for `{}` (node `{}`)",
                        graph.name,
                        graph_node.type_info,
                        graph_node.friendly_name
                    );
                }
                translation_error(graph, graph_node, err)
            })?;
        operations.push(operation);
    }

    log::debug!(
        "translated network `{}`: {} operations, {} tensor slots",
        graph.name,
        operations.len(),
        tensor_specs.len()
    );

    Ok(TranslatedGraph {
        name: graph.name.clone(),
        operations,
        tensor_specs,
        parameters,
        results,
    })
}

/// Opcodes used by `graph` that `registry` cannot build, sorted and deduplicated.
pub fn unsupported_operations(registry: &OperationRegistry, graph: &Graph) -> Vec<String> {
    graph
        .nodes()
        .iter()
        .filter(|node| !registry.has_node_operation(node.as_ref()))
        .map(|node| node.type_info.name().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn translation_error(graph: &Graph, node: &GraphNode, source: PluginError) -> PluginError {
    PluginError::Translation {
        network: graph.name.clone(),
        node: node.friendly_name.clone(),
        source: Box::new(source),
    }
}
