use cudaplug::{
    DeviceBuffer, PluginError, PluginResult, TensorId, ThreadContext, TranslatedGraph,
    Workbuffers,
};

/// Sequential executor for a [`TranslatedGraph`].
///
/// Every operation gets its immutable workbuffers initialized once at construction. Tensor
/// slots are plain buffers indexed by [`TensorId`].
pub struct NetworkRunner<'g> {
    graph: &'g TranslatedGraph,
    context: ThreadContext,
    immutable: Vec<Vec<DeviceBuffer>>,
}

impl<'g> NetworkRunner<'g> {
    pub fn new(graph: &'g TranslatedGraph, context: ThreadContext) -> PluginResult<Self> {
        let stream = context.stream();
        let mut immutable = Vec::with_capacity(graph.operations.len());
        for operation in &graph.operations {
            let mut buffers: Vec<DeviceBuffer> = operation
                .workbuffer_request()
                .immutable_sizes
                .iter()
                .map(|&size| stream.alloc_zeroed(size))
                .collect();
            operation.init_shared_immutable_workbuffers(stream, &mut buffers)?;
            immutable.push(buffers);
        }
        Ok(Self {
            graph,
            context,
            immutable,
        })
    }

    pub fn context(&self) -> &ThreadContext {
        &self.context
    }

    /// Feeds `inputs` to the parameters in order and returns the result tensors in order.
    ///
    /// Values are stored with each slot's element type and widened back to f32.
    pub fn run(&self, inputs: &[Vec<f32>]) -> PluginResult<Vec<Vec<f32>>> {
        let graph = self.graph;
        if inputs.len() != graph.parameters.len() {
            return Err(PluginError::execution(format!(
                "network `{}` takes {} inputs, got {}",
                graph.name,
                graph.parameters.len(),
                inputs.len()
            )));
        }

        let stream = self.context.stream();
        let mut slots: Vec<Option<DeviceBuffer>> = vec![None; graph.tensor_specs.len()];
        for (&id, values) in graph.parameters.iter().zip(inputs) {
            let spec = &graph.tensor_specs[id.index()];
            let expected = spec.element_count();
            if values.len() != expected {
                return Err(PluginError::execution(format!(
                    "parameter {id} takes {expected} values, got {}",
                    values.len()
                )));
            }
            slots[id.index()] = Some(DeviceBuffer::from_values(spec.dtype, values)?);
        }

        for (operation, immutable) in graph.operations.iter().zip(&self.immutable) {
            let mut outputs: Vec<DeviceBuffer> = operation
                .output_ids()
                .iter()
                .map(|id| {
                    slots[id.index()].take().unwrap_or_else(|| {
                        stream.alloc_zeroed(graph.tensor_specs[id.index()].byte_len())
                    })
                })
                .collect();
            let mut mutable: Vec<DeviceBuffer> = operation
                .workbuffer_request()
                .mutable_sizes
                .iter()
                .map(|&size| stream.alloc_zeroed(size))
                .collect();
            {
                let inputs = operation
                    .input_ids()
                    .iter()
                    .map(|&id| slot(&slots, id))
                    .collect::<PluginResult<Vec<_>>>()?;
                operation.execute(
                    &self.context,
                    &inputs,
                    &mut outputs,
                    Workbuffers::new(immutable, &mut mutable),
                )?;
            }
            for (&id, buffer) in operation.output_ids().iter().zip(outputs) {
                slots[id.index()] = Some(buffer);
            }
        }

        graph
            .results
            .iter()
            .map(|&id| slot(&slots, id)?.read_values(graph.tensor_specs[id.index()].dtype))
            .collect()
    }
}

fn slot(slots: &[Option<DeviceBuffer>], id: TensorId) -> PluginResult<&DeviceBuffer> {
    slots
        .get(id.index())
        .and_then(Option::as_ref)
        .ok_or_else(|| PluginError::execution(format!("tensor {id} was never produced")))
}

/// Runs a translated network once on a fresh thread context.
pub fn run_network(graph: &TranslatedGraph, inputs: &[Vec<f32>]) -> PluginResult<Vec<Vec<f32>>> {
    NetworkRunner::new(graph, ThreadContext::default())?.run(inputs)
}
