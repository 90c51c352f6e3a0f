use cudaplug::{
    DType, DeviceBuffer, Operation, PluginError, PluginResult, TensorSpec, ThreadContext,
    Workbuffers,
};

/// Drives one operation the way the executor would.
///
/// Immutable workbuffers are allocated and initialized once in [`OperationRunner::new`];
/// mutable workbuffers and outputs are fresh for every [`OperationRunner::run`].
pub struct OperationRunner<'op> {
    operation: &'op dyn Operation,
    context: ThreadContext,
    immutable: Vec<DeviceBuffer>,
}

impl<'op> OperationRunner<'op> {
    pub fn new(operation: &'op dyn Operation) -> PluginResult<Self> {
        Self::with_context(operation, ThreadContext::default())
    }

    pub fn with_context(
        operation: &'op dyn Operation,
        context: ThreadContext,
    ) -> PluginResult<Self> {
        let request = operation.workbuffer_request();
        let stream = context.stream();
        let mut immutable: Vec<DeviceBuffer> = request
            .immutable_sizes
            .iter()
            .map(|&size| stream.alloc_zeroed(size))
            .collect();
        operation.init_shared_immutable_workbuffers(stream, &mut immutable)?;
        Ok(Self {
            operation,
            context,
            immutable,
        })
    }

    pub fn context(&self) -> &ThreadContext {
        &self.context
    }

    pub fn immutable_workbuffers(&self) -> &[DeviceBuffer] {
        &self.immutable
    }

    /// Executes once with f32 inputs and returns every output as f32 values.
    pub fn run(
        &self,
        inputs: &[&[f32]],
        output_specs: &[TensorSpec],
    ) -> PluginResult<Vec<Vec<f32>>> {
        self.run_as(DType::F32, inputs, output_specs)
    }

    /// Executes once with every input stored as `input_dtype`. Outputs are decoded with the
    /// element type of their spec and widened to f32.
    pub fn run_as(
        &self,
        input_dtype: DType,
        inputs: &[&[f32]],
        output_specs: &[TensorSpec],
    ) -> PluginResult<Vec<Vec<f32>>> {
        let stream = self.context.stream();
        let input_buffers = inputs
            .iter()
            .map(|values| DeviceBuffer::from_values(input_dtype, values))
            .collect::<PluginResult<Vec<_>>>()?;
        let input_refs: Vec<&DeviceBuffer> = input_buffers.iter().collect();
        let mut outputs: Vec<DeviceBuffer> = output_specs
            .iter()
            .map(|spec| stream.alloc_zeroed(spec.byte_len()))
            .collect();
        let mut mutable: Vec<DeviceBuffer> = self
            .operation
            .workbuffer_request()
            .mutable_sizes
            .iter()
            .map(|&size| stream.alloc_zeroed(size))
            .collect();

        self.operation.execute(
            &self.context,
            &input_refs,
            &mut outputs,
            Workbuffers::new(&self.immutable, &mut mutable),
        )?;
        outputs
            .iter()
            .zip(output_specs)
            .map(|(buffer, spec)| buffer.read_values(spec.dtype))
            .collect()
    }

    /// Like [`OperationRunner::run`] for operations with exactly one output.
    pub fn run_single(
        &self,
        inputs: &[&[f32]],
        output_spec: &TensorSpec,
    ) -> PluginResult<Vec<f32>> {
        self.run(inputs, std::slice::from_ref(output_spec))?
            .pop()
            .ok_or_else(|| {
                PluginError::execution(format!("`{}` produced no output", self.operation.name()))
            })
    }
}
