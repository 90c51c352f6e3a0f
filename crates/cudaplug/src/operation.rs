//! Execution contract shared by every operation the registry can build.

use std::any::Any;
use std::fmt;

use crate::context::{CreationContext, Stream, ThreadContext};
use crate::error::{PluginError, PluginResult};
use crate::ir::NodeRef;
use crate::memory::{DeviceBuffer, WorkbufferRequest, Workbuffers};
use crate::tensor::{DType, TensorId, TensorSpec};

/// Identity and tensor wiring common to all operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBase {
    name: String,
    type_name: String,
    input_ids: Vec<TensorId>,
    output_ids: Vec<TensorId>,
}

impl OperationBase {
    /// Captures the node's friendly name and opcode alongside the tensor ids.
    pub fn new(node: &NodeRef, input_ids: Vec<TensorId>, output_ids: Vec<TensorId>) -> Self {
        Self {
            name: node.friendly_name().to_string(),
            type_name: node.type_info().name().to_string(),
            input_ids,
            output_ids,
        }
    }

    /// Friendly name of the node this operation was built from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opcode of the source node.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn input_ids(&self) -> &[TensorId] {
        &self.input_ids
    }

    pub fn output_ids(&self) -> &[TensorId] {
        &self.output_ids
    }
}

/// Executable form of one IR node.
pub trait Operation: Any + Send + Sync {
    /// Identity and tensor wiring fixed at creation.
    fn base(&self) -> &OperationBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn type_name(&self) -> &str {
        self.base().type_name()
    }

    fn input_ids(&self) -> &[TensorId] {
        self.base().input_ids()
    }

    fn output_ids(&self) -> &[TensorId] {
        self.base().output_ids()
    }

    /// Workbuffer sizes to allocate before execution. Defaults to none.
    fn workbuffer_request(&self) -> WorkbufferRequest {
        WorkbufferRequest::default()
    }

    /// Fills the immutable workbuffers once, before the first execution. `buffers` follows
    /// [`WorkbufferRequest::immutable_sizes`].
    fn init_shared_immutable_workbuffers(
        &self,
        _stream: &Stream,
        _buffers: &mut [DeviceBuffer],
    ) -> PluginResult<()> {
        Ok(())
    }

    /// Runs the operation on `context`'s stream. `inputs` and `outputs` follow the input and
    /// output ids.
    fn execute(
        &self,
        context: &ThreadContext,
        inputs: &[&DeviceBuffer],
        outputs: &mut [DeviceBuffer],
        workbuffers: Workbuffers<'_>,
    ) -> PluginResult<()>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn Operation {
    /// True when the concrete operation type is `T`.
    pub fn is<T: Operation>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrows the operation as `T`, if that is its concrete type.
    pub fn downcast_ref<T: Operation>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for dyn Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name())
            .field("type", &self.type_name())
            .field("inputs", &self.input_ids())
            .field("outputs", &self.output_ids())
            .finish()
    }
}

/// Typed constructor used by [`crate::OperationRegistrar`] entries.
pub trait FromNode: Operation + Sized {
    fn from_node(
        context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self>;
}

/// Checks that the node and the tensor ids agree on `expected` inputs.
pub fn expect_inputs(node: &NodeRef, input_ids: &[TensorId], expected: usize) -> PluginResult<()> {
    expect_arity(node, "input", node.inputs().len(), input_ids.len(), expected)
}

/// Checks that the node and the tensor ids agree on `expected` outputs.
pub fn expect_outputs(
    node: &NodeRef,
    output_ids: &[TensorId],
    expected: usize,
) -> PluginResult<()> {
    expect_arity(node, "output", node.outputs().len(), output_ids.len(), expected)
}

fn expect_arity(
    node: &NodeRef,
    kind: &str,
    declared: usize,
    provided: usize,
    expected: usize,
) -> PluginResult<()> {
    if declared != expected || provided != expected {
        return Err(PluginError::invalid_node(
            node.friendly_name(),
            format!(
                "expects {expected} {kind}s, node declares {declared} and {provided} tensor ids were given"
            ),
        ));
    }
    Ok(())
}

/// Rejects specs the f32 reference kernels cannot compute.
pub fn require_f32(node: &NodeRef, specs: &[TensorSpec]) -> PluginResult<()> {
    if let Some(spec) = specs.iter().find(|spec| spec.dtype != DType::F32) {
        return Err(PluginError::unsupported(
            node.type_info().name(),
            format!("element type {:?} on node `{}`", spec.dtype, node.friendly_name()),
        ));
    }
    Ok(())
}

/// Returns the single float element type shared by `specs`.
///
/// Kernels that compute in f32 but store F32 or F16 use this in place of [`require_f32`].
/// Non-float types are [`PluginError::Unsupported`]; a mix of float types is an invalid node.
pub fn require_float(node: &NodeRef, specs: &[TensorSpec]) -> PluginResult<DType> {
    let Some(first) = specs.first() else {
        return Ok(DType::F32);
    };
    if let Some(spec) = specs.iter().find(|spec| !spec.dtype.is_float()) {
        return Err(PluginError::unsupported(
            node.type_info().name(),
            format!("element type {:?} on node `{}`", spec.dtype, node.friendly_name()),
        ));
    }
    if let Some(spec) = specs.iter().find(|spec| spec.dtype != first.dtype) {
        return Err(PluginError::invalid_node(
            node.friendly_name(),
            format!("mixes {:?} and {:?} tensors", first.dtype, spec.dtype),
        ));
    }
    Ok(first.dtype)
}

/// Verifies the buffer counts handed to `execute` before a kernel touches them.
pub fn check_bindings(
    base: &OperationBase,
    inputs: &[&DeviceBuffer],
    outputs: &[DeviceBuffer],
) -> PluginResult<()> {
    if inputs.len() != base.input_ids().len() || outputs.len() != base.output_ids().len() {
        return Err(PluginError::execution(format!(
            "`{}` bound with {} inputs / {} outputs, expected {} / {}",
            base.name(),
            inputs.len(),
            outputs.len(),
            base.input_ids().len(),
            base.output_ids().len()
        )));
    }
    Ok(())
}
