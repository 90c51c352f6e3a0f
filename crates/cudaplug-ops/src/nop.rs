use std::any::Any;

use cudaplug::operation::check_bindings;
use cudaplug::{
    register_operation, CreationContext, DeviceBuffer, FromNode, NodeRef, Operation,
    OperationBase, PluginResult, TensorId, ThreadContext, Workbuffers,
};

/// Operation that issues no kernel. Parameter and result tensors are bound by the caller.
#[derive(Debug)]
pub struct NopOp {
    base: OperationBase,
}

impl FromNode for NopOp {
    fn from_node(
        _context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self> {
        Ok(Self {
            base: OperationBase::new(node, input_ids, output_ids),
        })
    }
}

impl Operation for NopOp {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn execute(
        &self,
        _context: &ThreadContext,
        inputs: &[&DeviceBuffer],
        outputs: &mut [DeviceBuffer],
        _workbuffers: Workbuffers<'_>,
    ) -> PluginResult<()> {
        check_bindings(&self.base, inputs, outputs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

register_operation!(REGISTER_PARAMETER, "Parameter" => NopOp);
register_operation!(REGISTER_RESULT, "Result" => NopOp);
