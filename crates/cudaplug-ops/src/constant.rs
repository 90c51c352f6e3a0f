use std::any::Any;

use cudaplug::operation::{check_bindings, expect_inputs, expect_outputs};
use cudaplug::{
    register_operation, CreationContext, DeviceBuffer, FromNode, NodeRef, Operation,
    OperationBase, PluginError, PluginResult, Stream, TensorId, ThreadContext, WorkbufferRequest,
    Workbuffers,
};

/// Materializes a constant tensor.
///
/// The payload lives in an immutable workbuffer uploaded once; each execution copies it into
/// the output slot.
#[derive(Debug)]
pub struct ConstantOp {
    base: OperationBase,
    values: Vec<f32>,
}

impl ConstantOp {
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

impl FromNode for ConstantOp {
    fn from_node(
        _context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self> {
        expect_inputs(node, &input_ids, 0)?;
        expect_outputs(node, &output_ids, 1)?;
        let constant = node.constant().ok_or_else(|| {
            PluginError::invalid_node(node.friendly_name(), "constant node carries no tensor")
        })?;
        constant.validate()?;
        if constant.spec != node.outputs()[0] {
            return Err(PluginError::invalid_node(
                node.friendly_name(),
                format!(
                    "constant payload {} does not match output {}",
                    constant.spec,
                    node.outputs()[0]
                ),
            ));
        }
        Ok(Self {
            base: OperationBase::new(node, input_ids, output_ids),
            values: constant.values.clone(),
        })
    }
}

impl Operation for ConstantOp {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn workbuffer_request(&self) -> WorkbufferRequest {
        WorkbufferRequest {
            immutable_sizes: vec![self.values.len() * 4],
            mutable_sizes: Vec::new(),
        }
    }

    fn init_shared_immutable_workbuffers(
        &self,
        stream: &Stream,
        buffers: &mut [DeviceBuffer],
    ) -> PluginResult<()> {
        let [payload] = buffers else {
            return Err(PluginError::execution(format!(
                "`{}` expects 1 immutable workbuffer, got {}",
                self.name(),
                buffers.len()
            )));
        };
        stream.launch("constant_upload", || payload.write_f32(&self.values))
    }

    fn execute(
        &self,
        context: &ThreadContext,
        inputs: &[&DeviceBuffer],
        outputs: &mut [DeviceBuffer],
        workbuffers: Workbuffers<'_>,
    ) -> PluginResult<()> {
        check_bindings(&self.base, inputs, outputs)?;
        let payload = workbuffers.immutable(0)?;
        context
            .stream()
            .launch("constant_copy", || outputs[0].copy_from(payload))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

register_operation!(REGISTER_CONSTANT, "Constant" => ConstantOp);
