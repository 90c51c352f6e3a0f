use std::any::Any;

use cudaplug::operation::{check_bindings, expect_inputs, expect_outputs, require_f32};
use cudaplug::{
    register_operation, CreationContext, DeviceBuffer, FromNode, Node, NodeRef, Operation,
    OperationBase, PluginError, PluginResult, TensorId, ThreadContext, Workbuffers,
};

use crate::kernels::Activation;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationKind {
    Relu,
    Sigmoid,
    Tanh,
    Clamp { min: f32, max: f32 },
}

impl ActivationKind {
    fn from_node(node: &dyn Node) -> PluginResult<Self> {
        let opcode = node.type_info().name();
        if opcode == "Clamp" {
            let bound = |name: &str| {
                node.attribute(name)
                    .and_then(|attr| attr.as_f32())
                    .ok_or_else(|| {
                        PluginError::invalid_node(
                            node.friendly_name(),
                            format!("clamp needs a numeric `{name}` attribute"),
                        )
                    })
            };
            let (min, max) = (bound("min")?, bound("max")?);
            if min > max {
                return Err(PluginError::invalid_node(
                    node.friendly_name(),
                    format!("clamp min {min} exceeds max {max}"),
                ));
            }
            return Ok(ActivationKind::Clamp { min, max });
        }
        match Activation::parse(opcode) {
            Some(Activation::Relu) => Ok(ActivationKind::Relu),
            Some(Activation::Sigmoid) => Ok(ActivationKind::Sigmoid),
            Some(Activation::Tanh) => Ok(ActivationKind::Tanh),
            None => Err(PluginError::unsupported(opcode, "not an activation opcode")),
        }
    }

    #[inline]
    fn apply(self, x: f32) -> f32 {
        match self {
            ActivationKind::Relu => Activation::Relu.apply(x),
            ActivationKind::Sigmoid => Activation::Sigmoid.apply(x),
            ActivationKind::Tanh => Activation::Tanh.apply(x),
            ActivationKind::Clamp { min, max } => x.clamp(min, max),
        }
    }
}

/// Unary activation applied elementwise; input and output share a shape.
#[derive(Debug)]
pub struct ActivationOp {
    base: OperationBase,
    kind: ActivationKind,
    len: usize,
}

impl ActivationOp {
    pub fn kind(&self) -> ActivationKind {
        self.kind
    }
}

impl FromNode for ActivationOp {
    fn from_node(
        _context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self> {
        let kind = ActivationKind::from_node(node.as_ref())?;
        expect_inputs(node, &input_ids, 1)?;
        expect_outputs(node, &output_ids, 1)?;
        require_f32(node, node.inputs())?;
        require_f32(node, node.outputs())?;
        if node.inputs()[0] != node.outputs()[0] {
            return Err(PluginError::invalid_node(
                node.friendly_name(),
                format!(
                    "output {} differs from input {}",
                    node.outputs()[0],
                    node.inputs()[0]
                ),
            ));
        }
        Ok(Self {
            base: OperationBase::new(node, input_ids, output_ids),
            kind,
            len: node.inputs()[0].element_count(),
        })
    }
}

impl Operation for ActivationOp {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn execute(
        &self,
        context: &ThreadContext,
        inputs: &[&DeviceBuffer],
        outputs: &mut [DeviceBuffer],
        _workbuffers: Workbuffers<'_>,
    ) -> PluginResult<()> {
        check_bindings(&self.base, inputs, outputs)?;
        let values = inputs[0].read_f32()?;
        if values.len() != self.len {
            return Err(PluginError::execution(format!(
                "`{}` input holds {} values, expected {}",
                self.name(),
                values.len(),
                self.len
            )));
        }
        context.stream().launch(self.type_name(), || {
            let result: Vec<f32> = values.iter().map(|&x| self.kind.apply(x)).collect();
            outputs[0].write_f32(&result)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

register_operation!(REGISTER_RELU, "Relu" => ActivationOp);
register_operation!(REGISTER_SIGMOID, "Sigmoid" => ActivationOp);
register_operation!(REGISTER_TANH, "Tanh" => ActivationOp);
register_operation!(REGISTER_CLAMP, "Clamp" => ActivationOp);
