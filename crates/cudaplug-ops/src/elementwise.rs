use std::any::Any;

use cudaplug::operation::{check_bindings, expect_inputs, expect_outputs, require_float};
use cudaplug::{
    register_operation, CreationContext, DType, DeviceBuffer, FromNode, NodeRef, Operation,
    OperationBase, PluginError, PluginResult, TensorId, ThreadContext, Workbuffers,
};

use crate::kernels::{broadcast_binary, broadcast_shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
}

impl BinaryKind {
    fn from_opcode(opcode: &str) -> Option<Self> {
        match opcode {
            "Add" => Some(BinaryKind::Add),
            "Subtract" => Some(BinaryKind::Subtract),
            "Multiply" => Some(BinaryKind::Multiply),
            "Divide" => Some(BinaryKind::Divide),
            "Maximum" => Some(BinaryKind::Maximum),
            "Minimum" => Some(BinaryKind::Minimum),
            _ => None,
        }
    }

    #[inline]
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryKind::Add => a + b,
            BinaryKind::Subtract => a - b,
            BinaryKind::Multiply => a * b,
            BinaryKind::Divide => a / b,
            BinaryKind::Maximum => a.max(b),
            BinaryKind::Minimum => a.min(b),
        }
    }

    fn label(self) -> &'static str {
        match self {
            BinaryKind::Add => "ewise_add",
            BinaryKind::Subtract => "ewise_sub",
            BinaryKind::Multiply => "ewise_mul",
            BinaryKind::Divide => "ewise_div",
            BinaryKind::Maximum => "ewise_max",
            BinaryKind::Minimum => "ewise_min",
        }
    }
}

/// Two-input elementwise arithmetic with NumPy broadcasting.
///
/// The `auto_broadcast` attribute selects `numpy` (default) or `none`, which requires equal
/// shapes. F16 tensors are widened to f32 for the arithmetic and rounded back on store.
#[derive(Debug)]
pub struct ElementwiseBinaryOp {
    base: OperationBase,
    kind: BinaryKind,
    dtype: DType,
    lhs_dims: Vec<usize>,
    rhs_dims: Vec<usize>,
    out_dims: Vec<usize>,
}

impl ElementwiseBinaryOp {
    pub fn kind(&self) -> BinaryKind {
        self.kind
    }
}

impl FromNode for ElementwiseBinaryOp {
    fn from_node(
        _context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self> {
        let opcode = node.type_info().name();
        let kind = BinaryKind::from_opcode(opcode).ok_or_else(|| {
            PluginError::unsupported(opcode, "not an elementwise binary opcode")
        })?;
        expect_inputs(node, &input_ids, 2)?;
        expect_outputs(node, &output_ids, 1)?;
        let specs: Vec<_> = node.inputs().iter().chain(node.outputs()).cloned().collect();
        let dtype = require_float(node, &specs)?;

        let lhs_dims = node.inputs()[0].shape.dims().to_vec();
        let rhs_dims = node.inputs()[1].shape.dims().to_vec();
        let broadcast = match node.attribute("auto_broadcast") {
            None => true,
            Some(attr) => match attr.as_str().map(str::to_ascii_lowercase).as_deref() {
                Some("numpy") => true,
                Some("none") => false,
                _ => {
                    return Err(PluginError::invalid_node(
                        node.friendly_name(),
                        "auto_broadcast must be `numpy` or `none`",
                    ))
                }
            },
        };
        let out_dims = if broadcast {
            broadcast_shape(&lhs_dims, &rhs_dims)
        } else if lhs_dims == rhs_dims {
            Some(lhs_dims.clone())
        } else {
            None
        }
        .ok_or_else(|| {
            PluginError::invalid_node(
                node.friendly_name(),
                format!(
                    "shapes {} and {} do not broadcast",
                    node.inputs()[0].shape,
                    node.inputs()[1].shape
                ),
            )
        })?;
        if node.outputs()[0].shape.dims() != out_dims.as_slice() {
            return Err(PluginError::invalid_node(
                node.friendly_name(),
                format!(
                    "declared output {} but operands produce {:?}",
                    node.outputs()[0].shape,
                    out_dims
                ),
            ));
        }

        Ok(Self {
            base: OperationBase::new(node, input_ids, output_ids),
            kind,
            dtype,
            lhs_dims,
            rhs_dims,
            out_dims,
        })
    }
}

impl Operation for ElementwiseBinaryOp {
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
        let lhs = inputs[0].read_values(self.dtype)?;
        let rhs = inputs[1].read_values(self.dtype)?;
        let lhs_len: usize = self.lhs_dims.iter().product();
        let rhs_len: usize = self.rhs_dims.iter().product();
        if lhs.len() != lhs_len || rhs.len() != rhs_len {
            return Err(PluginError::execution(format!(
                "`{}` operands hold {} and {} values, expected {} and {}",
                self.name(),
                lhs.len(),
                rhs.len(),
                lhs_len,
                rhs_len
            )));
        }
        let (kind, dtype) = (self.kind, self.dtype);
        context.stream().launch(kind.label(), || {
            let result = broadcast_binary(
                &lhs,
                &self.lhs_dims,
                &rhs,
                &self.rhs_dims,
                &self.out_dims,
                |a, b| kind.apply(a, b),
            );
            outputs[0].write_values(dtype, &result)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

register_operation!(REGISTER_ADD, "Add" => ElementwiseBinaryOp);
register_operation!(REGISTER_SUBTRACT, "Subtract" => ElementwiseBinaryOp);
register_operation!(REGISTER_MULTIPLY, "Multiply" => ElementwiseBinaryOp);
register_operation!(REGISTER_DIVIDE, "Divide" => ElementwiseBinaryOp);
register_operation!(REGISTER_MAXIMUM, "Maximum" => ElementwiseBinaryOp);
register_operation!(REGISTER_MINIMUM, "Minimum" => ElementwiseBinaryOp);
