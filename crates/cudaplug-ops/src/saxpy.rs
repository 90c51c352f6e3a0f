use std::any::Any;

use cudaplug::operation::{check_bindings, expect_inputs, expect_outputs, require_f32};
use cudaplug::{
    register_operation, CreationContext, DeviceBuffer, FromNode, NodeRef, Operation,
    OperationBase, PluginError, PluginResult, TensorId, ThreadContext, Workbuffers,
};

/// `out = alpha * x + y` over two equally shaped f32 tensors.
#[derive(Debug)]
pub struct SaxpyOp {
    base: OperationBase,
    alpha: f32,
    len: usize,
}

impl SaxpyOp {
    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl FromNode for SaxpyOp {
    fn from_node(
        _context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self> {
        // Bare nodes that declare no tensors are accepted; their wiring is checked at execute.
        let declares_tensors = !node.inputs().is_empty() || !node.outputs().is_empty();
        let mut len = 0;
        if declares_tensors {
            expect_inputs(node, &input_ids, 2)?;
            expect_outputs(node, &output_ids, 1)?;
            require_f32(node, node.inputs())?;
            require_f32(node, node.outputs())?;
            let x = &node.inputs()[0];
            if node.inputs()[1] != *x || node.outputs()[0] != *x {
                return Err(PluginError::invalid_node(
                    node.friendly_name(),
                    "saxpy operands and result must share one shape",
                ));
            }
            len = x.element_count();
        }
        let alpha = match node.attribute("alpha") {
            Some(attr) => attr.as_f32().ok_or_else(|| {
                PluginError::invalid_node(node.friendly_name(), "alpha must be a number")
            })?,
            None => 1.0,
        };
        Ok(Self {
            base: OperationBase::new(node, input_ids, output_ids),
            alpha,
            len,
        })
    }
}

impl Operation for SaxpyOp {
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
        // Bare nodes may carry any number of ids; only two inputs and one output can run.
        let bound = (inputs.len(), outputs.len());
        let ([x, y], [out]) = (inputs, &mut *outputs) else {
            return Err(PluginError::execution(format!(
                "saxpy `{}` needs 2 inputs / 1 output, bound with {} / {}",
                self.name(),
                bound.0,
                bound.1
            )));
        };
        let x = x.read_f32()?;
        let y = y.read_f32()?;
        if x.len() != y.len() || (self.len != 0 && x.len() != self.len) {
            return Err(PluginError::execution(format!(
                "saxpy `{}` got {} and {} elements",
                self.name(),
                x.len(),
                y.len()
            )));
        }
        context.stream().launch("saxpy", || {
            let result: Vec<f32> = x
                .iter()
                .zip(&y)
                .map(|(&x, &y)| self.alpha * x + y)
                .collect();
            out.write_f32(&result)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

register_operation!(REGISTER_SAXPY, "Saxpy" => SaxpyOp);
