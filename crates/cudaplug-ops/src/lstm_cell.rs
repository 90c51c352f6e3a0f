use std::any::Any;

use cudaplug::operation::{check_bindings, expect_inputs, expect_outputs, require_float};
use cudaplug::{
    register_operation, CreationContext, DType, DeviceBuffer, FromNode, Node, NodeRef, Operation,
    OperationBase, PluginError, PluginResult, TensorId, ThreadContext, WorkbufferRequest,
    Workbuffers,
};

use crate::kernels::Activation;

const GATES: usize = 4;
const DEFAULT_ACTIVATIONS: [Activation; 3] =
    [Activation::Sigmoid, Activation::Tanh, Activation::Tanh];

/// One LSTM step over a batch.
///
/// Inputs are `X[B, I]`, `H[B, Hs]`, `C[B, Hs]`, `W[4Hs, I]`, `R[4Hs, Hs]` and `B[4Hs]`, with
/// gate rows stacked as forget, input, cell, output. Outputs are the next hidden and cell
/// states. Gate pre-activations live in a mutable workbuffer between the two launches, always
/// as f32; F16 tensors are widened on load and rounded on store.
#[derive(Debug)]
pub struct LstmCellOp {
    base: OperationBase,
    dtype: DType,
    batch: usize,
    input_size: usize,
    hidden_size: usize,
    activations: [Activation; 3],
    clip: f32,
}

impl LstmCellOp {
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn clip(&self) -> f32 {
        self.clip
    }

    /// Element type of every input and output.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    fn gate_len(&self) -> usize {
        self.batch * GATES * self.hidden_size
    }
}

fn parse_activations(node: &dyn Node) -> PluginResult<[Activation; 3]> {
    let Some(attr) = node.attribute("activations") else {
        return Ok(DEFAULT_ACTIVATIONS);
    };
    let invalid = |reason: String| PluginError::invalid_node(node.friendly_name(), reason);
    let names = attr
        .as_strs()
        .ok_or_else(|| invalid("`activations` must be a list of names".to_string()))?;
    let [f, g, h] = names else {
        return Err(invalid(format!(
            "`activations` needs 3 entries, got {}",
            names.len()
        )));
    };
    let parse = |name: &String| {
        Activation::parse(name).ok_or_else(|| invalid(format!("unknown activation `{name}`")))
    };
    Ok([parse(f)?, parse(g)?, parse(h)?])
}

impl FromNode for LstmCellOp {
    fn from_node(
        _context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self> {
        expect_inputs(node, &input_ids, 6)?;
        expect_outputs(node, &output_ids, 2)?;
        let specs: Vec<_> = node.inputs().iter().chain(node.outputs()).cloned().collect();
        let dtype = require_float(node, &specs)?;

        let invalid = |reason: String| PluginError::invalid_node(node.friendly_name(), reason);
        let dims: Vec<&[usize]> = node.inputs().iter().map(|spec| spec.shape.dims()).collect();
        let (batch, input_size) = match dims[0] {
            [b, i] => (*b, *i),
            other => return Err(invalid(format!("X must be rank 2, got {other:?}"))),
        };
        let hidden_size = match dims[1] {
            [_, h] => *h,
            other => return Err(invalid(format!("H must be rank 2, got {other:?}"))),
        };
        let expected: [&[usize]; 6] = [
            &[batch, input_size],
            &[batch, hidden_size],
            &[batch, hidden_size],
            &[GATES * hidden_size, input_size],
            &[GATES * hidden_size, hidden_size],
            &[GATES * hidden_size],
        ];
        for (index, (got, want)) in dims.iter().zip(expected).enumerate() {
            if *got != want {
                return Err(invalid(format!(
                    "input {index} has shape {got:?}, expected {want:?}"
                )));
            }
        }
        for (index, spec) in node.outputs().iter().enumerate() {
            if spec.shape.dims() != [batch, hidden_size] {
                return Err(invalid(format!(
                    "output {index} has shape {}, expected [{batch}, {hidden_size}]",
                    spec.shape
                )));
            }
        }

        if let Some(attr) = node.attribute("hidden_size") {
            let declared = attr
                .as_int()
                .ok_or_else(|| invalid("`hidden_size` must be an integer".to_string()))?;
            if usize::try_from(declared).ok() != Some(hidden_size) {
                return Err(invalid(format!(
                    "`hidden_size` is {declared} but the state tensors use {hidden_size}"
                )));
            }
        }
        let activations = parse_activations(node.as_ref())?;
        let clip = match node.attribute("clip") {
            None => 0.0,
            Some(attr) => attr
                .as_f32()
                .filter(|clip| *clip >= 0.0)
                .ok_or_else(|| invalid("`clip` must be a non-negative number".to_string()))?,
        };

        log::debug!(
            "lstm cell `{}`: {dtype:?}, batch {batch}, input {input_size}, hidden {hidden_size}, clip {clip}",
            node.friendly_name()
        );
        Ok(Self {
            base: OperationBase::new(node, input_ids, output_ids),
            dtype,
            batch,
            input_size,
            hidden_size,
            activations,
            clip,
        })
    }
}

impl Operation for LstmCellOp {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn workbuffer_request(&self) -> WorkbufferRequest {
        WorkbufferRequest {
            immutable_sizes: Vec::new(),
            mutable_sizes: vec![self.gate_len() * 4],
        }
    }

    fn execute(
        &self,
        context: &ThreadContext,
        inputs: &[&DeviceBuffer],
        outputs: &mut [DeviceBuffer],
        mut workbuffers: Workbuffers<'_>,
    ) -> PluginResult<()> {
        check_bindings(&self.base, inputs, outputs)?;
        let (batch, input, hidden) = (self.batch, self.input_size, self.hidden_size);
        let values = inputs
            .iter()
            .map(|buffer| buffer.read_values(self.dtype))
            .collect::<PluginResult<Vec<_>>>()?;
        let [x, h_prev, c_prev, w, r, bias] = values.as_slice() else {
            return Err(PluginError::execution("lstm cell expects 6 inputs"));
        };
        let expected = [
            batch * input,
            batch * hidden,
            batch * hidden,
            GATES * hidden * input,
            GATES * hidden * hidden,
            GATES * hidden,
        ];
        if let Some((index, (got, want))) = values
            .iter()
            .map(Vec::len)
            .zip(expected)
            .enumerate()
            .find(|(_, (got, want))| got != want)
        {
            return Err(PluginError::execution(format!(
                "`{}` input {index} holds {got} values, expected {want}",
                self.name()
            )));
        }

        let stream = context.stream();
        let scratch = workbuffers.mutable(0)?;
        stream.launch("lstm_cell_gates", || {
            let mut gates = vec![0.0f32; self.gate_len()];
            for b in 0..batch {
                let x_row = &x[b * input..(b + 1) * input];
                let h_row = &h_prev[b * hidden..(b + 1) * hidden];
                for (unit, gate) in gates[b * GATES * hidden..(b + 1) * GATES * hidden]
                    .iter_mut()
                    .enumerate()
                {
                    let w_row = &w[unit * input..(unit + 1) * input];
                    let r_row = &r[unit * hidden..(unit + 1) * hidden];
                    let mut acc = bias[unit];
                    acc += x_row.iter().zip(w_row).map(|(p, q)| p * q).sum::<f32>();
                    acc += h_row.iter().zip(r_row).map(|(p, q)| p * q).sum::<f32>();
                    *gate = acc;
                }
            }
            scratch.write_f32(&gates)
        })?;

        let gates = scratch.read_f32()?;
        let [f_act, g_act, h_act] = self.activations;
        let (clip, dtype) = (self.clip, self.dtype);
        let clipped = |v: f32| if clip > 0.0 { v.clamp(-clip, clip) } else { v };
        stream.launch("lstm_cell_state", || {
            let mut h_next = vec![0.0f32; batch * hidden];
            let mut c_next = vec![0.0f32; batch * hidden];
            for b in 0..batch {
                let row = &gates[b * GATES * hidden..(b + 1) * GATES * hidden];
                for j in 0..hidden {
                    let forget = f_act.apply(clipped(row[j]));
                    let input_gate = f_act.apply(clipped(row[hidden + j]));
                    let candidate = g_act.apply(clipped(row[2 * hidden + j]));
                    let output_gate = f_act.apply(clipped(row[3 * hidden + j]));
                    let idx = b * hidden + j;
                    let c = forget * c_prev[idx] + input_gate * candidate;
                    c_next[idx] = c;
                    h_next[idx] = output_gate * h_act.apply(c);
                }
            }
            outputs[0].write_values(dtype, &h_next)?;
            outputs[1].write_values(dtype, &c_next)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

register_operation!(REGISTER_LSTM_CELL, "LSTMCell" => LstmCellOp);
