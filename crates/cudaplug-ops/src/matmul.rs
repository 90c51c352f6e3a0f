use std::any::Any;

use cudaplug::operation::{check_bindings, expect_inputs, expect_outputs, require_f32};
use cudaplug::{
    register_operation, CreationContext, DeviceBuffer, FromNode, Node, NodeRef, Operation,
    OperationBase, PluginError, PluginResult, TensorId, ThreadContext, WorkbufferRequest,
    Workbuffers,
};

/// GEMM dimensions resolved at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GemmShape {
    batch: usize,
    m: usize,
    n: usize,
    k: usize,
    a_batched: bool,
    b_batched: bool,
}

/// Batched matrix multiply `A[.., M, K] x B[.., K, N]`.
///
/// `transpose_a` / `transpose_b` swap the two innermost axes of the operand. Batch axes must
/// match, or one operand must be rank 2 and is reused for every batch. With the optimize flag
/// set, B is packed into a mutable workbuffer as `[N, K]` rows before the product.
#[derive(Debug)]
pub struct MatMulOp {
    base: OperationBase,
    shape: GemmShape,
    transpose_a: bool,
    transpose_b: bool,
    pack_b: bool,
}

impl MatMulOp {
    /// Whether this instance packs B through a workbuffer.
    pub fn packs_rhs(&self) -> bool {
        self.pack_b
    }

    fn b_batch_len(&self) -> usize {
        self.shape.k * self.shape.n
    }
}

fn flag(node: &dyn Node, name: &str) -> PluginResult<bool> {
    match node.attribute(name) {
        None => Ok(false),
        Some(attr) => attr.as_bool().ok_or_else(|| {
            PluginError::invalid_node(node.friendly_name(), format!("`{name}` must be a bool"))
        }),
    }
}

impl FromNode for MatMulOp {
    fn from_node(
        context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Self> {
        expect_inputs(node, &input_ids, 2)?;
        expect_outputs(node, &output_ids, 1)?;
        require_f32(node, node.inputs())?;
        require_f32(node, node.outputs())?;
        let transpose_a = flag(node.as_ref(), "transpose_a")?;
        let transpose_b = flag(node.as_ref(), "transpose_b")?;

        let invalid = |reason: String| PluginError::invalid_node(node.friendly_name(), reason);
        let a = node.inputs()[0].shape.dims();
        let b = node.inputs()[1].shape.dims();
        if a.len() < 2 || b.len() < 2 {
            return Err(invalid(format!(
                "operands must be at least rank 2, got {:?} and {:?}",
                a, b
            )));
        }
        let (a_batch, a_mat) = a.split_at(a.len() - 2);
        let (b_batch, b_mat) = b.split_at(b.len() - 2);
        let (m, k) = if transpose_a {
            (a_mat[1], a_mat[0])
        } else {
            (a_mat[0], a_mat[1])
        };
        let (k_b, n) = if transpose_b {
            (b_mat[1], b_mat[0])
        } else {
            (b_mat[0], b_mat[1])
        };
        if k != k_b {
            return Err(invalid(format!("inner dimensions differ: {k} vs {k_b}")));
        }
        let batch_dims = match (a_batch.is_empty(), b_batch.is_empty()) {
            (_, true) => a_batch,
            (true, false) => b_batch,
            (false, false) if a_batch == b_batch => a_batch,
            _ => {
                return Err(invalid(format!(
                    "batch dimensions {:?} and {:?} differ",
                    a_batch, b_batch
                )))
            }
        };
        let mut expected = batch_dims.to_vec();
        expected.extend([m, n]);
        if node.outputs()[0].shape.dims() != expected.as_slice() {
            return Err(invalid(format!(
                "declared output {} but operands produce {:?}",
                node.outputs()[0].shape,
                expected
            )));
        }

        if context.optimize() {
            log::debug!(
                "matmul `{}`: packing rhs as [{n}, {k}] through a workbuffer",
                node.friendly_name()
            );
        }
        let shape = GemmShape {
            batch: batch_dims.iter().product(),
            m,
            n,
            k,
            a_batched: !a_batch.is_empty(),
            b_batched: !b_batch.is_empty(),
        };
        Ok(Self {
            base: OperationBase::new(node, input_ids, output_ids),
            shape,
            transpose_a,
            transpose_b,
            pack_b: context.optimize(),
        })
    }
}

impl Operation for MatMulOp {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn workbuffer_request(&self) -> WorkbufferRequest {
        if !self.pack_b {
            return WorkbufferRequest::default();
        }
        let batches = if self.shape.b_batched {
            self.shape.batch
        } else {
            1
        };
        WorkbufferRequest {
            immutable_sizes: Vec::new(),
            mutable_sizes: vec![batches * self.b_batch_len() * 4],
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
        let GemmShape {
            batch,
            m,
            n,
            k,
            a_batched,
            b_batched,
        } = self.shape;
        let a = inputs[0].read_f32()?;
        let b = inputs[1].read_f32()?;
        let a_len = if a_batched { batch * m * k } else { m * k };
        let b_len = if b_batched { batch * k * n } else { k * n };
        if a.len() != a_len || b.len() != b_len {
            return Err(PluginError::execution(format!(
                "`{}` operands hold {} and {} values, expected {} and {}",
                self.name(),
                a.len(),
                b.len(),
                a_len,
                b_len
            )));
        }

        let stream = context.stream();
        let a_at = |base: usize, row: usize, col: usize| {
            if self.transpose_a {
                a[base + col * m + row]
            } else {
                a[base + row * k + col]
            }
        };

        let mut result = vec![0.0f32; batch * m * n];
        if self.pack_b {
            let packed_buffer = workbuffers.mutable(0)?;
            stream.launch("matmul_pack_rhs", || {
                let span = (k * n).max(1);
                let mut packed = vec![0.0f32; b.len()];
                for (chunk, src) in packed.chunks_exact_mut(span).zip(b.chunks_exact(span)) {
                    for col in 0..n {
                        for inner in 0..k {
                            chunk[col * k + inner] = if self.transpose_b {
                                src[col * k + inner]
                            } else {
                                src[inner * n + col]
                            };
                        }
                    }
                }
                packed_buffer.write_f32(&packed)
            })?;
            let packed = packed_buffer.read_f32()?;
            stream.launch("matmul_packed", || {
                for bi in 0..batch {
                    let a_base = if a_batched { bi * m * k } else { 0 };
                    let b_base = if b_batched { bi * k * n } else { 0 };
                    for row in 0..m {
                        for col in 0..n {
                            let b_row = &packed[b_base + col * k..b_base + (col + 1) * k];
                            let mut acc = 0.0f32;
                            for (inner, &bv) in b_row.iter().enumerate() {
                                acc += a_at(a_base, row, inner) * bv;
                            }
                            result[(bi * m + row) * n + col] = acc;
                        }
                    }
                }
                Ok(())
            })?;
        } else {
            stream.launch("matmul", || {
                for bi in 0..batch {
                    let a_base = if a_batched { bi * m * k } else { 0 };
                    let b_base = if b_batched { bi * k * n } else { 0 };
                    for row in 0..m {
                        for col in 0..n {
                            let mut acc = 0.0f32;
                            for inner in 0..k {
                                let bv = if self.transpose_b {
                                    b[b_base + col * k + inner]
                                } else {
                                    b[b_base + inner * n + col]
                                };
                                acc += a_at(a_base, row, inner) * bv;
                            }
                            result[(bi * m + row) * n + col] = acc;
                        }
                    }
                }
                Ok(())
            })?;
        }
        outputs[0].write_f32(&result)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

register_operation!(REGISTER_MATMUL, "MatMul" => MatMulOp);
