use cudaplug::{
    Attribute, ConstantTensor, CreationContext, DType, Device, GraphNode, OperationRegistry,
    PluginError, TensorSpec, TypeInfo,
};
use cudaplug_ops::{
    ActivationKind, ActivationOp, BinaryKind, ConstantOp, ElementwiseBinaryOp, LstmCellOp,
    MatMulOp,
};
use cudaplug_tests::{
    assert_close, assert_close_with, instantiate, random_values, OperationRunner, F16_ATOL,
    F16_RTOL,
};

fn registry() -> OperationRegistry {
    cudaplug_ops::registry().expect("linked registrars are unique")
}

fn node(opcode: &str, inputs: Vec<TensorSpec>, outputs: Vec<TensorSpec>) -> GraphNode {
    let mut node = GraphNode::new(TypeInfo::named(opcode), opcode.to_ascii_lowercase());
    node.inputs = inputs;
    node.outputs = outputs;
    node
}

fn with_attr(mut node: GraphNode, name: &str, value: impl Into<Attribute>) -> GraphNode {
    node.attributes.insert(name.to_string(), value.into());
    node
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[test]
fn add_broadcasts_row_vector() {
    let registry = registry();
    let out = TensorSpec::f32([2, 3]);
    let op = instantiate(
        &registry,
        &CreationContext::default(),
        node(
            "Add",
            vec![TensorSpec::f32([2, 3]), TensorSpec::f32([3])],
            vec![out.clone()],
        ),
    )
    .expect("add");
    assert_eq!(
        op.downcast_ref::<ElementwiseBinaryOp>().map(|op| op.kind()),
        Some(BinaryKind::Add)
    );

    let runner = OperationRunner::new(op.as_ref()).expect("runner");
    let result = runner
        .run_single(&[&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[10.0, 20.0, 30.0]], &out)
        .expect("execute");
    assert_eq!(result, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    assert_eq!(runner.context().stream().launch_count(), 1);
}

#[test]
fn binary_kinds_follow_their_opcode() {
    let registry = registry();
    let lhs: [f32; 4] = [6.0, -2.0, 3.0, 0.5];
    let rhs: [f32; 4] = [2.0, 4.0, -3.0, 0.25];
    let cases: [(&str, [f32; 4]); 5] = [
        ("Subtract", [4.0, -6.0, 6.0, 0.25]),
        ("Multiply", [12.0, -8.0, -9.0, 0.125]),
        ("Divide", [3.0, -0.5, -1.0, 2.0]),
        ("Maximum", [6.0, 4.0, 3.0, 0.5]),
        ("Minimum", [2.0, -2.0, -3.0, 0.25]),
    ];
    let spec = TensorSpec::f32([4]);
    for (opcode, expected) in cases {
        let op = instantiate(
            &registry,
            &CreationContext::default(),
            node(opcode, vec![spec.clone(), spec.clone()], vec![spec.clone()]),
        )
        .expect(opcode);
        let result = OperationRunner::new(op.as_ref())
            .and_then(|runner| runner.run_single(&[&lhs, &rhs], &spec))
            .expect(opcode);
        assert_eq!(result, expected, "{opcode}");
    }
}

#[test]
fn add_stores_half_precision() {
    let registry = registry();
    let spec = TensorSpec::f16([4]);
    let op = instantiate(
        &registry,
        &CreationContext::default(),
        node("Add", vec![spec.clone(), spec.clone()], vec![spec.clone()]),
    )
    .expect("f16 add");
    let runner = OperationRunner::new(op.as_ref()).expect("runner");
    // Every operand and sum is exact in half precision.
    let result = runner
        .run_as(
            DType::F16,
            &[&[1.5, -2.0, 0.25, 8.0], &[0.5, 4.0, -0.75, 1.0]],
            std::slice::from_ref(&spec),
        )
        .expect("execute");
    assert_eq!(result, vec![vec![2.0, 2.0, -0.5, 9.0]]);

    let mixed = node(
        "Add",
        vec![TensorSpec::f32([4]), spec.clone()],
        vec![spec.clone()],
    );
    let err = instantiate(&registry, &CreationContext::default(), mixed)
        .expect_err("f32 and f16 operands");
    assert!(matches!(err, PluginError::InvalidNode { .. }));
}

#[test]
fn elementwise_rejects_bad_shapes() {
    let registry = registry();
    let context = CreationContext::default();

    let strict = with_attr(
        node(
            "Multiply",
            vec![TensorSpec::f32([2, 3]), TensorSpec::f32([3])],
            vec![TensorSpec::f32([2, 3])],
        ),
        "auto_broadcast",
        "none",
    );
    let err = instantiate(&registry, &context, strict).expect_err("broadcast disabled");
    assert!(matches!(err, PluginError::InvalidNode { .. }));

    let wrong_output = node(
        "Add",
        vec![TensorSpec::f32([2, 3]), TensorSpec::f32([3])],
        vec![TensorSpec::f32([3])],
    );
    let err = instantiate(&registry, &context, wrong_output).expect_err("output mismatch");
    assert!(err.to_string().contains("declared output"));

    let ints = node(
        "Add",
        vec![TensorSpec::new(DType::I32, vec![4]), TensorSpec::new(DType::I32, vec![4])],
        vec![TensorSpec::new(DType::I32, vec![4])],
    );
    let err = instantiate(&registry, &context, ints).expect_err("i32 not computed");
    assert!(matches!(err, PluginError::Unsupported { ref op, .. } if op == "Add"));
}

#[test]
fn activations_match_their_formulas() {
    let registry = registry();
    let spec = TensorSpec::f32([3, 5]);
    let input = random_values(11, spec.element_count());
    let formulas: [(&str, fn(f32) -> f32); 3] = [
        ("Relu", |x| x.max(0.0)),
        ("Sigmoid", sigmoid),
        ("Tanh", f32::tanh),
    ];
    for (opcode, formula) in formulas {
        let op = instantiate(
            &registry,
            &CreationContext::default(),
            node(opcode, vec![spec.clone()], vec![spec.clone()]),
        )
        .expect(opcode);
        let result = OperationRunner::new(op.as_ref())
            .and_then(|runner| runner.run_single(&[&input], &spec))
            .expect(opcode);
        let expected: Vec<f32> = input.iter().map(|&x| formula(x)).collect();
        assert_close(&result, &expected);
    }
}

#[test]
fn clamp_needs_ordered_bounds() {
    let registry = registry();
    let context = CreationContext::default();
    let spec = TensorSpec::f32([4]);
    let clamp = |min: f64, max: f64| {
        let node = node("Clamp", vec![spec.clone()], vec![spec.clone()]);
        with_attr(with_attr(node, "min", min), "max", max)
    };

    let op = instantiate(&registry, &context, clamp(-0.5, 0.5)).expect("clamp");
    let kind = op.downcast_ref::<ActivationOp>().map(|op| op.kind());
    assert_eq!(kind, Some(ActivationKind::Clamp { min: -0.5, max: 0.5 }));
    let result = OperationRunner::new(op.as_ref())
        .and_then(|runner| runner.run_single(&[&[-2.0, -0.25, 0.25, 2.0]], &spec))
        .expect("execute");
    assert_eq!(result, vec![-0.5, -0.25, 0.25, 0.5]);

    let err = instantiate(&registry, &context, clamp(1.0, -1.0)).expect_err("min above max");
    assert!(matches!(err, PluginError::InvalidNode { .. }));

    let unbounded = node("Clamp", vec![spec.clone()], vec![spec.clone()]);
    let err = instantiate(&registry, &context, unbounded).expect_err("missing bounds");
    assert!(err.to_string().contains("min"));
}

#[test]
fn saxpy_scales_first_operand() {
    let registry = registry();
    let spec = TensorSpec::f32([3]);
    let saxpy = with_attr(
        node("Saxpy", vec![spec.clone(), spec.clone()], vec![spec.clone()]),
        "alpha",
        2.0,
    );
    let op = instantiate(&registry, &CreationContext::default(), saxpy).expect("saxpy");
    let result = OperationRunner::new(op.as_ref())
        .and_then(|runner| runner.run_single(&[&[1.0, 2.0, 3.0], &[0.5, 0.5, 0.5]], &spec))
        .expect("execute");
    assert_eq!(result, vec![2.5, 4.5, 6.5]);

    let mismatched = node(
        "Saxpy",
        vec![spec.clone(), TensorSpec::f32([4])],
        vec![spec.clone()],
    );
    let err = instantiate(&registry, &CreationContext::default(), mismatched)
        .expect_err("operand shapes differ");
    assert!(matches!(err, PluginError::InvalidNode { .. }));
}

#[test]
fn constant_payload_is_uploaded_once() -> anyhow::Result<()> {
    let registry = registry();
    let values = vec![1.5, -2.0, 0.25, 8.0];
    let payload = ConstantTensor::f32([2, 2], values.clone())?;
    let mut constant = node("Constant", Vec::new(), vec![payload.spec.clone()]);
    constant.constant = Some(payload.clone());
    let op = instantiate(&registry, &CreationContext::default(), constant)?;
    assert_eq!(
        op.downcast_ref::<ConstantOp>().map(ConstantOp::values),
        Some(values.as_slice())
    );
    assert_eq!(op.workbuffer_request().immutable_sizes, vec![16]);

    let runner = OperationRunner::new(op.as_ref())?;
    let stream = runner.context().stream();
    assert_eq!(stream.launch_count(), 1);
    assert_eq!(runner.immutable_workbuffers()[0].read_f32()?, values);

    for run in 1..=2u64 {
        let result = runner.run_single(&[], &payload.spec)?;
        assert_eq!(result, values);
        assert_eq!(stream.launch_count(), 1 + run);
    }
    Ok(())
}

#[test]
fn constant_must_match_its_output() {
    let registry = registry();
    let mut constant = node("Constant", Vec::new(), vec![TensorSpec::f32([3])]);
    constant.constant =
        Some(ConstantTensor::f32([2], vec![1.0, 2.0]).expect("well formed payload"));
    let err = instantiate(&registry, &CreationContext::default(), constant)
        .expect_err("payload shape differs");
    assert!(matches!(err, PluginError::InvalidNode { .. }));

    let missing = node("Constant", Vec::new(), vec![TensorSpec::f32([3])]);
    let err = instantiate(&registry, &CreationContext::default(), missing)
        .expect_err("no payload");
    assert!(err.to_string().contains("carries no tensor"));
}

fn reference_matmul(
    a: &[f32],
    b: &[f32],
    batch: usize,
    (m, k, n): (usize, usize, usize),
    b_shared: bool,
) -> Vec<f32> {
    let mut out = vec![0.0; batch * m * n];
    for bi in 0..batch {
        let b_base = if b_shared { 0 } else { bi * k * n };
        for row in 0..m {
            for col in 0..n {
                out[(bi * m + row) * n + col] = (0..k)
                    .map(|i| a[(bi * m + row) * k + i] * b[b_base + i * n + col])
                    .sum();
            }
        }
    }
    out
}

#[test]
fn matmul_matches_expected() {
    let registry = registry();
    let out = TensorSpec::f32([2, 2]);
    let op = instantiate(
        &registry,
        &CreationContext::default(),
        node(
            "MatMul",
            vec![TensorSpec::f32([2, 2]), TensorSpec::f32([2, 2])],
            vec![out.clone()],
        ),
    )
    .expect("matmul");
    let runner = OperationRunner::new(op.as_ref()).expect("runner");
    let result = runner
        .run_single(&[&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0]], &out)
        .expect("execute");
    assert_eq!(result, vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn packed_matmul_agrees_with_direct_matmul() {
    let registry = registry();
    let a_spec = TensorSpec::f32([2, 3, 4]);
    let out = TensorSpec::f32([2, 3, 5]);
    let a = random_values(1, a_spec.element_count());

    for b_dims in [vec![2usize, 4, 5], vec![4, 5]] {
        let b_spec = TensorSpec::f32(b_dims.clone());
        let b = random_values(2, b_spec.element_count());
        let expected = reference_matmul(&a, &b, 2, (3, 4, 5), b_dims.len() == 2);

        let mut results = Vec::new();
        for optimize in [false, true] {
            let context = CreationContext::new(Device::new(0), optimize);
            let op = instantiate(
                &registry,
                &context,
                node("MatMul", vec![a_spec.clone(), b_spec.clone()], vec![out.clone()]),
            )
            .expect("matmul");
            let matmul = op.downcast_ref::<MatMulOp>().expect("MatMulOp");
            assert_eq!(matmul.packs_rhs(), optimize);
            let request = op.workbuffer_request();
            if optimize {
                let batches = if b_dims.len() == 2 { 1 } else { 2 };
                assert_eq!(request.mutable_sizes, vec![batches * 4 * 5 * 4]);
            } else {
                assert!(request.is_empty());
            }
            let result = OperationRunner::new(op.as_ref())
                .and_then(|runner| runner.run_single(&[&a, &b], &out))
                .expect("execute");
            assert_close(&result, &expected);
            results.push(result);
        }
        assert_eq!(results[0], results[1]);
    }
}

#[test]
fn matmul_honours_transpose_flags() {
    let registry = registry();
    // Stored transposed; the logical operands are [[1, 2], [3, 4]] and [[5, 6], [7, 8]].
    let a_t = [1.0, 3.0, 2.0, 4.0];
    let b_t = [5.0, 7.0, 6.0, 8.0];
    let spec = TensorSpec::f32([2, 2]);
    for optimize in [false, true] {
        let matmul = node("MatMul", vec![spec.clone(), spec.clone()], vec![spec.clone()]);
        let matmul = with_attr(with_attr(matmul, "transpose_a", true), "transpose_b", true);
        let context = CreationContext::new(Device::new(0), optimize);
        let op = instantiate(&registry, &context, matmul).expect("matmul");
        let result = OperationRunner::new(op.as_ref())
            .and_then(|runner| runner.run_single(&[&a_t, &b_t], &spec))
            .expect("execute");
        assert_eq!(result, vec![19.0, 22.0, 43.0, 50.0]);
    }
}

#[test]
fn matmul_rejects_mismatched_operands() {
    let registry = registry();
    let context = CreationContext::default();
    let inner = node(
        "MatMul",
        vec![TensorSpec::f32([2, 3]), TensorSpec::f32([4, 2])],
        vec![TensorSpec::f32([2, 2])],
    );
    let err = instantiate(&registry, &context, inner).expect_err("inner dims differ");
    assert!(err.to_string().contains("inner dimensions"));

    let batches = node(
        "MatMul",
        vec![TensorSpec::f32([2, 2, 3]), TensorSpec::f32([3, 3, 2])],
        vec![TensorSpec::f32([2, 2, 2])],
    );
    let err = instantiate(&registry, &context, batches).expect_err("batch dims differ");
    assert!(err.to_string().contains("batch dimensions"));

    let vector = node(
        "MatMul",
        vec![TensorSpec::f32([3]), TensorSpec::f32([3, 2])],
        vec![TensorSpec::f32([2])],
    );
    let err = instantiate(&registry, &context, vector).expect_err("rank 1 operand");
    assert!(matches!(err, PluginError::InvalidNode { .. }));
}

struct LstmCase {
    batch: usize,
    input: usize,
    hidden: usize,
}

impl LstmCase {
    fn input_specs(&self) -> Vec<TensorSpec> {
        let (b, i, h) = (self.batch, self.input, self.hidden);
        vec![
            TensorSpec::f32([b, i]),
            TensorSpec::f32([b, h]),
            TensorSpec::f32([b, h]),
            TensorSpec::f32([4 * h, i]),
            TensorSpec::f32([4 * h, h]),
            TensorSpec::f32([4 * h]),
        ]
    }

    fn state_spec(&self) -> TensorSpec {
        TensorSpec::f32([self.batch, self.hidden])
    }

    fn node(&self) -> GraphNode {
        let state = self.state_spec();
        let cell = node("LSTMCell", self.input_specs(), vec![state.clone(), state]);
        with_attr(cell, "hidden_size", self.hidden as i64)
    }

    /// Straightforward per-unit evaluation with sigmoid/tanh/tanh.
    fn reference(&self, inputs: &[Vec<f32>], clip: f32) -> (Vec<f32>, Vec<f32>) {
        let (batch, input, hidden) = (self.batch, self.input, self.hidden);
        let [x, h, c, w, r, bias] = inputs else {
            panic!("six inputs");
        };
        let clipped = |v: f32| if clip > 0.0 { v.clamp(-clip, clip) } else { v };
        let gate = |b: usize, unit: usize| {
            let mut acc = bias[unit];
            for i in 0..input {
                acc += x[b * input + i] * w[unit * input + i];
            }
            for j in 0..hidden {
                acc += h[b * hidden + j] * r[unit * hidden + j];
            }
            clipped(acc)
        };
        let mut h_next = Vec::new();
        let mut c_next = Vec::new();
        for b in 0..batch {
            for j in 0..hidden {
                let f = sigmoid(gate(b, j));
                let i = sigmoid(gate(b, hidden + j));
                let g = gate(b, 2 * hidden + j).tanh();
                let o = sigmoid(gate(b, 3 * hidden + j));
                let ct = f * c[b * hidden + j] + i * g;
                c_next.push(ct);
                h_next.push(o * ct.tanh());
            }
        }
        (h_next, c_next)
    }
}

#[test]
fn lstm_cell_matches_reference_step() {
    let registry = registry();
    let case = LstmCase {
        batch: 2,
        input: 3,
        hidden: 4,
    };
    let inputs: Vec<Vec<f32>> = case
        .input_specs()
        .iter()
        .enumerate()
        .map(|(seed, spec)| random_values(100 + seed as u64, spec.element_count()))
        .collect();
    let refs: Vec<&[f32]> = inputs.iter().map(Vec::as_slice).collect();
    let state = case.state_spec();

    for clip in [0.0f32, 0.3] {
        let mut cell = case.node();
        if clip > 0.0 {
            cell = with_attr(cell, "clip", f64::from(clip));
        }
        let op = instantiate(&registry, &CreationContext::default(), cell).expect("lstm cell");
        let lstm = op.downcast_ref::<LstmCellOp>().expect("LstmCellOp");
        assert_eq!(lstm.hidden_size(), 4);
        assert_eq!(lstm.clip(), clip);
        assert_eq!(op.workbuffer_request().mutable_sizes, vec![2 * 16 * 4]);

        let runner = OperationRunner::new(op.as_ref()).expect("runner");
        let outputs = runner
            .run(&refs, &[state.clone(), state.clone()])
            .expect("execute");
        let (h_expected, c_expected) = case.reference(&inputs, clip);
        assert_close(&outputs[0], &h_expected);
        assert_close(&outputs[1], &c_expected);
        assert_eq!(runner.context().stream().launch_count(), 2);
    }
}

#[test]
fn lstm_cell_stores_half_precision() {
    let registry = registry();
    let case = LstmCase {
        batch: 1,
        input: 2,
        hidden: 3,
    };
    let half = |spec: TensorSpec| TensorSpec::new(DType::F16, spec.shape);
    let mut cell = case.node();
    cell.inputs = cell.inputs.into_iter().map(half).collect();
    cell.outputs = cell.outputs.into_iter().map(half).collect();
    let output_specs = cell.outputs.clone();

    let op = instantiate(&registry, &CreationContext::default(), cell).expect("f16 lstm cell");
    let lstm = op.downcast_ref::<LstmCellOp>().expect("LstmCellOp");
    assert_eq!(lstm.dtype(), DType::F16);
    // Gates stay f32 in the scratch buffer.
    assert_eq!(op.workbuffer_request().mutable_sizes, vec![12 * 4]);

    let inputs: Vec<Vec<f32>> = case
        .input_specs()
        .iter()
        .enumerate()
        .map(|(seed, spec)| random_values(200 + seed as u64, spec.element_count()))
        .collect();
    let refs: Vec<&[f32]> = inputs.iter().map(Vec::as_slice).collect();
    let outputs = OperationRunner::new(op.as_ref())
        .and_then(|runner| runner.run_as(DType::F16, &refs, &output_specs))
        .expect("execute");
    let (h_expected, c_expected) = case.reference(&inputs, 0.0);
    assert_close_with(&outputs[0], &h_expected, F16_ATOL, F16_RTOL);
    assert_close_with(&outputs[1], &c_expected, F16_ATOL, F16_RTOL);
}

#[test]
fn lstm_cell_validates_attributes() {
    let registry = registry();
    let context = CreationContext::default();
    let case = LstmCase {
        batch: 1,
        input: 2,
        hidden: 3,
    };

    let wrong_size = with_attr(case.node(), "hidden_size", 5i64);
    let err = instantiate(&registry, &context, wrong_size).expect_err("hidden size mismatch");
    assert!(err.to_string().contains("hidden_size"));

    let bad_activation = with_attr(case.node(), "activations", vec!["sigmoid", "gelu", "tanh"]);
    let err = instantiate(&registry, &context, bad_activation).expect_err("unknown activation");
    assert!(err.to_string().contains("gelu"));

    let short = with_attr(case.node(), "activations", vec!["sigmoid", "tanh"]);
    let err = instantiate(&registry, &context, short).expect_err("two activations");
    assert!(matches!(err, PluginError::InvalidNode { .. }));

    let mut bad_weights = case.node();
    bad_weights.inputs[3] = TensorSpec::f32([3, 2]);
    let err = instantiate(&registry, &context, bad_weights).expect_err("W must be [4Hs, I]");
    assert!(err.to_string().contains("input 3"));
}
