//! Shared harness for operation tests: a single-operation runner, a sequential network
//! executor over translated graphs and seeded input generation.

mod network;
mod runner;

use std::num::TryFromIntError;
use std::sync::Arc;

use cudaplug::{
    CreationContext, GraphNode, NodeRef, Operation, OperationRegistry, PluginError,
    PluginResult, TensorId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use network::{run_network, NetworkRunner};
pub use runner::OperationRunner;

pub const ATOL: f32 = 1e-5;
pub const RTOL: f32 = 1e-4;

/// Tolerances for half precision storage, where each load and store rounds to 11 bits.
pub const F16_ATOL: f32 = 1e-2;
pub const F16_RTOL: f32 = 1e-2;

/// Builds `node` through `registry`, numbering inputs from 0 and outputs after them.
pub fn instantiate(
    registry: &OperationRegistry,
    context: &CreationContext,
    node: GraphNode,
) -> PluginResult<Box<dyn Operation>> {
    let inputs = node.inputs.len();
    let outputs = node.outputs.len();
    let overflow = |_: TryFromIntError| {
        PluginError::invalid_node(&node.friendly_name, "tensor count overflows u32 ids")
    };
    let input_ids = (0..inputs)
        .map(TensorId::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(overflow)?;
    let output_ids = (inputs..inputs + outputs)
        .map(TensorId::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(overflow)?;
    let node: NodeRef = Arc::new(node);
    registry.create_operation(context, &node, input_ids, output_ids)
}

/// Deterministic values in `[-1, 1)`.
pub fn random_values(seed: u64, len: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Panics with the first index where `actual` and `expected` disagree beyond tolerance.
#[track_caller]
pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_close_with(actual, expected, ATOL, RTOL);
}

/// [`assert_close`] with explicit tolerances.
#[track_caller]
pub fn assert_close_with(actual: &[f32], expected: &[f32], atol: f32, rtol: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "length mismatch: got {}, expected {}",
        actual.len(),
        expected.len()
    );
    for (index, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let tolerance = atol + rtol * e.abs();
        assert!(
            (a - e).abs() <= tolerance,
            "value {index}: got {a}, expected {e} (tolerance {tolerance})"
        );
    }
}
