//! Reference operations for the cudaplug registry.
//!
//! Every module registers its opcodes at link time; [`registry`] collects them. Kernels run
//! on the reference stream and compute in f32.

mod activation;
mod constant;
mod elementwise;
mod kernels;
mod lstm_cell;
mod matmul;
mod nop;
mod saxpy;

use cudaplug::{OperationRegistry, PluginResult};

pub use activation::{ActivationKind, ActivationOp};
pub use constant::ConstantOp;
pub use elementwise::{BinaryKind, ElementwiseBinaryOp};
pub use lstm_cell::LstmCellOp;
pub use matmul::MatMulOp;
pub use nop::NopOp;
pub use saxpy::SaxpyOp;

/// Builds a registry holding every operation linked into the binary.
pub fn registry() -> PluginResult<OperationRegistry> {
    OperationRegistry::from_registrars()
}
