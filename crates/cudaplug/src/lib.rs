//! Operation registry and execution contract for a GPU inference backend plugin.
//!
//! The host engine hands IR nodes to [`translate`], which asks an
//! [`OperationRegistry`] to build one executable [`Operation`] per node. Operation
//! implementations join the registry through the [`register_operation!`] macro.

extern crate self as cudaplug;

pub use linkme;

pub mod config;
pub mod context;
mod env;
pub mod error;
pub mod ir;
pub mod memory;
pub mod operation;
pub mod registry;
pub mod tensor;
pub mod translate;

pub use config::PluginConfig;
pub use context::{CreationContext, Device, Stream, ThreadContext};
pub use error::{PluginError, PluginResult};
pub use ir::{Attribute, ConstantTensor, Graph, GraphBuilder, GraphNode, Node, NodeRef, TypeInfo};
pub use memory::{DeviceBuffer, WorkbufferRequest, Workbuffers};
pub use operation::{FromNode, Operation, OperationBase};
pub use registry::{OperationBuilder, OperationRegistrar, OperationRegistry};
pub use tensor::{DType, Shape, TensorId, TensorSpec};
pub use translate::{translate, TranslatedGraph};
