//! Opcode to factory registry.
//!
//! The registry is an ordinary value: build it once at startup, register every supported
//! opcode, then share it read-only (`&OperationRegistry` or `Arc<OperationRegistry>`) with the
//! translation pass. Registration takes `&mut self`, so no lookup can race with it.
//!
//! Operation modules announce themselves with [`register_operation!`], which places an
//! [`OperationRegistrar`] in the link-time [`OPERATION_REGISTRARS`] slice.
//! [`OperationRegistry::from_registrars`] walks that slice in opcode order.

use std::collections::HashMap;
use std::fmt;

use crate::context::CreationContext;
use crate::error::{PluginError, PluginResult};
use crate::ir::{Node, NodeRef};
use crate::operation::{FromNode, Operation};
use crate::tensor::TensorId;

/// Factory that turns an IR node plus tensor ids into an executable operation.
pub type OperationBuilder = Box<
    dyn Fn(&CreationContext, &NodeRef, Vec<TensorId>, Vec<TensorId>) -> PluginResult<Box<dyn Operation>>
        + Send
        + Sync,
>;

/// Plain function form of an [`OperationBuilder`], usable in statics.
pub type BuildFn =
    fn(&CreationContext, &NodeRef, Vec<TensorId>, Vec<TensorId>) -> PluginResult<Box<dyn Operation>>;

/// Link-time registration entry for one opcode.
pub struct OperationRegistrar {
    pub name: &'static str,
    pub build: BuildFn,
}

impl OperationRegistrar {
    /// Pairs an opcode with its build function; `const` so it can sit in a linked static.
    pub const fn new(name: &'static str, build: BuildFn) -> Self {
        Self { name, build }
    }
}

impl fmt::Debug for OperationRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistrar")
            .field("name", &self.name)
            .finish()
    }
}

#[linkme::distributed_slice]
pub static OPERATION_REGISTRARS: [OperationRegistrar] = [..];

/// Boxes the result of [`FromNode::from_node`]; the `build` target of generated registrars.
pub fn build_boxed<T: FromNode>(
    context: &CreationContext,
    node: &NodeRef,
    input_ids: Vec<TensorId>,
    output_ids: Vec<TensorId>,
) -> PluginResult<Box<dyn Operation>> {
    Ok(Box::new(T::from_node(context, node, input_ids, output_ids)?))
}

/// Registers `$op` (a [`FromNode`] type) under `$opcode` at link time.
///
/// ```ignore
/// cudaplug::register_operation!(REGISTER_SAXPY, "Saxpy" => SaxpyOp);
/// ```
#[macro_export]
macro_rules! register_operation {
    ($static_name:ident, $opcode:literal => $op:ty) => {
        #[$crate::linkme::distributed_slice($crate::registry::OPERATION_REGISTRARS)]
        #[linkme(crate = $crate::linkme)]
        static $static_name: $crate::registry::OperationRegistrar =
            $crate::registry::OperationRegistrar::new(
                $opcode,
                $crate::registry::build_boxed::<$op>,
            );
    };
}

/// Append-only mapping from opcode to operation factory.
#[derive(Default)]
pub struct OperationRegistry {
    builders: HashMap<String, OperationBuilder>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operation_names())
            .finish()
    }
}

impl OperationRegistry {
    /// Empty registry; nothing is registered until [`Self::register_op`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from every registrar linked into the binary.
    ///
    /// Entries are applied sorted by opcode so the outcome does not depend on link order. A
    /// duplicated opcode aborts with [`PluginError::DuplicateRegistration`].
    pub fn from_registrars() -> PluginResult<Self> {
        Self::from_registrar_list(&OPERATION_REGISTRARS)
    }

    /// [`Self::from_registrars`] over an explicit list instead of the linked slice.
    pub fn from_registrar_list(registrars: &[OperationRegistrar]) -> PluginResult<Self> {
        let mut ordered: Vec<&OperationRegistrar> = registrars.iter().collect();
        ordered.sort_by_key(|registrar| registrar.name);
        let mut registry = Self::new();
        for registrar in ordered {
            registry.register_op(registrar.name, registrar.build)?;
        }
        log::debug!(
            "operation registry initialized with {} operations",
            registry.len()
        );
        Ok(registry)
    }

    /// Inserts a factory for `name`. Fails if the opcode already has one; the existing factory
    /// is kept.
    pub fn register_op<F>(&mut self, name: impl Into<String>, builder: F) -> PluginResult<()>
    where
        F: Fn(&CreationContext, &NodeRef, Vec<TensorId>, Vec<TensorId>) -> PluginResult<Box<dyn Operation>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.has_operation(&name) {
            log::error!("operation `{name}` registered twice");
            return Err(PluginError::DuplicateRegistration { op: name });
        }
        log::debug!("registered operation `{name}`");
        self.builders.insert(name, Box::new(builder));
        Ok(())
    }

    /// Whether a factory is registered for the opcode `name`.
    pub fn has_operation(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Same as [`Self::has_operation`] keyed by the node's declared opcode.
    pub fn has_node_operation(&self, node: &dyn Node) -> bool {
        self.has_operation(node.type_info().name())
    }

    /// Builds the operation for `node`, handing the factory ownership of the id vectors.
    ///
    /// Fails with [`PluginError::UnknownOperation`] when the opcode has no factory.
    pub fn create_operation(
        &self,
        context: &CreationContext,
        node: &NodeRef,
        input_ids: Vec<TensorId>,
        output_ids: Vec<TensorId>,
    ) -> PluginResult<Box<dyn Operation>> {
        let opcode = node.type_info().name();
        let builder = self
            .builders
            .get(opcode)
            .ok_or_else(|| PluginError::UnknownOperation {
                op: opcode.to_string(),
            })?;
        builder(context, node, input_ids, output_ids)
    }

    /// Borrowed-id variant of [`Self::create_operation`]; the ids are copied so the factory
    /// always receives storage it may keep.
    pub fn create_operation_from_slices(
        &self,
        context: &CreationContext,
        node: &NodeRef,
        input_ids: &[TensorId],
        output_ids: &[TensorId],
    ) -> PluginResult<Box<dyn Operation>> {
        self.create_operation(context, node, input_ids.to_vec(), output_ids.to_vec())
    }

    /// Registered opcodes, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered opcodes.
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}
