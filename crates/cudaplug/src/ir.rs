//! Minimal IR node model consumed by the operation registry.
//!
//! Host engines expose their own node objects through the [`Node`] trait; the registry only
//! needs the declared opcode. [`Graph`] and [`GraphNode`] provide a concrete, serializable
//! graph for the translation pass and for tests.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::tensor::{DType, TensorSpec};

pub const PARAMETER_OPCODE: &str = "Parameter";
pub const CONSTANT_OPCODE: &str = "Constant";
pub const RESULT_OPCODE: &str = "Result";

/// Declared type of an IR node. `name` is the opcode used as the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: Cow<'static, str>,
    #[serde(default)]
    pub version: u64,
}

impl TypeInfo {
    pub const fn new(name: &'static str, version: u64) -> Self {
        Self {
            name: Cow::Borrowed(name),
            version,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Node attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strs(Vec<String>),
}

impl Attribute {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer attributes are accepted as floats since serialized graphs do not keep `1.0`
    /// apart from `1`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Attribute::Float(value) => Some(*value as f32),
            Attribute::Int(value) => Some(*value as f32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_strs(&self) -> Option<&[String]> {
        match self {
            Attribute::Strs(values) => Some(values),
            _ => None,
        }
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Attribute::Bool(value)
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Int(value)
    }
}

impl From<f32> for Attribute {
    fn from(value: f32) -> Self {
        Attribute::Float(value as f64)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Attribute::Float(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::Str(value.to_string())
    }
}

impl From<Vec<&str>> for Attribute {
    fn from(values: Vec<&str>) -> Self {
        Attribute::Strs(values.into_iter().map(str::to_string).collect())
    }
}

/// Dense f32 tensor attached to a constant node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantTensor {
    pub spec: TensorSpec,
    pub values: Vec<f32>,
}

impl ConstantTensor {
    pub fn new(spec: TensorSpec, values: Vec<f32>) -> PluginResult<Self> {
        let constant = Self { spec, values };
        constant.validate()?;
        Ok(constant)
    }

    pub fn f32(dims: impl Into<Vec<usize>>, values: Vec<f32>) -> PluginResult<Self> {
        Self::new(TensorSpec::f32(dims), values)
    }

    pub fn validate(&self) -> PluginResult<()> {
        if self.spec.dtype != DType::F32 {
            return Err(PluginError::unsupported(
                CONSTANT_OPCODE,
                format!("constant payloads are f32, got {:?}", self.spec.dtype),
            ));
        }
        if self.values.len() != self.spec.element_count() {
            return Err(PluginError::invalid_node(
                CONSTANT_OPCODE,
                format!(
                    "constant holds {} values but spec {} needs {}",
                    self.values.len(),
                    self.spec,
                    self.spec.element_count()
                ),
            ));
        }
        Ok(())
    }
}

/// IR node abstraction owned by the host graph library.
///
/// Only [`Node::type_info`] is required; structural accessors default to "nothing declared".
pub trait Node: Send + Sync + fmt::Debug {
    fn type_info(&self) -> &TypeInfo;

    fn friendly_name(&self) -> &str {
        self.type_info().name()
    }

    fn inputs(&self) -> &[TensorSpec] {
        &[]
    }

    fn outputs(&self) -> &[TensorSpec] {
        &[]
    }

    fn attribute(&self, _name: &str) -> Option<&Attribute> {
        None
    }

    fn constant(&self) -> Option<&ConstantTensor> {
        None
    }
}

/// Shared handle to an IR node. Factories may keep a clone.
pub type NodeRef = Arc<dyn Node>;

/// Output port of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: usize,
    pub port: usize,
}

/// Concrete node stored in a [`Graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub friendly_name: String,
    pub type_info: TypeInfo,
    #[serde(default)]
    pub sources: Vec<OutputRef>,
    #[serde(default)]
    pub inputs: Vec<TensorSpec>,
    #[serde(default)]
    pub outputs: Vec<TensorSpec>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<ConstantTensor>,
}

impl GraphNode {
    pub fn new(type_info: TypeInfo, friendly_name: impl Into<String>) -> Self {
        Self {
            friendly_name: friendly_name.into(),
            type_info,
            sources: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: BTreeMap::new(),
            constant: None,
        }
    }
}

impl Node for GraphNode {
    fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    fn constant(&self) -> Option<&ConstantTensor> {
        self.constant.as_ref()
    }
}

/// Network graph whose nodes are stored in topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Arc<GraphNode>>,
}

impl Graph {
    pub fn nodes(&self) -> &[Arc<GraphNode>] {
        &self.nodes
    }

    pub fn from_json_str(json: &str) -> PluginResult<Self> {
        let graph: Graph = serde_json::from_str(json).map_err(|err| {
            PluginError::invalid_node("<graph>", format!("malformed graph json: {err}"))
        })?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json_str(&json)?)
    }

    /// Pretty JSON form of the graph. A failure is reported against the graph's name.
    pub fn to_json_string(&self) -> PluginResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| {
            PluginError::invalid_node(&self.name, format!("cannot serialize graph: {err}"))
        })
    }

    /// Checks that every input refers to an earlier node's existing output port and that
    /// recorded input specs match the producer's output spec.
    pub fn validate(&self) -> PluginResult<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.sources.len() != node.inputs.len() {
                return Err(PluginError::invalid_node(
                    &node.friendly_name,
                    format!(
                        "{} input sources but {} input specs",
                        node.sources.len(),
                        node.inputs.len()
                    ),
                ));
            }
            for (source, spec) in node.sources.iter().zip(&node.inputs) {
                if source.node >= index {
                    return Err(PluginError::invalid_node(
                        &node.friendly_name,
                        format!(
                            "input from node {} breaks topological order at node {index}",
                            source.node
                        ),
                    ));
                }
                let produced = self.nodes[source.node]
                    .outputs
                    .get(source.port)
                    .ok_or_else(|| {
                        PluginError::invalid_node(
                            &node.friendly_name,
                            format!(
                                "node {} has no output port {}",
                                source.node, source.port
                            ),
                        )
                    })?;
                if produced != spec {
                    return Err(PluginError::invalid_node(
                        &node.friendly_name,
                        format!("input spec {spec} does not match producer output {produced}"),
                    ));
                }
            }
            if let Some(constant) = &node.constant {
                constant.validate()?;
            }
        }
        Ok(())
    }
}

/// Incrementally assembles a topologically ordered [`Graph`].
#[derive(Debug)]
pub struct GraphBuilder {
    name: String,
    nodes: Vec<Arc<GraphNode>>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn parameter(&mut self, name: impl Into<String>, spec: TensorSpec) -> OutputRef {
        let mut node = GraphNode::new(TypeInfo::new(PARAMETER_OPCODE, 0), name);
        node.outputs.push(spec);
        self.push(node)
    }

    pub fn constant(&mut self, name: impl Into<String>, constant: ConstantTensor) -> OutputRef {
        let mut node = GraphNode::new(TypeInfo::new(CONSTANT_OPCODE, 0), name);
        node.outputs.push(constant.spec.clone());
        node.constant = Some(constant);
        self.push(node)
    }

    pub fn result(&mut self, name: impl Into<String>, source: OutputRef) -> PluginResult<()> {
        self.node(RESULT_OPCODE).named(name).input(source).finish()?;
        Ok(())
    }

    /// Starts a node declaring `opcode`. The node is appended by [`NodeDraft::finish`].
    pub fn node(&mut self, opcode: impl Into<String>) -> NodeDraft<'_> {
        let opcode = opcode.into();
        let name = format!("{}_{}", opcode, self.nodes.len());
        NodeDraft {
            node: GraphNode::new(TypeInfo::named(opcode), name),
            graph: self,
        }
    }

    pub fn build(self) -> Graph {
        Graph {
            name: self.name,
            nodes: self.nodes,
        }
    }

    fn output_spec(&self, source: OutputRef) -> Option<&TensorSpec> {
        self.nodes.get(source.node)?.outputs.get(source.port)
    }

    fn push(&mut self, node: GraphNode) -> OutputRef {
        let index = self.nodes.len();
        self.nodes.push(Arc::new(node));
        OutputRef {
            node: index,
            port: 0,
        }
    }
}

/// Node under construction inside a [`GraphBuilder`].
#[derive(Debug)]
pub struct NodeDraft<'g> {
    graph: &'g mut GraphBuilder,
    node: GraphNode,
}

impl NodeDraft<'_> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.node.friendly_name = name.into();
        self
    }

    pub fn input(mut self, source: OutputRef) -> Self {
        self.node.sources.push(source);
        self
    }

    pub fn inputs(mut self, sources: impl IntoIterator<Item = OutputRef>) -> Self {
        self.node.sources.extend(sources);
        self
    }

    pub fn output(mut self, spec: TensorSpec) -> Self {
        self.node.outputs.push(spec);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Attribute>) -> Self {
        self.node.attributes.insert(name.into(), value.into());
        self
    }

    /// Appends the node and returns one reference per declared output.
    pub fn finish(self) -> PluginResult<Vec<OutputRef>> {
        let NodeDraft { graph, mut node } = self;
        let mut inputs = Vec::with_capacity(node.sources.len());
        for source in &node.sources {
            let spec = graph.output_spec(*source).ok_or_else(|| {
                PluginError::invalid_node(
                    &node.friendly_name,
                    format!("unknown input source {}:{}", source.node, source.port),
                )
            })?;
            inputs.push(spec.clone());
        }
        node.inputs = inputs;
        let output_count = node.outputs.len();
        let index = graph.nodes.len();
        graph.nodes.push(Arc::new(node));
        Ok((0..output_count)
            .map(|port| OutputRef { node: index, port })
            .collect())
    }

    pub fn finish_single(self) -> PluginResult<OutputRef> {
        let count = self.node.outputs.len();
        if count != 1 {
            return Err(PluginError::invalid_node(
                &self.node.friendly_name,
                format!("expected a single output, node declares {count}"),
            ));
        }
        let outputs = self.finish()?;
        Ok(outputs[0])
    }
}
