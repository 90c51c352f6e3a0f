use thiserror::Error;

/// Errors raised by registration, operation construction and execution.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The same opcode was registered twice. Initialization must abort.
    #[error("operation `{op}` is already registered")]
    DuplicateRegistration { op: String },

    /// No factory is registered for the opcode.
    #[error("operation `{op}` is not registered")]
    UnknownOperation { op: String },

    /// Translating a network stopped at `node`.
    #[error("cannot translate network `{network}`: node `{node}` failed")]
    Translation {
        network: String,
        node: String,
        #[source]
        source: Box<PluginError>,
    },

    #[error("invalid node `{node}`: {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("{op} is not supported: {reason}")]
    Unsupported { op: String, reason: String },

    #[error("execution failure: {message}")]
    Execution { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl PluginError {
    pub fn invalid_node(node: impl Into<String>, reason: impl Into<String>) -> Self {
        PluginError::InvalidNode {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(op: impl Into<String>, reason: impl Into<String>) -> Self {
        PluginError::Unsupported {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        PluginError::Execution {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PluginError::Config {
            message: message.into(),
        }
    }

    /// Returns `true` when the error, or the error a translation failure wraps, is an
    /// unknown-opcode lookup failure.
    pub fn is_unknown_operation(&self) -> bool {
        match self {
            PluginError::UnknownOperation { .. } => true,
            PluginError::Translation { source, .. } => source.is_unknown_operation(),
            _ => false,
        }
    }
}

/// Convenience alias for results returned by plugin routines.
pub type PluginResult<T> = Result<T, PluginError>;
