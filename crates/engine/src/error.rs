use thiserror::Error;
use xsltvm_output::OutputError;

/// Errors an [`Evaluator`](crate::Evaluator) reports for an expression or
/// pattern, plus the ones the evaluation context raises on its behalf.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("{0}")]
    Expression(String),

    #[error("Reference to unbound variable '{0}'")]
    UnboundVariable(String),

    #[error("Circular variable definition: {chain}")]
    CircularVariable { chain: String },

    #[error("Key '{name}' is used while its own index is being built")]
    CircularKey { name: String },

    #[error("Unknown key '{0}'")]
    UnknownKey(String),

    #[error("Evaluation returned a node from unknown tree {0}")]
    UnknownTree(usize),

    #[error("Out of memory during evaluation")]
    ResourceExhausted,
}

impl EvalError {
    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }
}

/// Terminal failures of a transformation.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Out of memory during transformation")]
    ResourceExhausted,

    #[error("Malformed output: {message}")]
    MalformedOutput { message: String },

    #[error("Error in instruction {instruction} of {program}: {message}")]
    Evaluation {
        instruction: usize,
        program: String,
        message: String,
    },

    #[error("Transformation terminated by message: {message}")]
    Terminated { message: String },

    #[error("Invalid compiled program: {0}")]
    Program(String),

    #[error("Maximum recursion depth of {depth} exceeded")]
    RecursionLimit { depth: usize },

    #[error("Circular variable definition: {chain}")]
    CircularVariable { chain: String },

    #[error("Key '{name}' is used while its own index is being built")]
    CircularKey { name: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation not valid in state {state}: {operation}")]
    InvalidState { state: String, operation: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    pub fn program(msg: impl Into<String>) -> Self {
        Self::Program(msg.into())
    }

    pub fn evaluation(
        instruction: usize,
        program: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Evaluation {
            instruction,
            program: program.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(state: impl ToString, operation: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.to_string(),
            operation: operation.into(),
        }
    }

    /// Allocation failures are reported separately so hosts can retry under
    /// different memory conditions.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::ResourceExhausted)
    }
}

impl From<OutputError> for TransformError {
    fn from(error: OutputError) -> Self {
        match error {
            OutputError::ResourceExhausted => Self::ResourceExhausted,
            OutputError::Malformed(message) => Self::MalformedOutput { message },
            OutputError::Io(io) => Self::Io(io),
        }
    }
}

impl From<std::collections::TryReserveError> for TransformError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::ResourceExhausted
    }
}

impl From<std::collections::TryReserveError> for EvalError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::ResourceExhausted
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(error.to_string())
    }
}
