use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("Importer error: {0}")]
    Importer(#[from] ImporterError),

    #[error("Restorer error: {0}")]
    Restorer(#[from] RestorerError),

    #[error("Merger error: {0}")]
    Merger(#[from] MergerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Failures while walking a live object graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectorError {
    #[error("root value is not an object (found {found})")]
    NotAnObject { found: String },

    #[error("object handle {0} is not present in the graph")]
    DanglingHandle(usize),

    #[error("field '{field}' of class '{class}' declared but not readable")]
    UnreadableField { class: String, field: String },
}

/// Failures while reading wire bytes back into a node tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImporterError {
    #[error("node type could not be determined at {address}")]
    UndeterminedNodeType { address: String },

    #[error("reference at {address} points to unknown element {target}")]
    UnresolvedReference { address: String, target: String },

    #[error("invalid {scalar} value '{value}' at {address}")]
    InvalidScalar {
        address: String,
        scalar: String,
        value: String,
    },

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Failures while rebuilding live objects from a node tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestorerError {
    #[error("node '{node}' carries no class metadata")]
    MissingClass { node: String },

    #[error("class '{class}' is not registered")]
    UnknownClass { class: String },

    #[error("object of class '{actual}' does not satisfy expected '{expected}'")]
    CapabilityMismatch { expected: String, actual: String },

    #[error("mandatory field '{field}' of node '{node}' could not be resolved")]
    MandatoryFieldUnresolved { field: String, node: String },

    #[error("reference to node {0} was never restored")]
    DanglingReference(u64),

    #[error("target object {0} is not present in the graph")]
    UnknownTarget(usize),

    #[error("cannot assign field '{field}' on '{class}': {reason}")]
    Field {
        class: String,
        field: String,
        reason: String,
    },
}

/// Failures raised by, or on behalf of, the external persistence store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergerError {
    #[error("store failed during {operation}: {message}")]
    Store {
        operation: String,
        message: String,
        code: Option<i32>,
    },

    #[error("object of class '{class}' at node '{node}' has no identity after merge")]
    MissingIdentity { class: String, node: String },
}

impl MergerError {
    pub fn store(operation: &str, message: impl Into<String>) -> Self {
        MergerError::Store {
            operation: operation.to_string(),
            message: message.into(),
            code: None,
        }
    }
}
