//! Error types shared by the convergence engine and resource adapters

use std::fmt;
use thiserror::Error;

/// How a provider error should be handled.
///
/// Classification is done by whoever talks to the provider (usually from the
/// provider's error code); the engine only ever looks at the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The remote object does not exist
    NotFound,
    /// Blocked by another object (e.g. `DependencyViolation`); retrying won't help
    Conflict,
    /// Anything else the provider reported with a code; assumed transient
    Retryable,
    /// Not a provider response at all (transport, decoding, ...)
    Unclassified,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::NotFound => write!(f, "not-found"),
            ErrorClass::Conflict => write!(f, "conflict"),
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// An error reported by the remote network API, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub class: ErrorClass,
    /// Provider error code, e.g. `InvalidVpcID.NotFound`. `None` for unclassified errors.
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(class: ErrorClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotFound, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, code, message)
    }

    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Retryable, code, message)
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Unclassified,
            code: None,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class == ErrorClass::NotFound
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

fn or_none(state: &Option<String>) -> &str {
    state.as_deref().unwrap_or("none")
}

/// Operation an adapter was performing when an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Read => write!(f, "read"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(ProviderError),

    #[error(
        "Timeout after {elapsed_secs}s waiting for '{target}' (last state: {})",
        or_none(.last_state)
    )]
    Timeout {
        target: String,
        elapsed_secs: u64,
        last_state: Option<String>,
        last_object: Option<serde_json::Value>,
        #[source]
        last_error: Option<ProviderError>,
    },

    #[error("Unexpected state '{state}' while waiting for '{target}' (pending: {pending:?})")]
    UnexpectedState {
        state: String,
        target: String,
        pending: Vec<String>,
    },

    #[error("Unclassified provider error: {0}")]
    Unclassified(ProviderError),

    #[error("Cancelled while waiting for '{target}'")]
    Cancelled { target: String },

    #[error("API error: {0}")]
    Provider(#[from] ProviderError),

    #[error("{operation} {resource_type} {resource_id}: {source}")]
    Operation {
        operation: Operation,
        resource_type: &'static str,
        resource_id: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Annotates the error with the adapter operation and resource id.
    pub fn in_operation(
        self,
        operation: Operation,
        resource_type: &'static str,
        resource_id: impl Into<String>,
    ) -> Self {
        CloudError::Operation {
            operation,
            resource_type,
            resource_id: resource_id.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error, looking through operation annotations
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self.root() {
            CloudError::NotFound(_) => true,
            CloudError::Provider(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), CloudError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Extension for annotating results at the adapter boundary
pub trait ResultExt<T> {
    fn in_operation(
        self,
        operation: Operation,
        resource_type: &'static str,
        resource_id: &str,
    ) -> Result<T>;
}

impl<T, E: Into<CloudError>> ResultExt<T> for std::result::Result<T, E> {
    fn in_operation(
        self,
        operation: Operation,
        resource_type: &'static str,
        resource_id: &str,
    ) -> Result<T> {
        self.map_err(|e| CloudError::in_operation(e.into(), operation, resource_type, resource_id))
    }
}
