//! Error taxonomy for collaborator calls.

use std::fmt;

pub type SourceResult<T> = Result<T, SourceError>;

/// Where a collaborator call failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref entity) = self.entity {
            parts.push(format!("entity={}", entity));
        }
        if let Some(ref id) = self.entity_id {
            parts.push(format!("id={}", id));
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("connection error: {message} {context}")]
    Connection { message: String, context: ErrorContext },

    #[error("query error: {message} {context}")]
    Query { message: String, context: ErrorContext },

    #[error("not found: {message} {context}")]
    NotFound { message: String, context: ErrorContext },

    #[error("timed out after {elapsed_ms}ms {context}")]
    Timeout { elapsed_ms: u64, context: ErrorContext },

    #[error("conflict: {message} {context}")]
    Conflict { message: String, context: ErrorContext },
}

impl SourceError {
    pub fn connection(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Connection { message: message.into(), context }
    }

    pub fn query(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Query { message: message.into(), context }
    }

    pub fn not_found(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::NotFound { message: message.into(), context }
    }

    pub fn conflict(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Conflict { message: message.into(), context }
    }

    pub fn timeout(elapsed_ms: u64, context: ErrorContext) -> Self {
        Self::Timeout { elapsed_ms, context }
    }

    /// Transient failures a caller may retry on its next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}
