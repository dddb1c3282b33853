use serde::{Deserialize, Serialize};

/// Classification of an engine failure. Kinds are closed and coarse:
/// callers branch on the kind, humans read the message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed validation before touching storage.
    Validation,
    /// A schema or entity does not exist.
    NotFound,
    /// A declared relation points at a missing parent.
    Reference,
    /// A storage transaction failed to commit.
    Transaction,
    /// A query could not be built or compiled.
    Query,
    /// A storage engine rejected or failed a statement at runtime.
    Execution,
    /// An operation exceeded its deadline.
    Timeout,
    /// Anything not classified above.
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "E_VALIDATION",
            ErrorKind::NotFound => "E_NOT_FOUND",
            ErrorKind::Reference => "E_REFERENCE",
            ErrorKind::Transaction => "E_TRANSACTION",
            ErrorKind::Query => "E_QUERY",
            ErrorKind::Execution => "E_EXECUTION",
            ErrorKind::Timeout => "E_TIMEOUT",
            ErrorKind::Internal => "E_INTERNAL",
        }
    }
}

/// Error is the single error type flowing through the engine.
/// It pairs a kind with a human message and optional structured context
/// (entity, operation, field, details) attached as it propagates upward.
#[derive(thiserror::Error, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    entity: Option<String>,
    operation: Option<&'static str>,
    field: Option<String>,
    details: Option<serde_json::Value>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entity: None,
            operation: None,
            field: None,
            details: None,
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Name the entity (schema or record) this error concerns.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Name the operation that was executing when the error surfaced.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Name the offending input field or attribute.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Attach free-form structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }
    pub fn operation(&self) -> Option<&'static str> {
        self.operation
    }
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)?;
        if let Some(op) = self.operation {
            write!(f, " (operation {op})")?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " (entity {entity})")?;
        }
        if let Some(field) = &self.field {
            write!(f, " (field {field})")?;
        }
        Ok(())
    }
}
