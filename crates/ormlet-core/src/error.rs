//! Error types for ormlet operations.

use crate::value::Value;
use std::fmt;

/// The primary error type for all ormlet operations.
#[derive(Debug)]
pub enum Error {
    /// Illegal query composition, detected before any I/O
    Validation(ValidationError),
    /// Change-tracker misuse (double add, removing an untracked record, ...)
    InvalidOperation(InvalidOperationError),
    /// Routine call does not match the declared signature
    Signature(SignatureError),
    /// Connectivity loss or timeout reported by the store adapter
    Transient(TransientStoreError),
    /// Write rejected by the store
    Constraint(ConstraintViolationError),
    /// Type conversion errors
    Type(TypeError),
    /// Invalid schema definition or unknown schema
    Schema(SchemaError),
    /// The owning session was closed while the operation was in flight
    Cancelled,
    /// Custom error with message
    Custom(String),
}

/// Illegal query composition.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Schema the offending query is built over
    pub schema: String,
    /// Offending path or expression, if one can be named
    pub path: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Field does not exist on the schema
    UnknownField,
    /// Relation does not exist on the schema
    UnknownRelation,
    /// Join alias was never declared (or declared twice)
    UnknownAlias,
    /// Joined or aggregated schema is not registered
    UnknownSchema,
    /// Per-element reference into a to-many relation
    CollectionElement,
    /// Boolean used as a value or a value used as a predicate
    ExpressionKind,
    /// Enumeration does not fit the query shape
    Shape,
}

#[derive(Debug, Clone)]
pub struct InvalidOperationError {
    pub kind: InvalidOperationKind,
    pub schema: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidOperationKind {
    /// Record is already tracked
    AlreadyTracked,
    /// Record is not tracked by this session
    NotTracked,
    /// Record belongs to another session
    ForeignSession,
    /// Record has no primary key value
    MissingKey,
    /// Another instance with the same key is tracked
    IdentityConflict,
    /// Primary key of a persisted record cannot change
    KeyChange,
    /// Record is marked for removal
    Removed,
}

#[derive(Debug, Clone)]
pub struct SignatureError {
    pub routine: String,
    /// Zero-based parameter position, when the mismatch concerns one parameter
    pub position: Option<usize>,
    pub message: String,
}

#[derive(Debug)]
pub struct TransientStoreError {
    pub kind: TransientErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientErrorKind {
    /// Operation exceeded the adapter's deadline
    Timeout,
    /// Connection lost during operation
    Disconnected,
    /// Store temporarily refused the work
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct ConstraintViolationError {
    pub kind: ConstraintKind,
    /// Schema the rejected write targeted
    pub schema: String,
    /// Key of the rejected row, as (column, value) pairs
    pub key: Vec<(String, Value)>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    NotNull,
    /// Update or delete matched no row
    RowMissing,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Schema name not registered
    NotFound,
    /// Field or relation not present on the schema
    ColumnNotFound,
    /// Invalid schema definition
    Invalid,
}

impl ValidationError {
    pub fn new(
        kind: ValidationErrorKind,
        schema: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            schema: schema.into(),
            path: None,
            message: message.into(),
        }
    }

    /// Attach the offending path.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl InvalidOperationError {
    pub fn new(
        kind: InvalidOperationKind,
        schema: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            schema: schema.into(),
            message: message.into(),
        }
    }
}

impl TransientStoreError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransientErrorKind::Timeout,
            message: message.into(),
            source: None,
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            kind: TransientErrorKind::Disconnected,
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Can the caller retry the whole unit of work on a fresh session?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Is this a programmer error that retrying can never fix?
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::InvalidOperation(_) | Error::Signature(_)
        )
    }

    /// Shorthand for an unknown schema name.
    pub fn unknown_schema(name: &str) -> Self {
        Error::Schema(SchemaError {
            kind: SchemaErrorKind::NotFound,
            message: format!("schema '{name}' is not registered"),
        })
    }

    /// Shorthand for an invalid schema definition.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind: SchemaErrorKind::Invalid,
            message: message.into(),
        })
    }

    /// Shorthand for a missing field or relation on a known schema.
    pub fn unknown_column(schema: &str, name: &str) -> Self {
        Error::Schema(SchemaError {
            kind: SchemaErrorKind::ColumnNotFound,
            message: format!("'{name}' is not a field or relation of '{schema}'"),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            Error::Signature(e) => write!(f, "Signature error: {}", e),
            Error::Transient(e) => write!(f, "Transient store error: {}", e),
            Error::Constraint(e) => write!(f, "Constraint violation: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transient(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} (query over '{}', at '{}')", self.message, self.schema, path),
            None => write!(f, "{} (query over '{}')", self.message, self.schema),
        }
    }
}

impl fmt::Display for InvalidOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ('{}')", self.message, self.schema)
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(
                f,
                "routine '{}', parameter {}: {}",
                self.routine, pos, self.message
            ),
            None => write!(f, "routine '{}': {}", self.routine, self.message),
        }
    }
}

impl fmt::Display for TransientStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConstraintViolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on '{}'", self.message, self.schema)?;
        if !self.key.is_empty() {
            let parts: Vec<String> = self
                .key
                .iter()
                .map(|(column, value)| format!("{column}={value}"))
                .collect();
            write!(f, " [{}]", parts.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<InvalidOperationError> for Error {
    fn from(err: InvalidOperationError) -> Self {
        Error::InvalidOperation(err)
    }
}

impl From<SignatureError> for Error {
    fn from(err: SignatureError) -> Self {
        Error::Signature(err)
    }
}

impl From<TransientStoreError> for Error {
    fn from(err: TransientStoreError) -> Self {
        Error::Transient(err)
    }
}

impl From<ConstraintViolationError> for Error {
    fn from(err: ConstraintViolationError) -> Self {
        Error::Constraint(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

/// Result type alias for ormlet operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        let timeout = Error::Transient(TransientStoreError::timeout("fetch exceeded 30s"));
        assert!(timeout.is_retryable());
        assert!(!timeout.is_structural());

        let constraint = Error::Constraint(ConstraintViolationError {
            kind: ConstraintKind::Unique,
            schema: "shippers".to_string(),
            key: vec![("shipper_id".to_string(), Value::Int(4))],
            message: "duplicate company name".to_string(),
        });
        assert!(!constraint.is_retryable());
        assert!(!constraint.is_structural());

        let validation = Error::Validation(ValidationError::new(
            ValidationErrorKind::CollectionElement,
            "regions",
            "per-element filter",
        ));
        assert!(validation.is_structural());
        assert!(!validation.is_retryable());
    }

    #[test]
    fn constraint_display_carries_schema_and_key() {
        let err = Error::Constraint(ConstraintViolationError {
            kind: ConstraintKind::PrimaryKey,
            schema: "shippers".to_string(),
            key: vec![("shipper_id".to_string(), Value::Int(1))],
            message: "duplicate primary key".to_string(),
        });
        let text = err.to_string();
        assert!(text.contains("shippers"));
        assert!(text.contains("shipper_id=1"));
    }

    #[test]
    fn validation_display_names_path() {
        let err = ValidationError::new(
            ValidationErrorKind::UnknownField,
            "products",
            "unknown field",
        )
        .at("unit_cost");
        assert_eq!(
            err.to_string(),
            "unknown field (query over 'products', at 'unit_cost')"
        );
    }
}
