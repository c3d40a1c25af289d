//! Error types for row and entity operations.

use std::fmt;

/// The primary error type for all RowModel operations.
#[derive(Debug)]
pub enum Error {
    /// Row-level contract violations (relations, identity, reload)
    Row(RowError),
    /// Errors raised by an entity's persistence primitives
    Storage(StorageError),
    /// Type conversion errors
    Type(TypeError),
    /// Custom error with message
    Custom(String),
}

/// A failure detected by the row itself before or instead of touching storage.
#[derive(Debug)]
pub struct RowError {
    pub kind: RowErrorKind,
    /// Name of the entity owning the row that raised the error
    pub entity: String,
    /// The relation, method or target entity involved, if any
    pub target: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowErrorKind {
    /// A dynamic accessor named neither a field, a getter nor a related entity
    UnknownRelation,
    /// The other row's entity is not in a has-one relation with this one
    InvalidRelation,
    /// The other row has no persisted identity to reference
    MissingIdentity,
    /// The row has no identity, or its identity no longer resolves in storage
    NotPersisted,
}

#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub entity: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// A record with the same identity already exists
    Duplicate,
    /// No record matched the scope
    NotFound,
    /// A declared constraint was violated
    Constraint,
    /// Any other backend failure
    Backend,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub field: Option<String>,
}

impl RowError {
    pub fn new(kind: RowErrorKind, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity: entity.into(),
            target: None,
            message: message.into(),
        }
    }

    /// Attach the relation, method or entity the error is about.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl StorageError {
    pub fn new(
        kind: StorageErrorKind,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entity: entity.into(),
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Is this a row error of the given kind?
    pub fn is_row_error(&self, kind: RowErrorKind) -> bool {
        matches!(self, Error::Row(e) if e.kind == kind)
    }

    /// Did this error originate in an entity's persistence primitives?
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// The row error kind, if this is a row error.
    pub fn row_kind(&self) -> Option<RowErrorKind> {
        match self {
            Error::Row(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The storage error kind, if this is a storage error.
    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            Error::Storage(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl RowErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownRelation => "unknown relation",
            Self::InvalidRelation => "invalid relation",
            Self::MissingIdentity => "missing identity",
            Self::NotPersisted => "not persisted",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Row(e) => write!(f, "Row error: {}", e),
            Error::Storage(e) => write!(f, "Storage error in '{}': {}", e.entity, e.message),
            Error::Type(e) => {
                if let Some(field) = &e.field {
                    write!(
                        f,
                        "Type error in field '{}': expected {}, found {}",
                        field, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(
                f,
                "{} ({} -> {}): {}",
                self.kind.as_str(),
                self.entity,
                target,
                self.message
            ),
            None => write!(f, "{} ({}): {}", self.kind.as_str(), self.entity, self.message),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(
                f,
                "expected {} for field '{}', found {}",
                self.expected, field, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<RowError> for Error {
    fn from(err: RowError) -> Self {
        Error::Row(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for RowModel operations.
pub type Result<T> = std::result::Result<T, Error>;
