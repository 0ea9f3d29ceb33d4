//! Error types and result aliases for Meridian.
//!
//! This module defines the shared error types used across all Meridian
//! components. Errors are structured for programmatic handling and include
//! context for debugging.
//!
//! Per-value coercion problems are not errors at this level: typed accessors
//! report them as [`ValueIssue`] entries inside their result, and only a
//! whole-row `validate()` promotes the accumulated issues to
//! [`Error::Validation`].

use std::fmt;

/// The result type used throughout Meridian.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Meridian operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A filesystem read failed for reasons other than absence.
    #[error("read error at {path}: {source}")]
    Io {
        /// The path that failed to read.
        path: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A metadata or row file did not match its expected format.
    #[error("invalid file contents at {path}: {message}")]
    InvalidFileContents {
        /// The offending file path.
        path: String,
        /// Description of what was malformed.
        message: String,
    },

    /// `schema.json`, `path-structure.json`, or a legend violated the
    /// schema contract.
    #[error("schema validation: {message}")]
    SchemaValidation {
        /// Description of the violation.
        message: String,
    },

    /// A typed accessor was used against a column of a different data type.
    ///
    /// This is a precondition violation by the caller, not a data problem.
    #[error("type mismatch on column {column}: schema says {expected}, accessor is {requested}")]
    TypeMismatch {
        /// The column that was accessed.
        column: String,
        /// The column's declared data type.
        expected: &'static str,
        /// The data type of the accessor that was called.
        requested: &'static str,
    },

    /// One or more row values failed schema validation.
    #[error("validation failed with {} issue(s)", issues.len())]
    Validation {
        /// The accumulated per-value issues.
        issues: Vec<ValueIssue>,
    },

    /// The change tracker and the baseline dataset disagree.
    #[error("inconsistent state: {message}")]
    InconsistentState {
        /// Description of the mismatch.
        message: String,
    },

    /// The operation is valid but not supported by this implementation.
    #[error("unsupported: {message}")]
    Unsupported {
        /// Description of the unsupported input.
        message: String,
    },

    /// Invalid input was provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates an [`Error::InvalidFileContents`] with the given path and message.
    #[must_use]
    pub fn invalid_contents(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFileContents {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an [`Error::SchemaValidation`] with the given message.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
        }
    }

    /// Creates an [`Error::InconsistentState`] with the given message.
    #[must_use]
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentState {
            message: message.into(),
        }
    }

    /// Creates an [`Error::Unsupported`] with the given message.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Creates an [`Error::Io`] from a path and an underlying I/O error.
    ///
    /// `NotFound` I/O errors are mapped to [`Error::NotFound`] so callers
    /// can branch on absence without inspecting error kinds.
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

/// A machine-readable code classifying a [`ValueIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCode {
    /// The value exceeds a declared size or length bound.
    TooBig,
    /// The value could not be parsed in any accepted representation.
    BadFormat,
    /// The value parsed but falls outside the declared numeric range.
    OutOfRange,
    /// A decimal value carries more significant digits than the schema allows.
    PrecisionExceeded,
    /// A decimal value carries more fractional digits than the schema allows.
    ScaleExceeded,
    /// The value's shape does not match the column's data type at all.
    TypeError,
}

impl IssueCode {
    /// Returns the wire string for this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TooBig => "too_big",
            Self::BadFormat => "bad_format",
            Self::OutOfRange => "out_of_range",
            Self::PrecisionExceeded => "precision_exceeded",
            Self::ScaleExceeded => "scale_exceeded",
            Self::TypeError => "type_error",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single constraint violation found while coercing a row value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueIssue {
    /// Machine-readable classification.
    pub code: IssueCode,
    /// The column the value belongs to.
    pub column: String,
    /// Human-readable description.
    pub message: String,
}

impl ValueIssue {
    /// Creates a new issue for the given column.
    #[must_use]
    pub fn new(code: IssueCode, column: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            column: column.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValueIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.column, self.code, self.message)
    }
}
