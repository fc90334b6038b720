//! ID validation errors.

use thiserror::Error;

/// Why a string is not a valid doko ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("ID cannot be empty")]
    Empty,

    /// A full ID that does not start with its type's reserved prefix.
    #[error("'{actual}' does not start with '{expected}'")]
    MissingPrefix { expected: &'static str, actual: String },

    /// Registry IDs end up in URL paths, so whitespace is refused outright.
    #[error("ID '{id}' contains whitespace")]
    Whitespace { id: String },

    /// Instance IDs are restricted to ASCII alphanumerics and `-`.
    #[error("ID '{id}' contains invalid character {ch:?}")]
    InvalidCharacter { id: String, ch: char },
}

impl IdError {
    /// True when the input was a foreign ID rather than a malformed one of ours.
    pub fn is_foreign(&self) -> bool {
        matches!(self, IdError::MissingPrefix { .. })
    }
}
