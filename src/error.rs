//! Error types for the marshaling engine
//!
//! Every fallible operation returns [`MarshalError`]. Interop-level errors
//! (library loading, symbol lookup, raw calls) keep their own small types and
//! convert into it.

use std::fmt;

use thiserror::Error;

use crate::interop::{CallError, LoadError, SymbolError};

pub type Result<T> = std::result::Result<T, MarshalError>;

#[derive(Debug, Error)]
pub enum MarshalError {
    /// A host value cannot be marshaled for the declared native type.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A function or method could not be materialized.
    #[error("unable to set up {name}: {reason}")]
    Setup { name: String, reason: String },

    /// The callee reported an error through its trailing error slot.
    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Adopting construction ran twice for the same native instance.
    #[error("floating reference at {address:#x} already claimed")]
    DoubleClaim { address: usize },

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

impl MarshalError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn setup(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Setup {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Fixed-size check shared by argument pre-steps and sized arrays.
    pub fn size_mismatch(expected: usize, got: usize) -> Self {
        Self::invalid_argument(format!("Expected size {}, got {}", expected, got))
    }
}

/// Error record read back from a native error slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Error domain identifier (a GQuark).
    pub domain: u32,
    /// Domain name, when the runtime can resolve it.
    pub domain_name: Option<String>,
    pub code: i32,
    pub message: String,
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain_name {
            Some(name) => write!(f, "{} ({}): {}", name, self.code, self.message),
            None => write!(f, "domain {} ({}): {}", self.domain, self.code, self.message),
        }
    }
}

impl std::error::Error for NativeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_message() {
        let err = MarshalError::size_mismatch(3, 2);
        assert_eq!(err.to_string(), "invalid argument: Expected size 3, got 2");
    }

    #[test]
    fn test_native_error_display() {
        let err = NativeError {
            domain: 7,
            domain_name: Some("g-io-error-quark".into()),
            code: 1,
            message: "not found".into(),
        };
        assert_eq!(err.to_string(), "g-io-error-quark (1): not found");

        let anonymous = NativeError { domain_name: None, ..err };
        assert_eq!(anonymous.to_string(), "domain 7 (1): not found");
    }

    #[test]
    fn test_setup_is_distinct_from_invalid_argument() {
        let err = MarshalError::setup("Regress.test_int", "no introspection data");
        assert!(matches!(err, MarshalError::Setup { .. }));
        assert!(err.to_string().starts_with("unable to set up Regress.test_int"));
    }
}
