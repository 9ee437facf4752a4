//! Scoped-memory access errors.

use thiserror::Error;

/// Raised when a node touches a key its `NodeSpec` did not declare.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("node attempted to read undeclared key '{0}'")]
    ReadNotAllowed(String),
    #[error("node attempted to write undeclared key '{0}'")]
    WriteNotAllowed(String),
}
