//! Schema parse errors

use thiserror::Error;

/// Errors raised while parsing field lists and key expressions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Input does not match the grammar
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input parsed but describes an invalid field or key
    #[error("Invalid definition: {0}")]
    Invalid(String),

    /// Nothing to parse
    #[error("Empty {0}")]
    Empty(&'static str),
}

/// Result type for schema parsing
pub type SchemaResult<T> = Result<T, SchemaError>;
