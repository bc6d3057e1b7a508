//! Storage engine error types
//!
//! Defines all errors that can occur in the table store and the index layer.

use thiserror::Error;

/// Errors that can occur in the table engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record number, field name or seek key is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Table header or field directory is malformed
    #[error("Invalid table format: {0}")]
    Format(String),

    /// Index sidecar file is malformed (bad magic, checksum, truncated, ...)
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Navigation outside `[1, record_count]`
    #[error("Record {recno} out of range (record count {count})")]
    OutOfRange { recno: i64, count: u32 },

    /// A value could not be stored in a field
    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Bad field definition or key expression
    #[error("Invalid definition: {0}")]
    InvalidSpec(String),

    /// Operation requires an open table
    #[error("No table is open")]
    NotOpen,

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<crate::schema::SchemaError> for StorageError {
    fn from(err: crate::schema::SchemaError) -> Self {
        StorageError::InvalidSpec(err.to_string())
    }
}

impl StorageError {
    /// Whether the caller can carry on with the table still usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_)
                | StorageError::OutOfRange { .. }
                | StorageError::CorruptIndex(_)
                | StorageError::InvalidValue { .. }
        )
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::NotFound("field AGE".to_string());
        assert_eq!(err.to_string(), "Not found: field AGE");

        let err = StorageError::OutOfRange { recno: 7, count: 3 };
        assert_eq!(err.to_string(), "Record 7 out of range (record count 3)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert!(!storage_err.is_recoverable());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(StorageError::CorruptIndex("bad magic".into()).is_recoverable());
        assert!(StorageError::OutOfRange { recno: 0, count: 0 }.is_recoverable());
        assert!(!StorageError::Format("no terminator".into()).is_recoverable());
    }
}
