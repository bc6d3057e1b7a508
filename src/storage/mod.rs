//! xBase Table Store
//!
//! This module provides the physical table layer:
//!
//! - **types**: Field directory types and value marshaling
//! - **header**: Header and field descriptor byte layout
//! - **table**: The open table file (navigation, record I/O, append/delete/pack)
//! - **error**: Error types shared with the index layer
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   set(field, value) → normalize → field buffer → write_current → encode → file
//!
//! Read Path:
//!   goto_record(n) → read bytes at header_length + (n-1)*record_length → decode → field buffer
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use xbase_engine::storage::{FieldDescriptor, TableFile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fields = vec![
//!         FieldDescriptor::character("NAME", 10)?,
//!         FieldDescriptor::numeric("AGE", 3, 0)?,
//!     ];
//!     let mut table = TableFile::create("people.dbf", &fields)?;
//!
//!     table.append_blank()?;
//!     table.set_by_name("NAME", "ALICE")?;
//!     table.set_by_name("AGE", "30")?;
//!     table.write_current()?;
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod header;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use header::{TableHeader, DELETED_FLAG, EOF_MARKER, LIVE_FLAG, MAX_FIELDS};
pub use table::{table_path, PackOutcome, Record, TableFile, TABLE_EXTENSION};
pub use types::{parse_date, FieldDescriptor, FieldType, FieldValue};
