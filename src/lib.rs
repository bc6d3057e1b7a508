//! # xbase-engine
//!
//! An xBase-family table engine: fixed-record `.dbf` tables with persistent
//! B+-tree secondary indexes kept in a sidecar file.
//!
//! ## Features
//!
//! - **dBase III tables**: header, field directory and fixed-width records
//!   with a delete flag; soft delete, recall, pack and zap
//! - **Order-preserving keys**: character, numeric, date and logical values
//!   encode to byte strings that sort like the values
//! - **B+-tree tags**: named, directional indexes over fields or key
//!   expressions, updated on every write
//! - **Sidecar persistence**: all tags of a table in one checksummed file,
//!   rebuilt from the table when unreadable
//!
//! ## Modules
//!
//! - [`storage`]: table file format and record access
//! - [`index`]: key codec, B+-tree, tags and the index manager
//! - [`area`]: the open-table session tying the two together
//! - [`schema`]: field-list and key-expression parsers
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xbase_engine::{Area, IndexSpec};
//! use xbase_engine::schema::parse_field_list;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut area = Area::default();
//!     area.create("people.dbf", &parse_field_list("NAME C 10, AGE N 3 0")?)?;
//!
//!     for (name, age) in [("ALICE", "30"), ("BOB", "25")] {
//!         area.append_blank()?;
//!         area.set_by_name("NAME", name)?;
//!         area.set_by_name("AGE", age)?;
//!         area.write_current()?;
//!     }
//!
//!     // Index on age, youngest first
//!     area.ensure_tag(IndexSpec::parse("AGE", "AGE")?)?;
//!     area.set_active("AGE")?;
//!     area.top()?;
//!     println!("Youngest: {}", area.get_by_name("NAME")?);
//!
//!     area.close()?;
//!     Ok(())
//! }
//! ```

pub mod area;
pub mod config;
pub mod index;
pub mod schema;
pub mod storage;

// Re-export top-level types for convenience
pub use area::{Area, AreaOptions};

pub use storage::{
    FieldDescriptor, FieldType, FieldValue, PackOutcome, Record, StorageError, StorageResult,
    TableFile, TableHeader,
};

pub use index::{
    ByteKey, IndexKey, IndexManager, IndexSpec, IndexStats, IndexTag, KeyAtom, RecordSource,
};

pub use schema::{parse_field_list, parse_key_expr, SchemaError};

pub use config::{Config, ConfigError, IndexConfig, LoggingConfig, TableConfig};
