//! Schema text parsing
//!
//! Two small grammars, both parsed with `nom`:
//!
//! ```text
//! field list:      NAME C 10, AGE N 3 0, DOB D, OK L
//!                  NAME C(10), PRICE N(9,2)
//! key expression:  LAST+FIRST
//!                  NAME + "-" + CITY
//! ```

mod error;
mod parser;

pub use error::{SchemaError, SchemaResult};
pub use parser::{parse_field_list, parse_key_expr, KeyPart};
