//! Index definitions

use crate::schema::{parse_key_expr, KeyPart};
use crate::storage::StorageResult;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_true() -> bool {
    true
}

/// Definition of one index tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Upper-cased tag name
    pub name: String,
    /// Ordered key parts
    pub parts: Vec<KeyPart>,
    /// Stored order
    pub ascending: bool,
    /// Advisory only; duplicates are still accepted
    pub unique: bool,
    /// Fold character keys to upper case
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
}

impl IndexSpec {
    /// Ascending, non-unique spec from a key expression
    pub fn parse(name: &str, expr: &str) -> StorageResult<Self> {
        let parts = parse_key_expr(expr)?;
        Ok(Self::new(name, parts))
    }

    pub fn new(name: &str, parts: Vec<KeyPart>) -> Self {
        Self {
            name: name.trim().to_ascii_uppercase(),
            parts,
            ascending: true,
            unique: false,
            case_insensitive: true,
        }
    }

    /// Spec over a plain list of field names
    pub fn on_fields(name: &str, fields: &[&str]) -> Self {
        let parts = fields
            .iter()
            .map(|f| KeyPart::Field(f.trim().to_ascii_uppercase()))
            .collect();
        Self::new(name, parts)
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    pub fn with_direction(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn case_insensitive(mut self, fold: bool) -> Self {
        self.case_insensitive = fold;
        self
    }

    /// Key expression text, e.g. `LAST+"-"+FIRST`
    pub fn expression(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                KeyPart::Field(name) => name.clone(),
                KeyPart::Literal(text) => format!("\"{}\"", text),
            })
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ON {} {}",
            self.name,
            self.expression(),
            if self.ascending { "ASCENDING" } else { "DESCENDING" }
        )?;
        if self.unique {
            write!(f, " UNIQUE")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_expression() {
        let spec = IndexSpec::parse("byname", "last + ' ' + first").unwrap();
        assert_eq!(spec.name, "BYNAME");
        assert_eq!(spec.parts.len(), 2);
        assert_eq!(spec.expression(), "LAST+FIRST");
        assert!(spec.ascending);
    }

    #[test]
    fn test_spec_display() {
        let spec = IndexSpec::on_fields("age", &["age"]).descending().unique(true);
        assert_eq!(spec.to_string(), "AGE ON AGE DESCENDING UNIQUE");
    }

    #[test]
    fn test_bad_expression_is_invalid_spec() {
        assert!(matches!(
            IndexSpec::parse("x", "+"),
            Err(crate::storage::StorageError::InvalidSpec(_))
        ));
    }
}
