// Document identifiers - "<table>:<key>" encoding and table checks

use crate::error::{DocuDbError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator between the table name and the opaque key.
pub const ID_SEPARATOR: char = ':';

/// An identifier for one document, carrying the table it belongs to.
///
/// Serialized as `"<table>:<key>"`. Neither part may contain the separator;
/// the schema registry refuses table names containing it, and keys are
/// store-assigned from alphabets that never include it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    table: String,
    key: String,
}

impl DocumentId {
    /// Build an identifier from a table name and an opaque key.
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        DocumentId {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Parse the `"<table>:<key>"` form. Fails with `InvalidIdentifier`
    /// unless splitting on the first separator yields two non-empty parts.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(ID_SEPARATOR) {
            Some((table, key)) if !table.is_empty() && !key.is_empty() => {
                Ok(DocumentId::new(table, key))
            }
            _ => Err(DocuDbError::InvalidIdentifier(format!(
                "expected '<table>{ID_SEPARATOR}<key>', got '{s}'"
            ))),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fail fast with `InvalidIdentifier` if this id names a different table.
    /// Runs before any store access.
    pub fn expect_table(&self, table: &str) -> Result<()> {
        if self.table == table {
            Ok(())
        } else {
            Err(DocuDbError::InvalidIdentifier(format!(
                "id '{self}' belongs to table '{}', not '{table}'",
                self.table
            )))
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ID_SEPARATOR}{}", self.table, self.key)
    }
}

impl FromStr for DocumentId {
    type Err = DocuDbError;

    fn from_str(s: &str) -> Result<Self> {
        DocumentId::parse(s)
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DocumentId::parse(&s).map_err(D::Error::custom)
    }
}
