//! Tablet schema models.
//!
//! A tablet schema pins the column layout and the key model of a tablet.
//! The key model decides which transaction log applier variant handles the
//! tablet: primary-key tablets maintain a row-keyed index and delete
//! vectors, all other key models are append-only.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key model of a tablet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum KeysType {
    /// Rows are keyed and mutable in place via the primary index
    Primary,
    /// Append-only, duplicate rows permitted
    Duplicate,
    /// Append-only, rows pre-aggregated on key columns
    Aggregate,
    /// Append-only, last write wins on key columns
    Unique,
}

impl KeysType {
    /// True for the key model that requires the primary-index applier
    pub fn is_primary(&self) -> bool {
        matches!(self, KeysType::Primary)
    }
}

impl Default for KeysType {
    fn default() -> Self {
        Self::Duplicate
    }
}

impl fmt::Display for KeysType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeysType::Primary => write!(f, "primary"),
            KeysType::Duplicate => write!(f, "duplicate"),
            KeysType::Aggregate => write!(f, "aggregate"),
            KeysType::Unique => write!(f, "unique"),
        }
    }
}

/// Column data types supported in tablet schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Int,
    BigInt,
    Double,
    Varchar,
    Date,
    Datetime,
}

/// A single column definition within a tablet schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ColumnSchema {
    /// Column name, unique within the schema
    pub name: String,

    /// Data type of the column
    pub column_type: ColumnType,

    /// True when the column participates in the sort/primary key
    pub is_key: bool,

    /// True when NULL values are permitted
    pub nullable: bool,
}

impl ColumnSchema {
    /// Create a key column definition
    pub fn key(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_key: true,
            nullable: false,
        }
    }

    /// Create a non-key, nullable column definition
    pub fn value(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_key: false,
            nullable: true,
        }
    }
}

/// Versioned column layout of a tablet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TabletSchema {
    /// Schema id, bumped by schema change
    pub id: u64,

    /// Key model; selects the applier variant
    #[serde(default)]
    pub keys_type: KeysType,

    /// Ordered column definitions
    pub columns: Vec<ColumnSchema>,
}

impl TabletSchema {
    /// Create a schema with the given key model and columns
    pub fn new(id: u64, keys_type: KeysType, columns: Vec<ColumnSchema>) -> Self {
        Self {
            id,
            keys_type,
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_type_is_primary() {
        assert!(KeysType::Primary.is_primary());
        assert!(!KeysType::Duplicate.is_primary());
        assert!(!KeysType::Aggregate.is_primary());
        assert!(!KeysType::Unique.is_primary());
    }

    #[test]
    fn test_schema_serde_round_trip() {
        let schema = TabletSchema::new(
            7,
            KeysType::Primary,
            vec![
                ColumnSchema::key("id", ColumnType::BigInt),
                ColumnSchema::value("payload", ColumnType::Varchar),
            ],
        );

        let json = serde_json::to_string(&schema).unwrap();
        let parsed: TabletSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
