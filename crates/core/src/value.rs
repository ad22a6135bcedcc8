//! The closed set of value types a dictionary can declare
//!
//! Types split into *stored* kinds (persistable in a row: scalars, text,
//! sparse blocks), *relation* kinds (references to sub-records), and the
//! *structure* kind (named in-memory objects produced by rules, never
//! persisted).

use std::fmt;

/// Declared type of an attribute, an operand, or a rule result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Continuous,
    Symbol,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Text,
    Object,
    ObjectArray,
    ContinuousValueBlock,
    SymbolValueBlock,
    Structure,
}

impl DataType {
    /// Continuous or Symbol: the two kinds statistics aggregate over.
    pub fn is_simple(self) -> bool {
        matches!(self, DataType::Continuous | DataType::Symbol)
    }

    /// Persistable in a row of a tabular file.
    pub fn is_stored(self) -> bool {
        matches!(
            self,
            DataType::Continuous
                | DataType::Symbol
                | DataType::Date
                | DataType::Time
                | DataType::Timestamp
                | DataType::TimestampTz
                | DataType::Text
                | DataType::ContinuousValueBlock
                | DataType::SymbolValueBlock
        )
    }

    pub fn is_block(self) -> bool {
        matches!(self, DataType::ContinuousValueBlock | DataType::SymbolValueBlock)
    }

    /// References to sub-records, only reachable in memory.
    pub fn is_relation(self) -> bool {
        matches!(self, DataType::Object | DataType::ObjectArray)
    }

    pub fn is_structure(self) -> bool {
        matches!(self, DataType::Structure)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Continuous => "Continuous",
            DataType::Symbol => "Symbol",
            DataType::Date => "Date",
            DataType::Time => "Time",
            DataType::Timestamp => "Timestamp",
            DataType::TimestampTz => "TimestampTZ",
            DataType::Text => "Text",
            DataType::Object => "Object",
            DataType::ObjectArray => "ObjectArray",
            DataType::ContinuousValueBlock => "ContinuousValueBlock",
            DataType::SymbolValueBlock => "SymbolValueBlock",
            DataType::Structure => "Structure",
        }
    }

    /// Parse a declared type name, the inverse of [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<DataType> {
        Some(match name {
            "Continuous" => DataType::Continuous,
            "Symbol" => DataType::Symbol,
            "Date" => DataType::Date,
            "Time" => DataType::Time,
            "Timestamp" => DataType::Timestamp,
            "TimestampTZ" => DataType::TimestampTz,
            "Text" => DataType::Text,
            "Object" => DataType::Object,
            "ObjectArray" => DataType::ObjectArray,
            "ContinuousValueBlock" => DataType::ContinuousValueBlock,
            "SymbolValueBlock" => DataType::SymbolValueBlock,
            "Structure" => DataType::Structure,
            _ => return None,
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_partition() {
        for ty in [
            DataType::Continuous,
            DataType::Symbol,
            DataType::Date,
            DataType::Time,
            DataType::Timestamp,
            DataType::TimestampTz,
            DataType::Text,
            DataType::Object,
            DataType::ObjectArray,
            DataType::ContinuousValueBlock,
            DataType::SymbolValueBlock,
            DataType::Structure,
        ] {
            let categories =
                [ty.is_stored(), ty.is_relation(), ty.is_structure()].iter().filter(|b| **b).count();
            assert_eq!(categories, 1, "{} must be in exactly one category", ty);
        }
    }

    #[test]
    fn test_name_round_trip() {
        for ty in [DataType::Continuous, DataType::TimestampTz, DataType::SymbolValueBlock] {
            assert_eq!(DataType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(DataType::from_name("Numeric"), None);
    }
}
