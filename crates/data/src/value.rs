//! Record cell values and rule-owned structures
//!
//! A [`Value`] is what one record slot holds. Sub-records are shared `Rc`s:
//! the containing record tree owns them, table rules only rearrange the
//! handles. A [`Structure`] is the other kind of composite: a named
//! in-memory object produced by a structure rule and owned by the rule
//! instance (or, for loaded structure attributes, by the record).

use crate::record::Record;
use std::collections::HashMap;
use std::rc::Rc;
use tabrule_core::{
    Continuous, ContinuousValueBlock, DataType, Date, NumericKey, Symbol, SymbolValueBlock, Text,
    Time, Timestamp, TimestampTz,
};

/// One record slot.
#[derive(Debug, Clone)]
pub enum Value {
    Continuous(Continuous),
    Symbol(Symbol),
    Date(Date),
    Time(Time),
    Timestamp(Timestamp),
    TimestampTz(TimestampTz),
    Text(Text),
    Object(Option<Rc<Record>>),
    ObjectArray(ObjectArray),
    ContinuousBlock(ContinuousValueBlock),
    SymbolBlock(SymbolValueBlock),
    Structure(Option<Rc<Structure>>),
}

impl Value {
    /// The reset value of a slot of the given type.
    pub fn default_for(data_type: DataType) -> Value {
        match data_type {
            DataType::Continuous => Value::Continuous(Continuous::MISSING),
            DataType::Symbol => Value::Symbol(Symbol::empty()),
            DataType::Date => Value::Date(Date::default()),
            DataType::Time => Value::Time(Time::default()),
            DataType::Timestamp => Value::Timestamp(Timestamp::default()),
            DataType::TimestampTz => Value::TimestampTz(TimestampTz::default()),
            DataType::Text => Value::Text(Text::default()),
            DataType::Object => Value::Object(None),
            DataType::ObjectArray => Value::ObjectArray(ObjectArray::new()),
            DataType::ContinuousValueBlock => {
                Value::ContinuousBlock(ContinuousValueBlock::empty())
            }
            DataType::SymbolValueBlock => Value::SymbolBlock(SymbolValueBlock::empty()),
            DataType::Structure => Value::Structure(None),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Continuous(_) => DataType::Continuous,
            Value::Symbol(_) => DataType::Symbol,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::TimestampTz(_) => DataType::TimestampTz,
            Value::Text(_) => DataType::Text,
            Value::Object(_) => DataType::Object,
            Value::ObjectArray(_) => DataType::ObjectArray,
            Value::ContinuousBlock(_) => DataType::ContinuousValueBlock,
            Value::SymbolBlock(_) => DataType::SymbolValueBlock,
            Value::Structure(_) => DataType::Structure,
        }
    }
}

/// An ordered table of sub-records: never null, never a duplicate handle.
#[derive(Debug, Clone, Default)]
pub struct ObjectArray {
    records: Vec<Rc<Record>>,
}

impl ObjectArray {
    pub fn new() -> ObjectArray {
        ObjectArray { records: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> ObjectArray {
        ObjectArray { records: Vec::with_capacity(capacity) }
    }

    /// Append a record; refuses a handle already present.
    pub fn push(&mut self, record: Rc<Record>) -> bool {
        if self.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Append without the duplicate scan. Callers must know the handle is
    /// fresh (e.g. when filtering an array that already held the invariant).
    pub fn push_unchecked(&mut self, record: Rc<Record>) {
        debug_assert!(!self.contains(&record));
        self.records.push(record);
    }

    pub fn contains(&self, record: &Rc<Record>) -> bool {
        self.records.iter().any(|r| Rc::ptr_eq(r, record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Rc<Record>> {
        self.records.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rc<Record>> {
        self.records.iter()
    }

    pub fn from_records(records: Vec<Rc<Record>>) -> ObjectArray {
        let mut array = ObjectArray::with_capacity(records.len());
        for record in records {
            array.push(record);
        }
        array
    }
}

impl FromIterator<Rc<Record>> for ObjectArray {
    fn from_iter<I: IntoIterator<Item = Rc<Record>>>(iter: I) -> Self {
        ObjectArray::from_records(iter.into_iter().collect())
    }
}

/// A named in-memory object produced by a structure rule.
#[derive(Debug, Clone)]
pub enum Structure {
    ContinuousVector(Vec<Continuous>),
    SymbolVector(Vec<Symbol>),
    ContinuousHashMap(SymbolKeyedMap<Continuous>),
    SymbolHashMap(SymbolKeyedMap<Symbol>),
}

impl Structure {
    pub fn structure_name(&self) -> &'static str {
        match self {
            Structure::ContinuousVector(_) => "Vector",
            Structure::SymbolVector(_) => "VectorC",
            Structure::ContinuousHashMap(_) => "HashMap",
            Structure::SymbolHashMap(_) => "HashMapC",
        }
    }

    pub fn as_continuous_vector(&self) -> Option<&[Continuous]> {
        match self {
            Structure::ContinuousVector(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_symbol_vector(&self) -> Option<&[Symbol]> {
        match self {
            Structure::SymbolVector(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_continuous_hash_map(&self) -> Option<&SymbolKeyedMap<Continuous>> {
        match self {
            Structure::ContinuousHashMap(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_symbol_hash_map(&self) -> Option<&SymbolKeyedMap<Symbol>> {
        match self {
            Structure::SymbolHashMap(map) => Some(map),
            _ => None,
        }
    }
}

/// A map keyed by symbols, using their numeric keys for O(1) lookup.
///
/// The map owns its key symbols, which is what keeps the numeric keys
/// valid for its whole lifetime.
#[derive(Debug, Clone)]
pub struct SymbolKeyedMap<T> {
    keys: Vec<Symbol>,
    values: Vec<T>,
    index: HashMap<NumericKey, usize>,
}

impl<T: Clone> SymbolKeyedMap<T> {
    /// Build from parallel key/value vectors.
    ///
    /// Fails when lengths differ or a key repeats (value equality, which
    /// for interned symbols is identity equality).
    pub fn build(keys: Vec<Symbol>, values: Vec<T>) -> Result<SymbolKeyedMap<T>, String> {
        if keys.len() != values.len() {
            return Err(format!(
                "key vector has {} entries but value vector has {}",
                keys.len(),
                values.len()
            ));
        }
        let mut index = HashMap::with_capacity(keys.len());
        for (position, key) in keys.iter().enumerate() {
            if index.insert(key.numeric_key(), position).is_some() {
                return Err(format!("duplicate key '{}'", key));
            }
        }
        Ok(SymbolKeyedMap { keys, values, index })
    }

    pub fn get(&self, key: &Symbol) -> Option<&T> {
        self.index.get(&key.numeric_key()).map(|position| &self.values[*position])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Symbol] {
        &self.keys
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use std::sync::Arc;

    fn empty_record() -> Rc<Record> {
        let mut dict = Dictionary::new("T");
        dict.compile().unwrap();
        Rc::new(Record::new(Arc::new(dict), 0))
    }

    #[test]
    fn test_object_array_rejects_duplicates() {
        let a = empty_record();
        let b = empty_record();

        let mut array = ObjectArray::new();
        assert!(array.push(a.clone()));
        assert!(array.push(b.clone()));
        assert!(!array.push(a.clone()));
        assert_eq!(array.len(), 2);
        assert!(array.contains(&a));
    }

    #[test]
    fn test_symbol_keyed_map_lookup() {
        let keys = vec![Symbol::intern("x"), Symbol::intern("y"), Symbol::intern("z")];
        let values = vec![Symbol::intern("1"), Symbol::intern("2"), Symbol::intern("3")];
        let map = SymbolKeyedMap::build(keys, values).unwrap();

        assert_eq!(map.get(&Symbol::intern("y")), Some(&Symbol::intern("2")));
        assert_eq!(map.get(&Symbol::intern("w")), None);
    }

    #[test]
    fn test_symbol_keyed_map_rejects_duplicates() {
        let keys = vec![Symbol::intern("x"), Symbol::intern("x")];
        let values = vec![Continuous::new(1.0), Continuous::new(2.0)];
        assert!(SymbolKeyedMap::build(keys, values).is_err());
    }

    #[test]
    fn test_symbol_keyed_map_rejects_length_mismatch() {
        let keys = vec![Symbol::intern("x")];
        let values: Vec<Continuous> = vec![];
        assert!(SymbolKeyedMap::build(keys, values).is_err());
    }

    #[test]
    fn test_default_values() {
        assert!(matches!(Value::default_for(DataType::Continuous), Value::Continuous(c) if c.is_missing()));
        assert!(matches!(Value::default_for(DataType::Object), Value::Object(None)));
        assert!(
            matches!(Value::default_for(DataType::ContinuousValueBlock), Value::ContinuousBlock(b) if b.is_empty())
        );
    }
}
