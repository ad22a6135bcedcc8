//! Records: row instances of a dictionary
//!
//! A record's layout comes from its dictionary at compile time: one dense
//! slot per loaded attribute, one owned block slot per loaded block. Slots
//! are addressed by `LoadIndex`, never by name, so per-row access is an
//! array index. Typed accessors debug-assert the slot kind; release builds
//! fall back to the type's reset value rather than aborting on data.

use crate::dictionary::Dictionary;
use crate::value::{ObjectArray, Structure, Value};
use std::rc::Rc;
use std::sync::Arc;
use tabrule_core::{
    Continuous, ContinuousValueBlock, Date, Symbol, SymbolValueBlock, Text, Time, Timestamp,
    TimestampTz,
};

/// One row. Owns its dense values and its block values; sub-records are
/// shared handles owned by the containing record tree.
pub struct Record {
    dictionary: Arc<Dictionary>,
    dense: Vec<Value>,
    continuous_blocks: Vec<ContinuousValueBlock>,
    symbol_blocks: Vec<SymbolValueBlock>,
    creation_index: u64,
}

impl Record {
    /// Allocate a record with every slot at its reset value.
    ///
    /// The dictionary must be compiled; `creation_index` is assigned by
    /// the creating driver and tracks file order for diagnostics.
    pub fn new(dictionary: Arc<Dictionary>, creation_index: u64) -> Record {
        debug_assert!(dictionary.is_compiled());
        let mut dense = Vec::with_capacity(dictionary.dense_slot_count());
        for index in 0..dictionary.attribute_count() {
            let attribute = dictionary.attribute_at(index);
            if attribute.is_loaded() {
                dense.push(Value::default_for(attribute.data_type()));
            }
        }
        // Both block kinds share the block load-index space; the unused
        // side of each slot stays an empty block.
        let slots = dictionary.block_slot_count();
        let continuous_blocks = vec![ContinuousValueBlock::empty(); slots];
        let symbol_blocks = vec![SymbolValueBlock::empty(); slots];

        Record { dictionary, dense, continuous_blocks, symbol_blocks, creation_index }
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    pub fn creation_index(&self) -> u64 {
        self.creation_index
    }

    pub fn value_at(&self, load_index: usize) -> &Value {
        &self.dense[load_index]
    }

    pub fn set_value_at(&mut self, load_index: usize, value: Value) {
        debug_assert_eq!(self.dense[load_index].data_type(), value.data_type());
        self.dense[load_index] = value;
    }

    pub fn continuous_at(&self, load_index: usize) -> Continuous {
        match &self.dense[load_index] {
            Value::Continuous(value) => *value,
            other => {
                debug_assert!(false, "slot {} holds {:?}", load_index, other.data_type());
                Continuous::MISSING
            }
        }
    }

    pub fn symbol_at(&self, load_index: usize) -> Symbol {
        match &self.dense[load_index] {
            Value::Symbol(value) => value.clone(),
            other => {
                debug_assert!(false, "slot {} holds {:?}", load_index, other.data_type());
                Symbol::empty()
            }
        }
    }

    pub fn date_at(&self, load_index: usize) -> Date {
        match &self.dense[load_index] {
            Value::Date(value) => *value,
            _ => Date::default(),
        }
    }

    pub fn time_at(&self, load_index: usize) -> Time {
        match &self.dense[load_index] {
            Value::Time(value) => *value,
            _ => Time::default(),
        }
    }

    pub fn timestamp_at(&self, load_index: usize) -> Timestamp {
        match &self.dense[load_index] {
            Value::Timestamp(value) => *value,
            _ => Timestamp::default(),
        }
    }

    pub fn timestamp_tz_at(&self, load_index: usize) -> TimestampTz {
        match &self.dense[load_index] {
            Value::TimestampTz(value) => *value,
            _ => TimestampTz::default(),
        }
    }

    pub fn text_at(&self, load_index: usize) -> Text {
        match &self.dense[load_index] {
            Value::Text(value) => value.clone(),
            _ => Text::default(),
        }
    }

    pub fn object_at(&self, load_index: usize) -> Option<Rc<Record>> {
        match &self.dense[load_index] {
            Value::Object(value) => value.clone(),
            _ => None,
        }
    }

    pub fn object_array_at(&self, load_index: usize) -> &ObjectArray {
        match &self.dense[load_index] {
            Value::ObjectArray(value) => value,
            // Slot kinds are fixed by the compiled dictionary; reaching
            // this is a schema-binding bug, not a data problem.
            other => unreachable!("slot {} holds {}, not a table", load_index, other.data_type()),
        }
    }

    pub fn structure_at(&self, load_index: usize) -> Option<&Rc<Structure>> {
        match &self.dense[load_index] {
            Value::Structure(value) => value.as_ref(),
            _ => None,
        }
    }

    pub fn continuous_block_at(&self, load_index: usize) -> &ContinuousValueBlock {
        &self.continuous_blocks[load_index]
    }

    pub fn set_continuous_block_at(&mut self, load_index: usize, block: ContinuousValueBlock) {
        self.continuous_blocks[load_index] = block;
    }

    pub fn symbol_block_at(&self, load_index: usize) -> &SymbolValueBlock {
        &self.symbol_blocks[load_index]
    }

    pub fn set_symbol_block_at(&mut self, load_index: usize, block: SymbolValueBlock) {
        self.symbol_blocks[load_index] = block;
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("dictionary", &self.dictionary.name())
            .field("creation_index", &self.creation_index)
            .field("dense", &self.dense)
            .finish()
    }
}
