//! Table-valued rules
//!
//! Rules reading through a possibly-null sub-record (`GetValue*`,
//! `GetBlock*`) and rules rearranging `ObjectArray` values (selection,
//! sort, extraction, set operations). Element identity is the record
//! handle; set operations rely on the invariant that every table is
//! duplicate-free.
//!
//! Rules flagged multiple-scope evaluate their per-element operands
//! against the current sub-record of the iteration; operands depending
//! only on the main record are captured before the loop.

use super::rule_common;
use crate::dictionary::{Dictionary, SchemaError};
use crate::record::Record;
use crate::rule::{
    BlockLayoutMap, DerivationRule, Operand, OperandScope, RuleCore, RuleDef, RuleRegistry,
    relation_operand_class,
};
use crate::value::ObjectArray;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use tabrule_core::{
    Continuous, ContinuousValueBlock, DataType, Date, IndexedKeyBlock, Symbol, SymbolValueBlock,
    Text, Time, Timestamp, TimestampTz,
};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Box::new(ExistRule::new()));
    for op in [
        GetOp::Continuous,
        GetOp::Symbol,
        GetOp::Date,
        GetOp::Time,
        GetOp::Timestamp,
        GetOp::TimestampTz,
        GetOp::Text,
        GetOp::Entity,
        GetOp::Table,
    ] {
        registry.register(Box::new(GetValueRule::new(op)));
    }
    registry.register(Box::new(GetBlockRule::new(true)));
    registry.register(Box::new(GetBlockRule::new(false)));
    registry.register(Box::new(TableAtRule::new()));
    registry.register(Box::new(TableAtKeyRule::new()));
    registry.register(Box::new(TableSelectRule::new(true)));
    registry.register(Box::new(TableSelectRule::new(false)));
    registry.register(Box::new(TableSortRule::new()));
    registry.register(Box::new(TableExtractionRule::new()));
    for op in [SetOp::Union, SetOp::Intersection, SetOp::Difference] {
        registry.register(Box::new(TableSetRule::new(op)));
    }
    registry.register(Box::new(TableSubSetRule::new(true)));
    registry.register(Box::new(TableSubSetRule::new(false)));
}

// ---------------------------------------------------------------------------

static EXIST_DEF: RuleDef = RuleDef {
    name: "Exist",
    label: "Whether a sub-record is present",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct ExistRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl ExistRule {
    fn new() -> ExistRule {
        ExistRule {
            def: &EXIST_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Object)]),
        }
    }
}

impl DerivationRule for ExistRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let present = self.core.operands[0].object_value(record).is_some();
        Continuous::new(if present { 1.0 } else { 0.0 })
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GetOp {
    Continuous,
    Symbol,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Text,
    Entity,
    Table,
}

static GET_VALUE_DEF: RuleDef = RuleDef {
    name: "GetValue",
    label: "Numerical value of a sub-record field",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_VALUE_C_DEF: RuleDef = RuleDef {
    name: "GetValueC",
    label: "Categorical value of a sub-record field",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_VALUE_D_DEF: RuleDef = RuleDef {
    name: "GetValueD",
    label: "Date value of a sub-record field",
    result_type: DataType::Date,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_VALUE_T_DEF: RuleDef = RuleDef {
    name: "GetValueT",
    label: "Time value of a sub-record field",
    result_type: DataType::Time,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_VALUE_TS_DEF: RuleDef = RuleDef {
    name: "GetValueTS",
    label: "Timestamp value of a sub-record field",
    result_type: DataType::Timestamp,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_VALUE_TSTZ_DEF: RuleDef = RuleDef {
    name: "GetValueTSTZ",
    label: "Timestamp with time zone of a sub-record field",
    result_type: DataType::TimestampTz,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_TEXT_DEF: RuleDef = RuleDef {
    name: "GetText",
    label: "Text value of a sub-record field",
    result_type: DataType::Text,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_ENTITY_DEF: RuleDef = RuleDef {
    name: "GetEntity",
    label: "Sub-record of a sub-record",
    result_type: DataType::Object,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_TABLE_DEF: RuleDef = RuleDef {
    name: "GetTable",
    label: "Sub-table of a sub-record",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

/// Typed read through a possibly-null sub-record: a null object yields
/// the reset value of the result type.
#[derive(Clone)]
struct GetValueRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl GetValueRule {
    fn new(op: GetOp) -> GetValueRule {
        let def: &'static RuleDef = match op {
            GetOp::Continuous => &GET_VALUE_DEF,
            GetOp::Symbol => &GET_VALUE_C_DEF,
            GetOp::Date => &GET_VALUE_D_DEF,
            GetOp::Time => &GET_VALUE_T_DEF,
            GetOp::Timestamp => &GET_VALUE_TS_DEF,
            GetOp::TimestampTz => &GET_VALUE_TSTZ_DEF,
            GetOp::Text => &GET_TEXT_DEF,
            GetOp::Entity => &GET_ENTITY_DEF,
            GetOp::Table => &GET_TABLE_DEF,
        };
        GetValueRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Object),
                Operand::new(def.result_type).with_scope(OperandScope::Secondary),
            ]),
        }
    }

    fn sub_record(&mut self, record: &Record) -> Option<Rc<Record>> {
        self.core.operands[0].object_value(record)
    }
}

impl DerivationRule for GetValueRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].continuous_value(&sub),
            None => Continuous::MISSING,
        }
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].symbol_value(&sub),
            None => Symbol::empty(),
        }
    }

    fn compute_date(&mut self, record: &Record) -> Date {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].date_value(&sub),
            None => Date::default(),
        }
    }

    fn compute_time(&mut self, record: &Record) -> Time {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].time_value(&sub),
            None => Time::default(),
        }
    }

    fn compute_timestamp(&mut self, record: &Record) -> Timestamp {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].timestamp_value(&sub),
            None => Timestamp::default(),
        }
    }

    fn compute_timestamp_tz(&mut self, record: &Record) -> TimestampTz {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].timestamp_tz_value(&sub),
            None => TimestampTz::default(),
        }
    }

    fn compute_text(&mut self, record: &Record) -> Text {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].text_value(&sub),
            None => Text::default(),
        }
    }

    fn compute_object(&mut self, record: &Record) -> Option<Rc<Record>> {
        let sub = self.sub_record(record)?;
        self.core.operands[1].object_value(&sub)
    }

    fn compute_object_array(&mut self, record: &Record) -> ObjectArray {
        match self.sub_record(record) {
            Some(sub) => self.core.operands[1].object_array_value(&sub),
            None => ObjectArray::new(),
        }
    }
}

// ---------------------------------------------------------------------------

static GET_BLOCK_DEF: RuleDef = RuleDef {
    name: "GetBlock",
    label: "Numerical sparse block of a sub-record",
    result_type: DataType::ContinuousValueBlock,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static GET_BLOCK_C_DEF: RuleDef = RuleDef {
    name: "GetBlockC",
    label: "Categorical sparse block of a sub-record",
    result_type: DataType::SymbolValueBlock,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

#[derive(Clone)]
struct GetBlockRule {
    def: &'static RuleDef,
    core: RuleCore,
    layout: BlockLayoutMap,
}

impl GetBlockRule {
    fn new(continuous: bool) -> GetBlockRule {
        let def: &'static RuleDef = if continuous { &GET_BLOCK_DEF } else { &GET_BLOCK_C_DEF };
        GetBlockRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Object),
                Operand::new(def.result_type).with_scope(OperandScope::Secondary),
            ]),
            layout: BlockLayoutMap::default(),
        }
    }
}

impl DerivationRule for GetBlockRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_continuous_block(
        &mut self,
        record: &Record,
        target_keys: &IndexedKeyBlock,
    ) -> ContinuousValueBlock {
        let Some(sub) = self.core.operands[0].object_value(record) else {
            return ContinuousValueBlock::empty();
        };
        let Some(source_keys) = self.core.operands[1].source_key_block(&sub) else {
            return self.core.operands[1].continuous_block_value(&sub, target_keys).into_owned();
        };
        self.layout.ensure(source_keys, target_keys);
        let source = self.core.operands[1].continuous_block_value(&sub, target_keys);
        if self.layout.same_value_indexes {
            source.into_owned()
        } else {
            source.extract_subset(&self.layout.new_value_indexes)
        }
    }

    fn compute_symbol_block(
        &mut self,
        record: &Record,
        target_keys: &IndexedKeyBlock,
    ) -> SymbolValueBlock {
        let Some(sub) = self.core.operands[0].object_value(record) else {
            return SymbolValueBlock::empty();
        };
        let Some(source_keys) = self.core.operands[1].source_key_block(&sub) else {
            return self.core.operands[1].symbol_block_value(&sub, target_keys).into_owned();
        };
        self.layout.ensure(source_keys, target_keys);
        let source = self.core.operands[1].symbol_block_value(&sub, target_keys);
        if self.layout.same_value_indexes {
            source.into_owned()
        } else {
            source.extract_subset(&self.layout.new_value_indexes)
        }
    }
}

// ---------------------------------------------------------------------------

static TABLE_AT_DEF: RuleDef = RuleDef {
    name: "TableAt",
    label: "Sub-record of a table at a rank",
    result_type: DataType::Object,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

/// 1-based rank access; missing or out-of-range ranks yield null.
#[derive(Clone)]
struct TableAtRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TableAtRule {
    fn new() -> TableAtRule {
        TableAtRule {
            def: &TABLE_AT_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Continuous),
            ]),
        }
    }
}

impl DerivationRule for TableAtRule {
    rule_common!();

    fn compute_object(&mut self, record: &Record) -> Option<Rc<Record>> {
        let rank = self.core.operands[1].continuous_value(record).as_int()?;
        if rank < 1 {
            return None;
        }
        let table = self.core.operands[0].object_array_value(record);
        table.get(rank as usize - 1).cloned()
    }
}

static TABLE_AT_KEY_DEF: RuleDef = RuleDef {
    name: "TableAtKey",
    label: "Sub-record of a table matching key values",
    result_type: DataType::Object,
    structure_name: None,
    variable_operands: true,
    multiple_scope: false,
};

/// Linear search on the sub-dictionary's key attributes. The key operands
/// are evaluated once against the main record before the scan.
#[derive(Clone)]
struct TableAtKeyRule {
    def: &'static RuleDef,
    core: RuleCore,
    key_slots: Vec<usize>,
}

impl TableAtKeyRule {
    fn new() -> TableAtKeyRule {
        TableAtKeyRule {
            def: &TABLE_AT_KEY_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Symbol),
            ]),
            key_slots: Vec::new(),
        }
    }
}

impl DerivationRule for TableAtKeyRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn check_operands_completeness(&self, dictionary: &Dictionary) -> Result<(), SchemaError> {
        let Some(sub_dictionary) = self.secondary_scope_dictionary(dictionary) else {
            return Err(SchemaError::BadRule {
                rule: self.name().to_string(),
                cause: "cannot resolve the dictionary of the table operand".to_string(),
            });
        };
        let provided = self.core.operands.len() - 1;
        if provided != sub_dictionary.key_names().len() {
            return Err(SchemaError::BadRule {
                rule: self.name().to_string(),
                cause: format!(
                    "{} key operands provided but dictionary '{}' has a {}-field key",
                    provided,
                    sub_dictionary.name(),
                    sub_dictionary.key_names().len()
                ),
            });
        }
        Ok(())
    }

    fn compile_rule(&mut self, dictionary: &Dictionary) {
        self.key_slots.clear();
        if let Some(sub_dictionary) = self.secondary_scope_dictionary(dictionary) {
            for name in sub_dictionary.key_names() {
                if let Some(slot) =
                    sub_dictionary.lookup_attribute(name).and_then(|a| a.load_index())
                {
                    self.key_slots.push(slot);
                }
            }
        }
    }

    fn compute_object(&mut self, record: &Record) -> Option<Rc<Record>> {
        // Main-scope capture: key values are fixed for the whole scan.
        let mut wanted = Vec::with_capacity(self.core.operands.len() - 1);
        for operand in self.core.operands.iter_mut().skip(1) {
            wanted.push(operand.symbol_value(record));
        }
        if wanted.len() != self.key_slots.len() {
            return None;
        }

        let table = self.core.operands[0].object_array_value(record);
        table
            .iter()
            .find(|element| {
                self.key_slots
                    .iter()
                    .zip(&wanted)
                    .all(|(slot, key)| element.symbol_at(*slot) == *key)
            })
            .cloned()
    }
}

// ---------------------------------------------------------------------------

static TABLE_SELECT_FIRST_DEF: RuleDef = RuleDef {
    name: "TableSelectFirst",
    label: "First sub-record satisfying a predicate",
    result_type: DataType::Object,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_SELECTION_DEF: RuleDef = RuleDef {
    name: "TableSelection",
    label: "Sub-records satisfying a predicate",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

#[derive(Clone)]
struct TableSelectRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TableSelectRule {
    fn new(first_only: bool) -> TableSelectRule {
        TableSelectRule {
            def: if first_only { &TABLE_SELECT_FIRST_DEF } else { &TABLE_SELECTION_DEF },
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Continuous).with_scope(OperandScope::Secondary),
            ]),
        }
    }

    fn matches(operand: &mut Operand, element: &Record) -> bool {
        let value = operand.continuous_value(element);
        !value.is_missing() && value.value() != 0.0
    }
}

impl DerivationRule for TableSelectRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_object(&mut self, record: &Record) -> Option<Rc<Record>> {
        let table = self.core.operands[0].object_array_value(record);
        let predicate = &mut self.core.operands[1];
        table.iter().find(|element| Self::matches(predicate, element)).cloned()
    }

    fn compute_object_array(&mut self, record: &Record) -> ObjectArray {
        let table = self.core.operands[0].object_array_value(record);
        let predicate = &mut self.core.operands[1];
        let mut selected = ObjectArray::new();
        for element in table.iter() {
            if Self::matches(predicate, element) {
                // Filtering a duplicate-free table keeps it duplicate-free.
                selected.push_unchecked(element.clone());
            }
        }
        selected
    }
}

// ---------------------------------------------------------------------------

static TABLE_SORT_DEF: RuleDef = RuleDef {
    name: "TableSort",
    label: "Stable hierarchical sort of a table",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: true,
    multiple_scope: true,
};

/// One evaluated sort key. Missing/invalid values order first; mixed-type
/// comparison cannot happen because operand types are fixed at compile.
#[derive(Clone)]
enum SortKey {
    Continuous(Continuous),
    Symbol(Symbol),
    Date(Date),
    Time(Time),
    Timestamp(Timestamp),
    TimestampTz(TimestampTz),
    Text(Text),
}

impl SortKey {
    fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Continuous(a), SortKey::Continuous(b)) => a.compare(*b),
            (SortKey::Symbol(a), SortKey::Symbol(b)) => a.cmp(b),
            (SortKey::Date(a), SortKey::Date(b)) => a.cmp(b),
            (SortKey::Time(a), SortKey::Time(b)) => a.cmp(b),
            (SortKey::Timestamp(a), SortKey::Timestamp(b)) => a.cmp(b),
            (SortKey::TimestampTz(a), SortKey::TimestampTz(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.as_str().cmp(b.as_str()),
            _ => {
                debug_assert!(false, "sort keys of mixed types");
                Ordering::Equal
            }
        }
    }
}

fn evaluate_sort_key(operand: &mut Operand, element: &Record) -> SortKey {
    match operand.data_type() {
        DataType::Symbol => SortKey::Symbol(operand.symbol_value(element)),
        DataType::Date => SortKey::Date(operand.date_value(element)),
        DataType::Time => SortKey::Time(operand.time_value(element)),
        DataType::Timestamp => SortKey::Timestamp(operand.timestamp_value(element)),
        DataType::TimestampTz => SortKey::TimestampTz(operand.timestamp_tz_value(element)),
        DataType::Text => SortKey::Text(operand.text_value(element)),
        _ => SortKey::Continuous(operand.continuous_value(element)),
    }
}

/// Sort state lives in the rule instance, never in a process-wide slot,
/// so concurrent evaluators each sort with their own operands.
#[derive(Clone)]
struct TableSortRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TableSortRule {
    fn new() -> TableSortRule {
        TableSortRule {
            def: &TABLE_SORT_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Continuous).with_scope(OperandScope::Secondary),
            ]),
        }
    }
}

impl DerivationRule for TableSortRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn check_definition(&self) -> Result<(), SchemaError> {
        for operand in self.operands().iter().skip(1) {
            let ty = operand.data_type();
            if !ty.is_stored() || ty.is_block() {
                return Err(SchemaError::BadRule {
                    rule: self.name().to_string(),
                    cause: format!("sort key operands must be stored values, got {}", ty),
                });
            }
        }
        Ok(())
    }

    fn compute_object_array(&mut self, record: &Record) -> ObjectArray {
        let table = self.core.operands[0].object_array_value(record);

        // Decorate each element with its evaluated key tuple.
        let mut decorated: Vec<(Vec<SortKey>, usize)> = Vec::with_capacity(table.len());
        for (rank, element) in table.iter().enumerate() {
            let mut keys = Vec::with_capacity(self.core.operands.len() - 1);
            for operand in self.core.operands.iter_mut().skip(1) {
                keys.push(evaluate_sort_key(operand, element));
            }
            decorated.push((keys, rank));
        }

        // Hierarchical compare; ties fall through to source order.
        decorated.sort_by(|a, b| {
            for (left, right) in a.0.iter().zip(&b.0) {
                let ordering = left.compare(right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.1.cmp(&b.1)
        });

        let mut sorted = ObjectArray::with_capacity(table.len());
        for (_, rank) in decorated {
            sorted.push_unchecked(table.get(rank).expect("rank within table").clone());
        }
        sorted
    }
}

// ---------------------------------------------------------------------------

static TABLE_EXTRACTION_DEF: RuleDef = RuleDef {
    name: "TableExtraction",
    label: "Sub-range of a table by 1-based inclusive ranks",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct TableExtractionRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TableExtractionRule {
    fn new() -> TableExtractionRule {
        TableExtractionRule {
            def: &TABLE_EXTRACTION_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Continuous),
                Operand::new(DataType::Continuous),
            ]),
        }
    }
}

impl DerivationRule for TableExtractionRule {
    rule_common!();

    fn compute_object_array(&mut self, record: &Record) -> ObjectArray {
        let begin = self.core.operands[1].continuous_value(record).as_int();
        let end = self.core.operands[2].continuous_value(record).as_int();
        let (Some(begin), Some(end)) = (begin, end) else {
            return ObjectArray::new();
        };

        let table = self.core.operands[0].object_array_value(record);
        let begin = begin.max(1) as usize;
        let end = end.min(table.len() as i64);
        if end < begin as i64 {
            return ObjectArray::new();
        }
        let mut extracted = ObjectArray::with_capacity(end as usize - begin + 1);
        for rank in begin..=end as usize {
            if let Some(element) = table.get(rank - 1) {
                extracted.push_unchecked(element.clone());
            }
        }
        extracted
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetOp {
    Union,
    Intersection,
    Difference,
}

static TABLE_UNION_DEF: RuleDef = RuleDef {
    name: "TableUnion",
    label: "Union of two tables, first-operand order",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static TABLE_INTERSECTION_DEF: RuleDef = RuleDef {
    name: "TableIntersection",
    label: "Intersection of two tables, first-operand order",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static TABLE_DIFFERENCE_DEF: RuleDef = RuleDef {
    name: "TableDifference",
    label: "Difference of two tables, first-operand order",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

/// Identity is element equality: the same record handle, not field
/// equality. Inputs hold the §3 invariants (non-null, duplicate-free).
#[derive(Clone)]
struct TableSetRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: SetOp,
}

impl TableSetRule {
    fn new(op: SetOp) -> TableSetRule {
        let def = match op {
            SetOp::Union => &TABLE_UNION_DEF,
            SetOp::Intersection => &TABLE_INTERSECTION_DEF,
            SetOp::Difference => &TABLE_DIFFERENCE_DEF,
        };
        TableSetRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::ObjectArray),
            ]),
            op,
        }
    }
}

fn identity_set(table: &ObjectArray) -> HashSet<*const Record> {
    table.iter().map(|record| Rc::as_ptr(record)).collect()
}

impl DerivationRule for TableSetRule {
    rule_common!();

    fn compute_object_array(&mut self, record: &Record) -> ObjectArray {
        let first = self.core.operands[0].object_array_value(record);
        let second = self.core.operands[1].object_array_value(record);

        match self.op {
            SetOp::Union => {
                let seen = identity_set(&first);
                let mut result = first.clone();
                for element in second.iter() {
                    if !seen.contains(&Rc::as_ptr(element)) {
                        result.push_unchecked(element.clone());
                    }
                }
                result
            }
            SetOp::Intersection => {
                let keep = identity_set(&second);
                let mut result = ObjectArray::new();
                for element in first.iter() {
                    if keep.contains(&Rc::as_ptr(element)) {
                        result.push_unchecked(element.clone());
                    }
                }
                result
            }
            SetOp::Difference => {
                let drop = identity_set(&second);
                let mut result = ObjectArray::new();
                for element in first.iter() {
                    if !drop.contains(&Rc::as_ptr(element)) {
                        result.push_unchecked(element.clone());
                    }
                }
                result
            }
        }
    }
}

static TABLE_SUB_UNION_DEF: RuleDef = RuleDef {
    name: "TableSubUnion",
    label: "Union of the sub-tables of a table's elements",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_SUB_INTERSECTION_DEF: RuleDef = RuleDef {
    name: "TableSubIntersection",
    label: "Intersection of the sub-tables of a table's elements",
    result_type: DataType::ObjectArray,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

#[derive(Clone)]
struct TableSubSetRule {
    def: &'static RuleDef,
    core: RuleCore,
    union: bool,
}

impl TableSubSetRule {
    fn new(union: bool) -> TableSubSetRule {
        TableSubSetRule {
            def: if union { &TABLE_SUB_UNION_DEF } else { &TABLE_SUB_INTERSECTION_DEF },
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::ObjectArray).with_scope(OperandScope::Secondary),
            ]),
            union,
        }
    }
}

impl DerivationRule for TableSubSetRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_object_array(&mut self, record: &Record) -> ObjectArray {
        let table = self.core.operands[0].object_array_value(record);
        let sub_operand = &mut self.core.operands[1];

        if self.union {
            let mut seen: HashSet<*const Record> = HashSet::new();
            let mut result = ObjectArray::new();
            for element in table.iter() {
                for sub in sub_operand.object_array_value(element).iter() {
                    if seen.insert(Rc::as_ptr(sub)) {
                        result.push_unchecked(sub.clone());
                    }
                }
            }
            result
        } else {
            let mut iterator = table.iter();
            let Some(first) = iterator.next() else {
                return ObjectArray::new();
            };
            let mut result = sub_operand.object_array_value(first);
            for element in iterator {
                let keep = identity_set(&sub_operand.object_array_value(element));
                result = result
                    .iter()
                    .filter(|sub| keep.contains(&Rc::as_ptr(sub)))
                    .cloned()
                    .collect::<ObjectArray>();
            }
            result
        }
    }
}
