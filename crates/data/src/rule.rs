//! Derivation rule framework
//!
//! A rule computes the value of a derived attribute or block from
//! operands. Operands carry a declared type and an *origin*: a literal
//! constant, an attribute of the record's dictionary, or an owned
//! sub-rule. The rule hierarchy of the source system is re-architected as
//! concrete rule-family structs behind the small [`DerivationRule`]
//! capability trait; sub-rules are owned boxes, so the operand graph is a
//! tree and cycles can only arise through attribute references, which the
//! dictionary compile detects.
//!
//! Lifecycle: `check_definition` → `check_completeness` (against the
//! owning dictionary) → `check_operands_completeness` →
//! `check_block_attributes` (block rules) → `compile` (one-shot
//! optimization keyed by dictionary freshness) → `compute_*` per record.
//! Structure results live in a rule-owned buffer; `&mut self` on the
//! compute path makes "valid until the next call on this rule" a
//! borrow-checker fact rather than a comment.

use crate::dictionary::{DataItem, Dictionary, SchemaError};
use crate::record::Record;
use crate::value::{ObjectArray, Structure};
use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tabrule_core::{
    Continuous, ContinuousValueBlock, DataType, Date, IndexedKeyBlock, NewValueIndexes, Symbol,
    SymbolValueBlock, Text, Time, Timestamp, TimestampTz,
};

/// A literal operand payload. The source system only ever stores simple
/// constants; everything else is an attribute or a sub-rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Continuous(Continuous),
    Symbol(Symbol),
}

impl Constant {
    pub fn data_type(&self) -> DataType {
        match self {
            Constant::Continuous(_) => DataType::Continuous,
            Constant::Symbol(_) => DataType::Symbol,
        }
    }
}

/// Which record an operand is evaluated against (see multiple-scope rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandScope {
    Main,
    Secondary,
}

/// Where an operand's value comes from.
#[derive(Clone)]
pub enum Origin {
    /// Declared in a prototype, not yet bound. Rejected at check time.
    Unspecified,
    Constant(Constant),
    Attribute(String),
    Rule(Box<dyn DerivationRule>),
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Unspecified => write!(f, "Unspecified"),
            Origin::Constant(c) => write!(f, "Constant({:?})", c),
            Origin::Attribute(name) => write!(f, "Attribute({})", name),
            Origin::Rule(rule) => write!(f, "Rule({})", rule.name()),
        }
    }
}

/// One operand of a rule.
#[derive(Debug, Clone)]
pub struct Operand {
    data_type: DataType,
    structure_name: Option<&'static str>,
    scope: OperandScope,
    origin: Origin,
    slot: Option<usize>,
    item: Option<DataItem>,
}

impl Operand {
    pub fn new(data_type: DataType) -> Operand {
        Operand {
            data_type,
            structure_name: None,
            scope: OperandScope::Main,
            origin: Origin::Unspecified,
            slot: None,
            item: None,
        }
    }

    pub fn constant(constant: Constant) -> Operand {
        let data_type = constant.data_type();
        let mut operand = Operand::new(data_type);
        operand.origin = Origin::Constant(constant);
        operand
    }

    pub fn attribute(data_type: DataType, name: &str) -> Operand {
        let mut operand = Operand::new(data_type);
        operand.origin = Origin::Attribute(name.to_string());
        operand
    }

    pub fn rule(data_type: DataType, rule: Box<dyn DerivationRule>) -> Operand {
        let mut operand = Operand::new(data_type);
        operand.origin = Origin::Rule(rule);
        operand
    }

    pub fn with_scope(mut self, scope: OperandScope) -> Operand {
        self.scope = scope;
        self
    }

    pub fn with_structure_name(mut self, name: &'static str) -> Operand {
        self.structure_name = Some(name);
        self
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Re-declare the operand type. Only meaningful for rules whose
    /// operand signature is flexible (sort keys, per-type accessors).
    pub fn set_data_type(&mut self, data_type: DataType) {
        self.data_type = data_type;
    }

    pub fn structure_name(&self) -> Option<&'static str> {
        self.structure_name
    }

    pub fn scope(&self) -> OperandScope {
        self.scope
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
        self.slot = None;
        self.item = None;
    }

    pub fn attribute_name(&self) -> Option<&str> {
        match &self.origin {
            Origin::Attribute(name) => Some(name),
            _ => None,
        }
    }

    /// Copy of this operand's declared shape with the origin cleared,
    /// used to extend variable-operand rules.
    pub fn template_clone(&self) -> Operand {
        let mut clone = Operand::new(self.data_type);
        clone.structure_name = self.structure_name;
        clone.scope = self.scope;
        clone
    }

    /// Resolve this operand against the dictionary of its scope.
    pub fn check_completeness(
        &self,
        dictionary: &Dictionary,
        rule_name: &str,
    ) -> Result<(), SchemaError> {
        match &self.origin {
            Origin::Unspecified => Err(SchemaError::BadRule {
                rule: rule_name.to_string(),
                cause: "operand has no origin".to_string(),
            }),
            Origin::Constant(constant) => {
                if constant.data_type() != self.data_type {
                    return Err(SchemaError::TypeMismatch {
                        context: format!("constant operand of rule '{}'", rule_name),
                        expected: self.data_type.to_string(),
                        found: constant.data_type().to_string(),
                    });
                }
                Ok(())
            }
            Origin::Attribute(name) => {
                let item = dictionary.lookup_data_item(name).ok_or_else(|| {
                    SchemaError::UnknownDataItem {
                        dictionary: dictionary.name().to_string(),
                        name: name.clone(),
                    }
                })?;
                let (found, loaded) = match item {
                    DataItem::Attribute(index) => {
                        let attribute = dictionary.attribute_at(index);
                        (attribute.data_type(), attribute.is_loaded())
                    }
                    DataItem::Block(index) => {
                        let block = dictionary.block_at(index);
                        (block.data_type(), block.is_loaded())
                    }
                };
                if found != self.data_type {
                    return Err(SchemaError::TypeMismatch {
                        context: format!("operand '{}' of rule '{}'", name, rule_name),
                        expected: self.data_type.to_string(),
                        found: found.to_string(),
                    });
                }
                if !loaded {
                    return Err(SchemaError::BadRule {
                        rule: rule_name.to_string(),
                        cause: format!("referenced attribute '{}' is not loaded", name),
                    });
                }
                Ok(())
            }
            Origin::Rule(sub_rule) => {
                sub_rule.check_definition()?;
                if sub_rule.result_type() != self.data_type {
                    return Err(SchemaError::TypeMismatch {
                        context: format!(
                            "sub-rule '{}' used as operand of rule '{}'",
                            sub_rule.name(),
                            rule_name
                        ),
                        expected: self.data_type.to_string(),
                        found: sub_rule.result_type().to_string(),
                    });
                }
                if let (Some(expected), Some(found)) =
                    (self.structure_name, sub_rule.structure_name())
                    && expected != found
                {
                    return Err(SchemaError::TypeMismatch {
                        context: format!(
                            "structure operand of rule '{}' built by '{}'",
                            rule_name,
                            sub_rule.name()
                        ),
                        expected: expected.to_string(),
                        found: found.to_string(),
                    });
                }
                sub_rule.check_completeness(dictionary)?;
                sub_rule.check_operands_completeness(dictionary)
            }
        }
    }

    /// Bind the operand to its slot; called by the rule's compile.
    pub fn compile(&mut self, dictionary: &Dictionary) {
        self.slot = None;
        self.item = None;
        match &mut self.origin {
            Origin::Attribute(name) => match dictionary.lookup_data_item(name) {
                Some(DataItem::Attribute(index)) => {
                    self.item = Some(DataItem::Attribute(index));
                    self.slot = dictionary.attribute_at(index).load_index();
                }
                Some(DataItem::Block(index)) => {
                    self.item = Some(DataItem::Block(index));
                    self.slot = dictionary.block_at(index).load_index();
                }
                None => debug_assert!(false, "operand '{}' not resolved at compile", name),
            },
            Origin::Rule(sub_rule) => sub_rule.compile(dictionary),
            _ => {}
        }
    }

    /// Key block of an attribute-block operand, fetched through the
    /// record's dictionary (stable while the dictionary lives).
    pub fn source_key_block<'a>(&self, record: &'a Record) -> Option<&'a IndexedKeyBlock> {
        match self.item {
            Some(DataItem::Block(index)) => {
                Some(record.dictionary().block_at(index).key_block())
            }
            _ => None,
        }
    }

    // ---- typed accessors -------------------------------------------------

    pub fn continuous_value(&mut self, record: &Record) -> Continuous {
        match &mut self.origin {
            Origin::Constant(Constant::Continuous(value)) => *value,
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.continuous_at(slot),
                None => Continuous::MISSING,
            },
            Origin::Rule(rule) => rule.compute_continuous(record),
            _ => {
                debug_assert!(false, "operand is not continuous");
                Continuous::MISSING
            }
        }
    }

    pub fn symbol_value(&mut self, record: &Record) -> Symbol {
        match &mut self.origin {
            Origin::Constant(Constant::Symbol(value)) => value.clone(),
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.symbol_at(slot),
                None => Symbol::empty(),
            },
            Origin::Rule(rule) => rule.compute_symbol(record),
            _ => {
                debug_assert!(false, "operand is not a symbol");
                Symbol::empty()
            }
        }
    }

    pub fn date_value(&mut self, record: &Record) -> Date {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.date_at(slot),
                None => Date::default(),
            },
            Origin::Rule(rule) => rule.compute_date(record),
            _ => Date::default(),
        }
    }

    pub fn time_value(&mut self, record: &Record) -> Time {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.time_at(slot),
                None => Time::default(),
            },
            Origin::Rule(rule) => rule.compute_time(record),
            _ => Time::default(),
        }
    }

    pub fn timestamp_value(&mut self, record: &Record) -> Timestamp {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.timestamp_at(slot),
                None => Timestamp::default(),
            },
            Origin::Rule(rule) => rule.compute_timestamp(record),
            _ => Timestamp::default(),
        }
    }

    pub fn timestamp_tz_value(&mut self, record: &Record) -> TimestampTz {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.timestamp_tz_at(slot),
                None => TimestampTz::default(),
            },
            Origin::Rule(rule) => rule.compute_timestamp_tz(record),
            _ => TimestampTz::default(),
        }
    }

    pub fn text_value(&mut self, record: &Record) -> Text {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.text_at(slot),
                None => Text::default(),
            },
            Origin::Rule(rule) => rule.compute_text(record),
            _ => Text::default(),
        }
    }

    pub fn object_value(&mut self, record: &Record) -> Option<Rc<Record>> {
        match &mut self.origin {
            Origin::Attribute(_) => self.slot.and_then(|slot| record.object_at(slot)),
            Origin::Rule(rule) => rule.compute_object(record),
            _ => None,
        }
    }

    pub fn object_array_value(&mut self, record: &Record) -> ObjectArray {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => record.object_array_at(slot).clone(),
                None => ObjectArray::new(),
            },
            Origin::Rule(rule) => rule.compute_object_array(record),
            _ => ObjectArray::new(),
        }
    }

    pub fn structure_value<'a>(&'a mut self, record: &'a Record) -> Option<&'a Structure> {
        match &mut self.origin {
            Origin::Attribute(_) => {
                self.slot.and_then(|slot| record.structure_at(slot)).map(|rc| rc.as_ref())
            }
            Origin::Rule(rule) => Some(rule.compute_structure(record)),
            _ => {
                debug_assert!(false, "operand is not a structure");
                None
            }
        }
    }

    pub fn continuous_block_value<'a>(
        &'a mut self,
        record: &'a Record,
        target_keys: &IndexedKeyBlock,
    ) -> Cow<'a, ContinuousValueBlock> {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => Cow::Borrowed(record.continuous_block_at(slot)),
                None => Cow::Owned(ContinuousValueBlock::empty()),
            },
            Origin::Rule(rule) => Cow::Owned(rule.compute_continuous_block(record, target_keys)),
            _ => Cow::Owned(ContinuousValueBlock::empty()),
        }
    }

    pub fn symbol_block_value<'a>(
        &'a mut self,
        record: &'a Record,
        target_keys: &IndexedKeyBlock,
    ) -> Cow<'a, SymbolValueBlock> {
        match &mut self.origin {
            Origin::Attribute(_) => match self.slot {
                Some(slot) => Cow::Borrowed(record.symbol_block_at(slot)),
                None => Cow::Owned(SymbolValueBlock::empty()),
            },
            Origin::Rule(rule) => Cow::Owned(rule.compute_symbol_block(record, target_keys)),
            _ => Cow::Owned(SymbolValueBlock::empty()),
        }
    }
}

/// Static metadata of one registered rule.
#[derive(Debug)]
pub struct RuleDef {
    pub name: &'static str,
    pub label: &'static str,
    pub result_type: DataType,
    pub structure_name: Option<&'static str>,
    pub variable_operands: bool,
    pub multiple_scope: bool,
}

/// Mutable state every rule instance carries.
#[derive(Clone, Default)]
pub struct RuleCore {
    pub operands: Vec<Operand>,
    pub compile_freshness: Option<u64>,
}

impl RuleCore {
    pub fn with_operands(operands: Vec<Operand>) -> RuleCore {
        RuleCore { operands, compile_freshness: None }
    }
}

/// The capability trait every rule family implements.
///
/// `compute_*` pre-conditions: the rule is compiled against the record's
/// dictionary. Rules must be pure with respect to `(record, operands)`;
/// internal caches keyed by compile freshness or block identity are fine.
pub trait DerivationRule {
    fn def(&self) -> &'static RuleDef;
    fn core(&self) -> &RuleCore;
    fn core_mut(&mut self) -> &mut RuleCore;
    fn clone_rule(&self) -> Box<dyn DerivationRule>;

    fn name(&self) -> &'static str {
        self.def().name
    }

    fn label(&self) -> &'static str {
        self.def().label
    }

    fn result_type(&self) -> DataType {
        self.def().result_type
    }

    fn structure_name(&self) -> Option<&'static str> {
        self.def().structure_name
    }

    fn operands(&self) -> &[Operand] {
        &self.core().operands
    }

    fn operands_mut(&mut self) -> &mut Vec<Operand> {
        &mut self.core_mut().operands
    }

    fn is_compiled(&self) -> bool {
        self.core().compile_freshness.is_some()
    }

    /// Dictionary sub-records of this rule's table operand belong to.
    /// Multiple-scope rules override this to resolve secondary operands.
    fn secondary_scope_dictionary(&self, _dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        None
    }

    /// Self-consistency of the declared shape. Rule families fix their
    /// shape at construction, so the default accepts.
    fn check_definition(&self) -> Result<(), SchemaError> {
        Ok(())
    }

    /// Resolve every operand against its scope's dictionary.
    fn check_completeness(&self, dictionary: &Dictionary) -> Result<(), SchemaError> {
        let secondary = if self.def().multiple_scope {
            self.secondary_scope_dictionary(dictionary)
        } else {
            None
        };
        for operand in self.operands() {
            match operand.scope() {
                OperandScope::Main => operand.check_completeness(dictionary, self.name())?,
                OperandScope::Secondary => {
                    let scope = secondary.as_ref().ok_or_else(|| SchemaError::BadRule {
                        rule: self.name().to_string(),
                        cause: "cannot resolve the secondary scope of the table operand"
                            .to_string(),
                    })?;
                    operand.check_completeness(scope, self.name())?;
                }
            }
        }
        Ok(())
    }

    /// Deeper per-rule operand checks (parseable constants, key
    /// arity, …). Default: nothing further.
    fn check_operands_completeness(&self, _dictionary: &Dictionary) -> Result<(), SchemaError> {
        Ok(())
    }

    /// For block-producing rules: the declared VarKey range must cover the
    /// member variables of the attribute block the rule derives.
    fn check_block_attributes(
        &self,
        _dictionary: &Dictionary,
        _block: &crate::dictionary::AttributeBlock,
    ) -> Result<(), SchemaError> {
        Ok(())
    }

    /// One-shot optimization; idempotent per dictionary freshness.
    fn compile(&mut self, dictionary: &Dictionary) {
        if self.core().compile_freshness == Some(dictionary.freshness()) {
            return;
        }
        let secondary = if self.def().multiple_scope {
            self.secondary_scope_dictionary(dictionary)
        } else {
            None
        };
        for operand in self.core_mut().operands.iter_mut() {
            match operand.scope() {
                OperandScope::Main => operand.compile(dictionary),
                OperandScope::Secondary => {
                    if let Some(scope) = &secondary {
                        operand.compile(scope);
                    }
                }
            }
        }
        self.compile_rule(dictionary);
        self.core_mut().compile_freshness = Some(dictionary.freshness());
    }

    /// Rule-specific part of [`compile`](Self::compile).
    fn compile_rule(&mut self, _dictionary: &Dictionary) {}

    // ---- typed evaluation entry points ----------------------------------
    //
    // A rule implements the one matching its declared result type. The
    // defaults debug-assert (the dictionary compile guarantees they are
    // unreachable) and return the type's reset value on release data.

    fn compute_continuous(&mut self, _record: &Record) -> Continuous {
        debug_assert!(false, "rule '{}' does not produce a continuous value", self.name());
        Continuous::MISSING
    }

    fn compute_symbol(&mut self, _record: &Record) -> Symbol {
        debug_assert!(false, "rule '{}' does not produce a symbol value", self.name());
        Symbol::empty()
    }

    fn compute_date(&mut self, _record: &Record) -> Date {
        debug_assert!(false, "rule '{}' does not produce a date value", self.name());
        Date::default()
    }

    fn compute_time(&mut self, _record: &Record) -> Time {
        debug_assert!(false, "rule '{}' does not produce a time value", self.name());
        Time::default()
    }

    fn compute_timestamp(&mut self, _record: &Record) -> Timestamp {
        debug_assert!(false, "rule '{}' does not produce a timestamp value", self.name());
        Timestamp::default()
    }

    fn compute_timestamp_tz(&mut self, _record: &Record) -> TimestampTz {
        debug_assert!(false, "rule '{}' does not produce a timestamp-tz value", self.name());
        TimestampTz::default()
    }

    fn compute_text(&mut self, _record: &Record) -> Text {
        debug_assert!(false, "rule '{}' does not produce a text value", self.name());
        Text::default()
    }

    fn compute_object(&mut self, _record: &Record) -> Option<Rc<Record>> {
        debug_assert!(false, "rule '{}' does not produce an object value", self.name());
        None
    }

    fn compute_object_array(&mut self, _record: &Record) -> ObjectArray {
        debug_assert!(false, "rule '{}' does not produce an object array", self.name());
        ObjectArray::new()
    }

    /// Structure results borrow a rule-owned buffer, valid until the next
    /// call on this rule.
    fn compute_structure<'a>(&'a mut self, _record: &'a Record) -> &'a Structure {
        debug_assert!(false, "rule '{}' does not produce a structure", self.name());
        empty_structure()
    }

    fn compute_continuous_block(
        &mut self,
        _record: &Record,
        _target_keys: &IndexedKeyBlock,
    ) -> ContinuousValueBlock {
        debug_assert!(false, "rule '{}' does not produce a continuous block", self.name());
        ContinuousValueBlock::empty()
    }

    fn compute_symbol_block(
        &mut self,
        _record: &Record,
        _target_keys: &IndexedKeyBlock,
    ) -> SymbolValueBlock {
        debug_assert!(false, "rule '{}' does not produce a symbol block", self.name());
        SymbolValueBlock::empty()
    }
}

fn empty_structure() -> &'static Structure {
    static EMPTY: std::sync::OnceLock<Structure> = std::sync::OnceLock::new();
    EMPTY.get_or_init(|| Structure::ContinuousVector(Vec::new()))
}

impl Clone for Box<dyn DerivationRule> {
    fn clone(&self) -> Self {
        self.clone_rule()
    }
}

/// Resize a variable-operand rule by cloning the trailing operand's shape.
/// Returns false when the rule has a fixed shape and `count` differs.
pub fn set_operand_count(rule: &mut dyn DerivationRule, count: usize) -> bool {
    if !rule.def().variable_operands {
        return count == rule.operands().len();
    }
    let operands = rule.operands_mut();
    if operands.is_empty() || count == 0 {
        return false;
    }
    while operands.len() > count {
        operands.pop();
    }
    while operands.len() < count {
        let template = operands.last().expect("non-empty operand list").template_clone();
        operands.push(template);
    }
    true
}

/// Main-scope attribute names a rule tree reads, for the dictionary's
/// dependency graph. Secondary-scope operands resolve against another
/// dictionary and cannot create derivation cycles here.
pub fn collect_main_scope_attribute_refs(rule: &dyn DerivationRule, out: &mut Vec<String>) {
    for operand in rule.operands() {
        if operand.scope() != OperandScope::Main {
            continue;
        }
        match operand.origin() {
            Origin::Attribute(name) => out.push(name.clone()),
            Origin::Rule(sub_rule) => collect_main_scope_attribute_refs(sub_rule.as_ref(), out),
            _ => {}
        }
    }
}

/// Dictionary of the sub-records produced or iterated by a relation
/// operand, resolved through attribute references and sub-rules.
pub fn relation_operand_class(
    operand: &Operand,
    dictionary: &Dictionary,
) -> Option<Arc<Dictionary>> {
    match operand.origin() {
        Origin::Attribute(name) => {
            dictionary.lookup_attribute(name).and_then(|a| a.object_class().cloned())
        }
        Origin::Rule(sub_rule) => {
            // Table rules produce sub-records of their own first relation
            // operand's class.
            sub_rule
                .operands()
                .iter()
                .find(|op| op.data_type().is_relation())
                .and_then(|op| relation_operand_class(op, dictionary))
        }
        _ => None,
    }
}

/// Consumer-dependent block layout computed by `dynamic_compile` on the
/// first evaluation after compile: maps source sparse indexes to target
/// sparse indexes, `-1` dropping entries.
#[derive(Debug, Clone, Default)]
pub struct BlockLayoutMap {
    source_token: usize,
    target_token: usize,
    pub new_value_indexes: NewValueIndexes,
    pub same_value_indexes: bool,
}

impl BlockLayoutMap {
    /// Rebuild the mapping when the (source, target) pair changed.
    pub fn ensure(&mut self, source: &IndexedKeyBlock, target: &IndexedKeyBlock) {
        let source_token = source as *const IndexedKeyBlock as usize;
        let target_token = target as *const IndexedKeyBlock as usize;
        if self.source_token == source_token && self.target_token == target_token {
            return;
        }
        self.source_token = source_token;
        self.target_token = target_token;
        self.new_value_indexes = (0..source.key_count())
            .map(|index| match target.key_index(source.key_at(index)) {
                Some(mapped) => mapped as i32,
                None => -1,
            })
            .collect();
        self.same_value_indexes = source.key_count() == target.key_count()
            && self.new_value_indexes.iter().enumerate().all(|(i, m)| *m == i as i32);
    }
}

/// The closed, registered rule set. Lookup clones the prototype.
pub struct RuleRegistry {
    rules: HashMap<&'static str, Box<dyn DerivationRule>>,
}

impl RuleRegistry {
    pub fn new() -> RuleRegistry {
        RuleRegistry { rules: HashMap::new() }
    }

    /// Registry preloaded with the whole standard library.
    pub fn with_standard_rules() -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        crate::rules::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, rule: Box<dyn DerivationRule>) {
        let name = rule.name();
        let previous = self.rules.insert(name, rule);
        debug_assert!(previous.is_none(), "rule '{}' registered twice", name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Box<dyn DerivationRule>> {
        self.rules.get(name).map(|rule| rule.clone_rule())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        RuleRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::value::Value;

    fn compiled_dictionary() -> Arc<Dictionary> {
        let mut dict = Dictionary::new("Sample");
        dict.add_attribute(Attribute::new("x", DataType::Continuous));
        dict.add_attribute(Attribute::new("name", DataType::Symbol));
        dict.compile().unwrap();
        Arc::new(dict)
    }

    #[test]
    fn test_constant_operand_evaluation() {
        let dict = compiled_dictionary();
        let record = Record::new(dict.clone(), 0);

        let mut operand = Operand::constant(Constant::Continuous(Continuous::new(4.5)));
        operand.compile(&dict);
        assert_eq!(operand.continuous_value(&record), Continuous::new(4.5));
    }

    #[test]
    fn test_attribute_operand_evaluation() {
        let dict = compiled_dictionary();
        let slot = dict.lookup_attribute("x").unwrap().load_index().unwrap();
        let mut record = Record::new(dict.clone(), 0);
        record.set_value_at(slot, Value::Continuous(Continuous::new(7.0)));

        let mut operand = Operand::attribute(DataType::Continuous, "x");
        operand.compile(&dict);
        assert_eq!(operand.continuous_value(&record), Continuous::new(7.0));
    }

    #[test]
    fn test_unspecified_origin_rejected() {
        let dict = compiled_dictionary();
        let operand = Operand::new(DataType::Continuous);
        assert!(matches!(
            operand.check_completeness(&dict, "Test"),
            Err(SchemaError::BadRule { .. })
        ));
    }

    #[test]
    fn test_operand_type_check() {
        let dict = compiled_dictionary();
        let operand = Operand::attribute(DataType::Continuous, "name");
        assert!(matches!(
            operand.check_completeness(&dict, "Test"),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_registry_lookup_clones_prototype() {
        let registry = RuleRegistry::with_standard_rules();
        let mut a = registry.lookup("Copy").unwrap();
        let b = registry.lookup("Copy").unwrap();
        a.operands_mut()[0].set_origin(Origin::Attribute("x".to_string()));
        // The second clone still has the unbound prototype operand.
        assert!(matches!(b.operands()[0].origin(), Origin::Unspecified));
    }

    #[test]
    fn test_set_operand_count() {
        let registry = RuleRegistry::with_standard_rules();
        let mut sum = registry.lookup("Sum").unwrap();
        assert!(set_operand_count(sum.as_mut(), 4));
        assert_eq!(sum.operands().len(), 4);

        let mut copy = registry.lookup("Copy").unwrap();
        assert!(!set_operand_count(copy.as_mut(), 3));
    }

    #[test]
    fn test_block_layout_map() {
        use tabrule_core::{VarKey, VarKeyType};
        let source = IndexedKeyBlock::from_keys(
            VarKeyType::Integer,
            [1, 2, 3].iter().map(|n| VarKey::Integer(*n)),
        )
        .unwrap();
        let target = IndexedKeyBlock::from_keys(
            VarKeyType::Integer,
            [3, 1].iter().map(|n| VarKey::Integer(*n)),
        )
        .unwrap();

        let mut layout = BlockLayoutMap::default();
        layout.ensure(&source, &target);
        assert_eq!(layout.new_value_indexes, vec![1, -1, 0]);
        assert!(!layout.same_value_indexes);

        let mut identity = BlockLayoutMap::default();
        identity.ensure(&source, &source);
        assert!(identity.same_value_indexes);
    }
}
