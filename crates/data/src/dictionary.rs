//! Dictionaries: typed schemas with derivation rules
//!
//! A [`Dictionary`] declares attributes (dense fields) and attribute
//! blocks (groups of sparse variables sharing a key space). Building is
//! mutable; [`Dictionary::compile`] validates the whole schema, assigns
//! load indexes, orders derived fields for evaluation, and freezes the
//! dictionary. Every check failure is a distinct [`SchemaError`] so the
//! caller can report precisely what is wrong before any data is read.

use crate::rule::{self, DerivationRule};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tabrule_core::{
    Continuous, DataType, IndexedKeyBlock, KeyError, Symbol, VarKey, VarKeyType, check_format,
};
use thiserror::Error;

/// Schema compilation failures.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate name '{0}'")]
    DuplicateName(String),
    #[error("dictionary '{dictionary}' has no data item named '{name}'")]
    UnknownDataItem { dictionary: String, name: String },
    #[error("{context}: expected {expected}, found {found}")]
    TypeMismatch { context: String, expected: String, found: String },
    #[error("cyclic derivation through attribute '{0}'")]
    CyclicDerivation(String),
    #[error("root dictionary '{0}' must declare a key")]
    EmptyRootKey(String),
    #[error("key attribute '{0}' must be native, not derived")]
    DerivedKeyAttribute(String),
    #[error("key attribute '{0}' must be of Symbol type")]
    KeyTypeInvalid(String),
    #[error("key attributes of root dictionary '{0}' must come first in field order")]
    KeyNotPrefix(String),
    #[error("attribute '{attribute}' has invalid format '{format}'")]
    BadFormat { attribute: String, format: String },
    #[error("attribute block '{block}' key error")]
    BlockKey {
        block: String,
        #[source]
        source: KeyError,
    },
    #[error("rule '{rule}': {cause}")]
    BadRule { rule: String, cause: String },
    #[error("dictionary '{0}' is not compiled")]
    NotCompiled(String),
}

/// A named dense field.
pub struct Attribute {
    name: String,
    data_type: DataType,
    structure_name: Option<String>,
    object_class: Option<Arc<Dictionary>>,
    rule: Option<Box<dyn DerivationRule>>,
    loaded: bool,
    key: bool,
    format: Option<String>,
    load_index: Option<usize>,
}

impl Attribute {
    pub fn new(name: &str, data_type: DataType) -> Attribute {
        Attribute {
            name: name.to_string(),
            data_type,
            structure_name: None,
            object_class: None,
            rule: None,
            loaded: true,
            key: false,
            format: None,
            load_index: None,
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn DerivationRule>) -> Attribute {
        self.rule = Some(rule);
        self
    }

    pub fn with_format(mut self, format: &str) -> Attribute {
        self.format = Some(format.to_string());
        self
    }

    pub fn with_object_class(mut self, class: Arc<Dictionary>) -> Attribute {
        self.object_class = Some(class);
        self
    }

    pub fn with_structure_name(mut self, name: &str) -> Attribute {
        self.structure_name = Some(name.to_string());
        self
    }

    pub fn unloaded(mut self) -> Attribute {
        self.loaded = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn structure_name(&self) -> Option<&str> {
        self.structure_name.as_deref()
    }

    pub fn object_class(&self) -> Option<&Arc<Dictionary>> {
        self.object_class.as_ref()
    }

    pub fn rule(&self) -> Option<&dyn DerivationRule> {
        self.rule.as_deref()
    }

    pub fn is_derived(&self) -> bool {
        self.rule.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_key(&self) -> bool {
        self.key
    }

    /// Formatting metadata; temporal types fall back to their defaults.
    pub fn format(&self) -> &str {
        if let Some(format) = &self.format {
            return format;
        }
        match self.data_type {
            DataType::Date => tabrule_core::temporal::DEFAULT_DATE_FORMAT,
            DataType::Time => tabrule_core::temporal::DEFAULT_TIME_FORMAT,
            DataType::Timestamp => tabrule_core::temporal::DEFAULT_TIMESTAMP_FORMAT,
            DataType::TimestampTz => tabrule_core::temporal::DEFAULT_TIMESTAMP_TZ_FORMAT,
            _ => "",
        }
    }

    /// Dense slot in the record, assigned at compile for loaded attributes.
    pub fn load_index(&self) -> Option<usize> {
        self.load_index
    }
}

/// Default value shared by every member of a block.
#[derive(Debug, Clone)]
pub enum BlockDefault {
    Continuous(Continuous),
    Symbol(Symbol),
}

impl BlockDefault {
    pub fn data_type(&self) -> DataType {
        match self {
            BlockDefault::Continuous(_) => DataType::ContinuousValueBlock,
            BlockDefault::Symbol(_) => DataType::SymbolValueBlock,
        }
    }
}

/// One sparse variable inside a block.
#[derive(Debug, Clone)]
pub struct BlockMember {
    pub name: String,
    pub var_key: VarKey,
}

/// A named group of sparse variables sharing a key space.
pub struct AttributeBlock {
    name: String,
    data_type: DataType,
    var_key_type: VarKeyType,
    members: Vec<BlockMember>,
    default: BlockDefault,
    rule: Option<Box<dyn DerivationRule>>,
    loaded: bool,
    key_block: IndexedKeyBlock,
    load_index: Option<usize>,
}

impl AttributeBlock {
    pub fn new(name: &str, data_type: DataType, var_key_type: VarKeyType) -> AttributeBlock {
        debug_assert!(data_type.is_block());
        let default = match data_type {
            DataType::SymbolValueBlock => BlockDefault::Symbol(Symbol::empty()),
            _ => BlockDefault::Continuous(Continuous::ZERO),
        };
        AttributeBlock {
            name: name.to_string(),
            data_type,
            var_key_type,
            members: Vec::new(),
            default,
            rule: None,
            loaded: true,
            key_block: IndexedKeyBlock::new(var_key_type),
            load_index: None,
        }
    }

    pub fn add_member(mut self, name: &str, var_key: VarKey) -> AttributeBlock {
        self.members.push(BlockMember { name: name.to_string(), var_key });
        self
    }

    pub fn with_default(mut self, default: BlockDefault) -> AttributeBlock {
        self.default = default;
        self
    }

    pub fn with_rule(mut self, rule: Box<dyn DerivationRule>) -> AttributeBlock {
        self.rule = Some(rule);
        self
    }

    pub fn unloaded(mut self) -> AttributeBlock {
        self.loaded = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn var_key_type(&self) -> VarKeyType {
        self.var_key_type
    }

    pub fn members(&self) -> &[BlockMember] {
        &self.members
    }

    pub fn default(&self) -> &BlockDefault {
        &self.default
    }

    pub fn default_continuous(&self) -> Continuous {
        match &self.default {
            BlockDefault::Continuous(value) => *value,
            BlockDefault::Symbol(_) => Continuous::ZERO,
        }
    }

    pub fn default_symbol(&self) -> Symbol {
        match &self.default {
            BlockDefault::Symbol(value) => value.clone(),
            BlockDefault::Continuous(_) => Symbol::empty(),
        }
    }

    pub fn rule(&self) -> Option<&dyn DerivationRule> {
        self.rule.as_deref()
    }

    pub fn is_derived(&self) -> bool {
        self.rule.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Key block mapping member VarKeys to sparse indexes (compiled).
    pub fn key_block(&self) -> &IndexedKeyBlock {
        &self.key_block
    }

    pub fn load_index(&self) -> Option<usize> {
        self.load_index
    }
}

/// Reference to an attribute or a block, by position in the dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataItem {
    Attribute(usize),
    Block(usize),
}

/// A typed schema: the unit the driver binds files against.
pub struct Dictionary {
    name: String,
    root: bool,
    attributes: Vec<Attribute>,
    blocks: Vec<AttributeBlock>,
    attribute_index: HashMap<String, usize>,
    block_index: HashMap<String, usize>,
    declaration: Vec<DataItem>,
    key_names: Vec<String>,
    compiled: bool,
    freshness: u64,
    dense_slot_count: usize,
    block_slot_count: usize,
    evaluation_order: Vec<DataItem>,
}

impl Dictionary {
    pub fn new(name: &str) -> Dictionary {
        Dictionary {
            name: name.to_string(),
            root: false,
            attributes: Vec::new(),
            blocks: Vec::new(),
            attribute_index: HashMap::new(),
            block_index: HashMap::new(),
            declaration: Vec::new(),
            key_names: Vec::new(),
            compiled: false,
            freshness: 0,
            dense_slot_count: 0,
            block_slot_count: 0,
            evaluation_order: Vec::new(),
        }
    }

    pub fn set_root(&mut self, root: bool) {
        self.root = root;
        self.compiled = false;
    }

    pub fn set_key(&mut self, names: &[&str]) {
        self.key_names = names.iter().map(|n| n.to_string()).collect();
        self.compiled = false;
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.declaration.push(DataItem::Attribute(self.attributes.len()));
        self.attributes.push(attribute);
        self.compiled = false;
    }

    pub fn add_block(&mut self, block: AttributeBlock) {
        self.declaration.push(DataItem::Block(self.blocks.len()));
        self.blocks.push(block);
        self.compiled = false;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn key_names(&self) -> &[String] {
        &self.key_names
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Bumped on each successful compile of a modified dictionary; rules
    /// compare it to decide whether their caches are stale.
    pub fn freshness(&self) -> u64 {
        self.freshness
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute_at(&self, index: usize) -> &Attribute {
        &self.attributes[index]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_at(&self, index: usize) -> &AttributeBlock {
        &self.blocks[index]
    }

    pub fn lookup_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attribute_index.get(name).map(|i| &self.attributes[*i])
    }

    pub fn lookup_attribute_block(&self, name: &str) -> Option<&AttributeBlock> {
        self.block_index.get(name).map(|i| &self.blocks[*i])
    }

    /// Attribute-or-block lookup by name.
    pub fn lookup_data_item(&self, name: &str) -> Option<DataItem> {
        if let Some(index) = self.attribute_index.get(name) {
            return Some(DataItem::Attribute(*index));
        }
        self.block_index.get(name).map(|index| DataItem::Block(*index))
    }

    /// Declaration order of attributes and blocks.
    pub fn declaration(&self) -> &[DataItem] {
        &self.declaration
    }

    /// Native loaded-or-key items in declaration order: the logical field
    /// order of a file without a header.
    pub fn native_field_order(&self) -> Vec<DataItem> {
        self.declaration
            .iter()
            .copied()
            .filter(|item| match item {
                DataItem::Attribute(i) => !self.attributes[*i].is_derived(),
                DataItem::Block(i) => !self.blocks[*i].is_derived(),
            })
            .collect()
    }

    pub fn dense_slot_count(&self) -> usize {
        self.dense_slot_count
    }

    pub fn block_slot_count(&self) -> usize {
        self.block_slot_count
    }

    /// Derived items in dependency order (compiled).
    pub fn evaluation_order(&self) -> &[DataItem] {
        &self.evaluation_order
    }

    /// Validate the whole schema and freeze it. Idempotent: recompiling an
    /// unmodified dictionary is a no-op.
    pub fn compile(&mut self) -> Result<(), SchemaError> {
        if self.compiled {
            return Ok(());
        }

        self.build_name_indexes()?;
        self.check_keys()?;
        self.build_key_blocks()?;
        self.check_formats()?;
        self.check_rules()?;
        self.evaluation_order = self.order_derivations()?;
        self.assign_load_indexes();

        self.compiled = true;
        self.freshness += 1;
        Ok(())
    }

    fn build_name_indexes(&mut self) -> Result<(), SchemaError> {
        let mut seen: HashSet<&str> = HashSet::new();
        self.attribute_index.clear();
        self.block_index.clear();

        for (index, attribute) in self.attributes.iter().enumerate() {
            if !seen.insert(&attribute.name) {
                return Err(SchemaError::DuplicateName(attribute.name.clone()));
            }
            self.attribute_index.insert(attribute.name.clone(), index);
        }
        for (index, block) in self.blocks.iter().enumerate() {
            if !seen.insert(&block.name) {
                return Err(SchemaError::DuplicateName(block.name.clone()));
            }
            for member in &block.members {
                if !seen.insert(&member.name) {
                    return Err(SchemaError::DuplicateName(member.name.clone()));
                }
            }
            self.block_index.insert(block.name.clone(), index);
        }
        Ok(())
    }

    fn check_keys(&mut self) -> Result<(), SchemaError> {
        if self.root && self.key_names.is_empty() {
            return Err(SchemaError::EmptyRootKey(self.name.clone()));
        }

        for name in &self.key_names {
            let index = self.attribute_index.get(name).ok_or_else(|| {
                SchemaError::UnknownDataItem { dictionary: self.name.clone(), name: name.clone() }
            })?;
            let attribute = &self.attributes[*index];
            if attribute.data_type != DataType::Symbol {
                return Err(SchemaError::KeyTypeInvalid(name.clone()));
            }
            if attribute.is_derived() {
                return Err(SchemaError::DerivedKeyAttribute(name.clone()));
            }
        }
        for attribute in &mut self.attributes {
            attribute.key = self.key_names.contains(&attribute.name);
        }

        // A root key must be readable without parsing the rest of a line:
        // the key attributes are the first native fields, in key order.
        if self.root {
            let native: Vec<&str> = self
                .declaration
                .iter()
                .filter_map(|item| match item {
                    DataItem::Attribute(i) if !self.attributes[*i].is_derived() => {
                        Some(self.attributes[*i].name.as_str())
                    }
                    _ => None,
                })
                .collect();
            for (position, key_name) in self.key_names.iter().enumerate() {
                if native.get(position).copied() != Some(key_name.as_str()) {
                    return Err(SchemaError::KeyNotPrefix(self.name.clone()));
                }
            }
        }
        Ok(())
    }

    fn build_key_blocks(&mut self) -> Result<(), SchemaError> {
        for block in &mut self.blocks {
            let mut key_block = IndexedKeyBlock::new(block.var_key_type);
            for member in &block.members {
                key_block.add_key(member.var_key.clone()).map_err(|source| {
                    SchemaError::BlockKey { block: block.name.clone(), source }
                })?;
            }
            if block.default.data_type() != block.data_type {
                return Err(SchemaError::TypeMismatch {
                    context: format!("default value of block '{}'", block.name),
                    expected: block.data_type.to_string(),
                    found: block.default.data_type().to_string(),
                });
            }
            block.key_block = key_block;
        }
        Ok(())
    }

    fn check_formats(&self) -> Result<(), SchemaError> {
        for attribute in &self.attributes {
            if let Some(format) = &attribute.format
                && !check_format(format)
            {
                return Err(SchemaError::BadFormat {
                    attribute: attribute.name.clone(),
                    format: format.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_rules(&self) -> Result<(), SchemaError> {
        for attribute in &self.attributes {
            let Some(rule) = attribute.rule() else { continue };
            rule.check_definition()?;
            if rule.result_type() != attribute.data_type {
                return Err(SchemaError::TypeMismatch {
                    context: format!(
                        "result of rule '{}' deriving attribute '{}'",
                        rule.name(),
                        attribute.name
                    ),
                    expected: attribute.data_type.to_string(),
                    found: rule.result_type().to_string(),
                });
            }
            rule.check_completeness(self)?;
            rule.check_operands_completeness(self)?;
        }
        for block in &self.blocks {
            let Some(rule) = block.rule() else { continue };
            rule.check_definition()?;
            if rule.result_type() != block.data_type {
                return Err(SchemaError::TypeMismatch {
                    context: format!(
                        "result of rule '{}' deriving block '{}'",
                        rule.name(),
                        block.name
                    ),
                    expected: block.data_type.to_string(),
                    found: rule.result_type().to_string(),
                });
            }
            rule.check_completeness(self)?;
            rule.check_operands_completeness(self)?;
            rule.check_block_attributes(self, block)?;
        }
        Ok(())
    }

    /// Topological order of derived items; detects derivation cycles.
    fn order_derivations(&self) -> Result<Vec<DataItem>, SchemaError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        // Derived items addressed by name for the dependency walk.
        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut derived: Vec<(String, DataItem, Vec<String>)> = Vec::new();
        for (index, attribute) in self.attributes.iter().enumerate() {
            if let Some(rule) = attribute.rule() {
                let mut refs = Vec::new();
                rule::collect_main_scope_attribute_refs(rule, &mut refs);
                derived.push((attribute.name.clone(), DataItem::Attribute(index), refs));
                marks.insert(attribute.name.clone(), Mark::White);
            }
        }
        for (index, block) in self.blocks.iter().enumerate() {
            if let Some(rule) = block.rule() {
                let mut refs = Vec::new();
                rule::collect_main_scope_attribute_refs(rule, &mut refs);
                derived.push((block.name.clone(), DataItem::Block(index), refs));
                marks.insert(block.name.clone(), Mark::White);
            }
        }

        let by_name: HashMap<&str, usize> =
            derived.iter().enumerate().map(|(i, (name, _, _))| (name.as_str(), i)).collect();

        let mut order = Vec::new();
        // Iterative DFS so deep rule chains cannot blow the stack.
        for start in 0..derived.len() {
            if marks[&derived[start].0] != Mark::White {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks.insert(derived[start].0.clone(), Mark::Grey);
            while let Some((node, mut edge)) = stack.pop() {
                let mut descended = false;
                while edge < derived[node].2.len() {
                    let target = derived[node].2[edge].clone();
                    edge += 1;
                    let Some(&next) = by_name.get(target.as_str()) else { continue };
                    match marks[&derived[next].0] {
                        Mark::Grey => {
                            return Err(SchemaError::CyclicDerivation(target));
                        }
                        Mark::White => {
                            marks.insert(derived[next].0.clone(), Mark::Grey);
                            stack.push((node, edge));
                            stack.push((next, 0));
                            descended = true;
                            break;
                        }
                        Mark::Black => {}
                    }
                }
                if !descended && edge >= derived[node].2.len() {
                    marks.insert(derived[node].0.clone(), Mark::Black);
                    order.push(derived[node].1);
                }
            }
        }
        Ok(order)
    }

    fn assign_load_indexes(&mut self) {
        let mut dense = 0;
        for attribute in &mut self.attributes {
            attribute.load_index = if attribute.loaded {
                let index = dense;
                dense += 1;
                Some(index)
            } else {
                None
            };
        }
        let mut sparse = 0;
        for block in &mut self.blocks {
            block.load_index = if block.loaded {
                let index = sparse;
                sparse += 1;
                Some(index)
            } else {
                None
            };
        }
        self.dense_slot_count = dense;
        self.block_slot_count = sparse;
    }
}
