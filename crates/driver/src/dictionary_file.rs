//! Dictionary JSON loader
//!
//! The dictionary pretty-printer and its surface syntax stay external
//! collaborators; this module realizes the interface as a serde model: a
//! JSON file declares dictionaries, their attributes and blocks, and
//! derivation expressions naming registered rules. The loader builds
//! rule trees through the [`RuleRegistry`] and compiles every
//! dictionary, resolving cross-dictionary class references bottom-up.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tabrule_core::{Continuous, DataType, Symbol, VarKey, VarKeyType};
use tabrule_data::dictionary::{Attribute, AttributeBlock, BlockDefault, Dictionary, SchemaError};
use tabrule_data::rule::{Constant, DerivationRule, Origin, RuleRegistry, set_operand_count};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid dictionary file")]
    Json(#[from] serde_json::Error),
    #[error("unknown rule '{0}'")]
    UnknownRule(String),
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("dictionary '{dictionary}' references unknown class '{class}'")]
    UnknownClass { dictionary: String, class: String },
    #[error("rule '{rule}' does not accept {count} operands")]
    OperandCount { rule: String, count: usize },
    #[error("invalid VarKey '{0}'")]
    BadVarKey(String),
    #[error("cyclic class references involving '{0}'")]
    CyclicClassReference(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Top level of a dictionary file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryFileSpec {
    pub dictionaries: Vec<DictionarySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionarySpec {
    pub name: String,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    #[serde(default)]
    pub blocks: Vec<BlockSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_true")]
    pub loaded: bool,
    #[serde(default)]
    pub format: Option<String>,
    /// Sub-dictionary name for Object/ObjectArray attributes.
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub derivation: Option<ExpressionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub var_key_type: String,
    #[serde(default = "default_true")]
    pub loaded: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    pub members: Vec<MemberSpec>,
    #[serde(default)]
    pub derivation: Option<ExpressionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSpec {
    pub name: String,
    pub var_key: serde_json::Value,
}

/// A derivation expression: a registered rule applied to operands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionSpec {
    pub rule: String,
    #[serde(default)]
    pub operands: Vec<OperandSpec>,
}

/// Operand forms, discriminated by their JSON key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperandSpec {
    Expression(ExpressionSpec),
    Field {
        field: String,
        /// Optional declared-type override for flexible operand slots
        /// (sort keys).
        #[serde(rename = "as", default)]
        as_type: Option<String>,
    },
    Number { value: f64 },
    Text { symbol: String },
}

fn default_true() -> bool {
    true
}

/// Parse a dictionary file from JSON text.
pub fn parse_dictionary_file(json: &str) -> Result<DictionaryFileSpec, LoadError> {
    Ok(serde_json::from_str(json)?)
}

/// Build and compile every dictionary of the file. Classes may reference
/// classes declared later in the file; cycles are rejected.
pub fn load_dictionaries(
    file: &DictionaryFileSpec,
    registry: &RuleRegistry,
) -> Result<HashMap<String, Arc<Dictionary>>, LoadError> {
    let mut loaded: HashMap<String, Arc<Dictionary>> = HashMap::new();
    let mut pending: Vec<&DictionarySpec> = file.dictionaries.iter().collect();

    while !pending.is_empty() {
        let mut progressed = false;
        let mut remaining = Vec::new();
        for spec in pending {
            if class_references(spec).iter().all(|class| loaded.contains_key(class)) {
                let dictionary = build_dictionary(spec, registry, &loaded)?;
                loaded.insert(spec.name.clone(), Arc::new(dictionary));
                progressed = true;
            } else {
                remaining.push(spec);
            }
        }
        if !progressed {
            let name = remaining.first().map(|spec| spec.name.clone()).unwrap_or_default();
            // Either a cycle or a reference to a class missing entirely.
            for spec in &remaining {
                for class in class_references(spec) {
                    if !loaded.contains_key(&class)
                        && !file.dictionaries.iter().any(|d| d.name == class)
                    {
                        return Err(LoadError::UnknownClass {
                            dictionary: spec.name.clone(),
                            class,
                        });
                    }
                }
            }
            return Err(LoadError::CyclicClassReference(name));
        }
        pending = remaining;
    }
    Ok(loaded)
}

fn class_references(spec: &DictionarySpec) -> Vec<String> {
    spec.attributes.iter().filter_map(|attribute| attribute.class.clone()).collect()
}

fn build_dictionary(
    spec: &DictionarySpec,
    registry: &RuleRegistry,
    loaded: &HashMap<String, Arc<Dictionary>>,
) -> Result<Dictionary, LoadError> {
    let mut dictionary = Dictionary::new(&spec.name);
    dictionary.set_root(spec.root);
    let key: Vec<&str> = spec.key.iter().map(|name| name.as_str()).collect();
    dictionary.set_key(&key);

    for attribute_spec in &spec.attributes {
        let data_type = DataType::from_name(&attribute_spec.data_type)
            .ok_or_else(|| LoadError::UnknownType(attribute_spec.data_type.clone()))?;
        let mut attribute = Attribute::new(&attribute_spec.name, data_type);
        if !attribute_spec.loaded {
            attribute = attribute.unloaded();
        }
        if let Some(format) = &attribute_spec.format {
            attribute = attribute.with_format(format);
        }
        if let Some(class) = &attribute_spec.class {
            let class_dictionary =
                loaded.get(class).ok_or_else(|| LoadError::UnknownClass {
                    dictionary: spec.name.clone(),
                    class: class.clone(),
                })?;
            attribute = attribute.with_object_class(class_dictionary.clone());
        }
        if let Some(expression) = &attribute_spec.derivation {
            attribute = attribute.with_rule(build_rule(expression, registry)?);
        }
        dictionary.add_attribute(attribute);
    }

    for block_spec in &spec.blocks {
        let data_type = DataType::from_name(&block_spec.data_type)
            .ok_or_else(|| LoadError::UnknownType(block_spec.data_type.clone()))?;
        let var_key_type = match block_spec.var_key_type.as_str() {
            "Integer" => VarKeyType::Integer,
            "Symbol" => VarKeyType::Symbol,
            other => return Err(LoadError::UnknownType(other.to_string())),
        };
        let mut block = AttributeBlock::new(&block_spec.name, data_type, var_key_type);
        if !block_spec.loaded {
            block = block.unloaded();
        }
        if let Some(default) = &block_spec.default {
            block = block.with_default(parse_block_default(default, data_type)?);
        }
        for member in &block_spec.members {
            block = block.add_member(&member.name, parse_var_key(&member.var_key, var_key_type)?);
        }
        if let Some(expression) = &block_spec.derivation {
            block = block.with_rule(build_rule(expression, registry)?);
        }
        dictionary.add_block(block);
    }

    dictionary.compile()?;
    Ok(dictionary)
}

fn parse_block_default(
    value: &serde_json::Value,
    data_type: DataType,
) -> Result<BlockDefault, LoadError> {
    match data_type {
        DataType::SymbolValueBlock => match value.as_str() {
            Some(text) => Ok(BlockDefault::Symbol(Symbol::intern(text))),
            None => Err(LoadError::BadVarKey(value.to_string())),
        },
        _ => match value.as_f64() {
            Some(number) => Ok(BlockDefault::Continuous(Continuous::new(number))),
            None => Err(LoadError::BadVarKey(value.to_string())),
        },
    }
}

fn parse_var_key(value: &serde_json::Value, key_type: VarKeyType) -> Result<VarKey, LoadError> {
    match key_type {
        VarKeyType::Integer => value
            .as_u64()
            .and_then(|key| u32::try_from(key).ok())
            .map(VarKey::Integer)
            .ok_or_else(|| LoadError::BadVarKey(value.to_string())),
        VarKeyType::Symbol => value
            .as_str()
            .map(|key| VarKey::Symbol(Symbol::intern(key)))
            .ok_or_else(|| LoadError::BadVarKey(value.to_string())),
    }
}

/// Build one rule tree from its expression.
pub fn build_rule(
    expression: &ExpressionSpec,
    registry: &RuleRegistry,
) -> Result<Box<dyn DerivationRule>, LoadError> {
    let mut rule = registry
        .lookup(&expression.rule)
        .ok_or_else(|| LoadError::UnknownRule(expression.rule.clone()))?;
    if !set_operand_count(rule.as_mut(), expression.operands.len()) {
        return Err(LoadError::OperandCount {
            rule: expression.rule.clone(),
            count: expression.operands.len(),
        });
    }
    for (index, operand_spec) in expression.operands.iter().enumerate() {
        let operand = &mut rule.operands_mut()[index];
        match operand_spec {
            OperandSpec::Field { field, as_type } => {
                if let Some(type_name) = as_type {
                    let data_type = DataType::from_name(type_name)
                        .ok_or_else(|| LoadError::UnknownType(type_name.clone()))?;
                    operand.set_data_type(data_type);
                }
                operand.set_origin(Origin::Attribute(field.clone()));
            }
            OperandSpec::Number { value } => {
                operand
                    .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(*value))));
            }
            OperandSpec::Text { symbol } => {
                operand.set_origin(Origin::Constant(Constant::Symbol(Symbol::intern(symbol))));
            }
            OperandSpec::Expression(sub_expression) => {
                let sub_rule = build_rule(sub_expression, registry)?;
                operand.set_origin(Origin::Rule(sub_rule));
            }
        }
    }
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RuleRegistry {
        RuleRegistry::with_standard_rules()
    }

    #[test]
    fn test_load_simple_dictionary() {
        let json = r#"{
            "dictionaries": [{
                "name": "Sample",
                "attributes": [
                    {"name": "a", "type": "Continuous"},
                    {"name": "b", "type": "Continuous"},
                    {"name": "total", "type": "Continuous",
                     "derivation": {"rule": "Sum", "operands": [{"field": "a"}, {"field": "b"}]}}
                ]
            }]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        let dictionaries = load_dictionaries(&file, &registry()).unwrap();
        let sample = &dictionaries["Sample"];
        assert!(sample.is_compiled());
        assert!(sample.lookup_attribute("total").unwrap().is_derived());
    }

    #[test]
    fn test_load_nested_expression_and_constants() {
        let json = r#"{
            "dictionaries": [{
                "name": "Sample",
                "attributes": [
                    {"name": "x", "type": "Continuous"},
                    {"name": "label", "type": "Symbol",
                     "derivation": {"rule": "IfC", "operands": [
                        {"rule": "G", "operands": [{"field": "x"}, {"value": 10}]},
                        {"symbol": "big"},
                        {"symbol": "small"}
                     ]}}
                ]
            }]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        let dictionaries = load_dictionaries(&file, &registry()).unwrap();
        assert!(dictionaries["Sample"].is_compiled());
    }

    #[test]
    fn test_load_block_dictionary() {
        let json = r#"{
            "dictionaries": [{
                "name": "Sparse",
                "attributes": [{"name": "id", "type": "Symbol"}],
                "blocks": [{
                    "name": "counts",
                    "type": "ContinuousValueBlock",
                    "var_key_type": "Integer",
                    "default": 0,
                    "members": [
                        {"name": "v1", "var_key": 1},
                        {"name": "v2", "var_key": 2},
                        {"name": "v3", "var_key": 3}
                    ]
                }]
            }]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        let dictionaries = load_dictionaries(&file, &registry()).unwrap();
        let block = dictionaries["Sparse"].lookup_attribute_block("counts").unwrap();
        assert_eq!(block.key_block().key_count(), 3);
    }

    #[test]
    fn test_class_reference_order_independent() {
        let json = r#"{
            "dictionaries": [
                {"name": "Main",
                 "attributes": [
                    {"name": "id", "type": "Symbol"},
                    {"name": "items", "type": "ObjectArray", "class": "Item", "loaded": true}
                 ]},
                {"name": "Item",
                 "attributes": [{"name": "v", "type": "Continuous"}]}
            ]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        let dictionaries = load_dictionaries(&file, &registry()).unwrap();
        assert_eq!(dictionaries.len(), 2);
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let json = r#"{
            "dictionaries": [{
                "name": "Bad",
                "attributes": [
                    {"name": "d", "type": "Continuous",
                     "derivation": {"rule": "NoSuchRule", "operands": []}}
                ]
            }]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        assert!(matches!(
            load_dictionaries(&file, &registry()),
            Err(LoadError::UnknownRule(_))
        ));
    }

    #[test]
    fn test_unknown_class_rejected() {
        let json = r#"{
            "dictionaries": [{
                "name": "Main",
                "attributes": [{"name": "o", "type": "Object", "class": "Ghost"}]
            }]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        assert!(matches!(
            load_dictionaries(&file, &registry()),
            Err(LoadError::UnknownClass { .. })
        ));
    }

    #[test]
    fn test_operand_count_mismatch_rejected() {
        let json = r#"{
            "dictionaries": [{
                "name": "Bad",
                "attributes": [
                    {"name": "a", "type": "Continuous"},
                    {"name": "d", "type": "Continuous",
                     "derivation": {"rule": "Copy", "operands": [{"field": "a"}, {"field": "a"}]}}
                ]
            }]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        assert!(matches!(
            load_dictionaries(&file, &registry()),
            Err(LoadError::OperandCount { .. })
        ));
    }

    #[test]
    fn test_schema_error_propagates() {
        let json = r#"{
            "dictionaries": [{
                "name": "Bad",
                "attributes": [
                    {"name": "d", "type": "Continuous",
                     "derivation": {"rule": "Copy", "operands": [{"field": "ghost"}]}}
                ]
            }]
        }"#;
        let file = parse_dictionary_file(json).unwrap();
        assert!(matches!(load_dictionaries(&file, &registry()), Err(LoadError::Schema(_))));
    }
}
