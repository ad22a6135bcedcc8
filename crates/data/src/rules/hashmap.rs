//! Hash-map structure rules
//!
//! A hash map pairs a categorical key vector with a value vector of equal
//! length and unique keys. Compile builds the numeric-key index once; the
//! map structure owns its key symbols, which keeps their numeric keys
//! valid for the map's lifetime.

use super::rule_common;
use crate::dictionary::{Dictionary, SchemaError};
use crate::record::Record;
use crate::rule::{Constant, DerivationRule, Operand, Origin, RuleCore, RuleDef, RuleRegistry};
use crate::value::{Structure, SymbolKeyedMap};
use tabrule_core::{Continuous, DataType, Symbol};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Box::new(HashMapRule::new(true)));
    registry.register(Box::new(HashMapRule::new(false)));
    registry.register(Box::new(ValueAtKeyRule::new(true)));
    registry.register(Box::new(ValueAtKeyRule::new(false)));
}

static HASH_MAP_DEF: RuleDef = RuleDef {
    name: "HashMap",
    label: "Numerical map from a key vector and a value vector",
    result_type: DataType::Structure,
    structure_name: Some("HashMap"),
    variable_operands: false,
    multiple_scope: false,
};
static HASH_MAP_C_DEF: RuleDef = RuleDef {
    name: "HashMapC",
    label: "Categorical map from a key vector and a value vector",
    result_type: DataType::Structure,
    structure_name: Some("HashMapC"),
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct HashMapRule {
    def: &'static RuleDef,
    core: RuleCore,
    symbolic: bool,
    constant: bool,
    stale: bool,
    buffer: Structure,
}

impl HashMapRule {
    fn new(symbolic: bool) -> HashMapRule {
        let (def, values_name, buffer) = if symbolic {
            (
                &HASH_MAP_C_DEF,
                "VectorC",
                Structure::SymbolHashMap(SymbolKeyedMap::build(vec![], vec![]).expect("empty map")),
            )
        } else {
            (
                &HASH_MAP_DEF,
                "Vector",
                Structure::ContinuousHashMap(
                    SymbolKeyedMap::build(vec![], vec![]).expect("empty map"),
                ),
            )
        };
        HashMapRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Structure).with_structure_name("VectorC"),
                Operand::new(DataType::Structure).with_structure_name(values_name),
            ]),
            symbolic,
            constant: false,
            stale: true,
            buffer,
        }
    }

    /// Key/value vectors when both operands are constant vector rules, so
    /// the length and uniqueness requirements can be rejected at schema
    /// compile instead of at evaluation.
    fn constant_vectors(&self) -> Option<(Vec<Symbol>, usize)> {
        let keys = constant_symbol_vector(&self.core.operands[0])?;
        let value_count = constant_vector_len(&self.core.operands[1])?;
        Some((keys, value_count))
    }

    fn rebuild(&mut self, record: &Record) {
        let (keys_op, rest) = self.core.operands.split_at_mut(1);
        let keys = match keys_op[0].structure_value(record).and_then(|s| s.as_symbol_vector()) {
            Some(keys) => keys.to_vec(),
            None => Vec::new(),
        };

        if self.symbolic {
            let values = match rest[0].structure_value(record).and_then(|s| s.as_symbol_vector()) {
                Some(values) => values.to_vec(),
                None => Vec::new(),
            };
            self.buffer = match SymbolKeyedMap::build(keys, values) {
                Ok(map) => Structure::SymbolHashMap(map),
                Err(cause) => {
                    tracing::warn!(rule = self.def.name, %cause, "invalid hash map operands");
                    Structure::SymbolHashMap(SymbolKeyedMap::build(vec![], vec![]).expect("empty"))
                }
            };
        } else {
            let values =
                match rest[0].structure_value(record).and_then(|s| s.as_continuous_vector()) {
                    Some(values) => values.to_vec(),
                    None => Vec::new(),
                };
            self.buffer = match SymbolKeyedMap::build(keys, values) {
                Ok(map) => Structure::ContinuousHashMap(map),
                Err(cause) => {
                    tracing::warn!(rule = self.def.name, %cause, "invalid hash map operands");
                    Structure::ContinuousHashMap(
                        SymbolKeyedMap::build(vec![], vec![]).expect("empty"),
                    )
                }
            };
        }
        self.stale = false;
    }
}

impl DerivationRule for HashMapRule {
    rule_common!();

    fn check_operands_completeness(&self, _dictionary: &Dictionary) -> Result<(), SchemaError> {
        // Best effort: fully constant operands are validated here, dynamic
        // ones fall back to an evaluation-time warning and an empty map.
        if let Some((keys, value_count)) = self.constant_vectors() {
            if keys.len() != value_count {
                return Err(SchemaError::BadRule {
                    rule: self.name().to_string(),
                    cause: format!(
                        "key vector has {} entries but value vector has {}",
                        keys.len(),
                        value_count
                    ),
                });
            }
            let mut seen = std::collections::HashSet::new();
            for key in &keys {
                if !seen.insert(key.numeric_key()) {
                    return Err(SchemaError::BadRule {
                        rule: self.name().to_string(),
                        cause: format!("duplicate key '{}'", key),
                    });
                }
            }
        }
        Ok(())
    }

    fn compile_rule(&mut self, _dictionary: &Dictionary) {
        self.constant = self.core.operands.iter().all(|operand| match operand.origin() {
            Origin::Rule(rule) => rule
                .operands()
                .iter()
                .all(|op| matches!(op.origin(), Origin::Constant(_))),
            _ => false,
        });
        self.stale = true;
    }

    fn compute_structure<'a>(&'a mut self, record: &'a Record) -> &'a Structure {
        if !self.constant || self.stale {
            self.rebuild(record);
        }
        &self.buffer
    }
}

fn constant_symbol_vector(operand: &Operand) -> Option<Vec<Symbol>> {
    let Origin::Rule(rule) = operand.origin() else { return None };
    if rule.structure_name() != Some("VectorC") {
        return None;
    }
    rule.operands()
        .iter()
        .map(|op| match op.origin() {
            Origin::Constant(Constant::Symbol(symbol)) => Some(symbol.clone()),
            _ => None,
        })
        .collect()
}

fn constant_vector_len(operand: &Operand) -> Option<usize> {
    let Origin::Rule(rule) = operand.origin() else { return None };
    rule.operands()
        .iter()
        .all(|op| matches!(op.origin(), Origin::Constant(_)))
        .then(|| rule.operands().len())
}

// ---------------------------------------------------------------------------

static VALUE_AT_KEY_DEF: RuleDef = RuleDef {
    name: "ValueAtKey",
    label: "Numerical map value at a key, Missing when absent",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static VALUE_AT_KEY_C_DEF: RuleDef = RuleDef {
    name: "ValueAtKeyC",
    label: "Categorical map value at a key, empty when absent",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct ValueAtKeyRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl ValueAtKeyRule {
    fn new(symbolic: bool) -> ValueAtKeyRule {
        let (def, map_name) = if symbolic {
            (&VALUE_AT_KEY_C_DEF, "HashMapC")
        } else {
            (&VALUE_AT_KEY_DEF, "HashMap")
        };
        ValueAtKeyRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Structure).with_structure_name(map_name),
                Operand::new(DataType::Symbol),
            ]),
        }
    }
}

impl DerivationRule for ValueAtKeyRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let key = self.core.operands[1].symbol_value(record);
        let Some(structure) = self.core.operands[0].structure_value(record) else {
            return Continuous::MISSING;
        };
        let Some(map) = structure.as_continuous_hash_map() else {
            return Continuous::MISSING;
        };
        map.get(&key).copied().unwrap_or(Continuous::MISSING)
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let key = self.core.operands[1].symbol_value(record);
        let Some(structure) = self.core.operands[0].structure_value(record) else {
            return Symbol::empty();
        };
        let Some(map) = structure.as_symbol_hash_map() else {
            return Symbol::empty();
        };
        map.get(&key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::rule::set_operand_count;
    use crate::rules::vector::VectorRule;
    use crate::value::Value;
    use std::sync::Arc;

    fn dict() -> Arc<Dictionary> {
        let mut dict = Dictionary::new("T");
        dict.add_attribute(Attribute::new("k", DataType::Symbol));
        dict.compile().unwrap();
        Arc::new(dict)
    }

    fn record(dict: &Arc<Dictionary>, key: &str) -> Record {
        let mut record = Record::new(dict.clone(), 0);
        record.set_value_at(0, Value::Symbol(Symbol::intern(key)));
        record
    }

    fn constant_vector_c(values: &[&str]) -> Box<dyn DerivationRule> {
        let mut vector = VectorRule::new(true);
        set_operand_count(&mut vector, values.len());
        for (operand, value) in vector.operands_mut().iter_mut().zip(values) {
            operand.set_origin(Origin::Constant(Constant::Symbol(Symbol::intern(value))));
        }
        Box::new(vector)
    }

    fn sample_map_rule() -> HashMapRule {
        let mut map = HashMapRule::new(true);
        map.operands_mut()[0] = Operand::rule(DataType::Structure, constant_vector_c(&["x", "y", "z"]))
            .with_structure_name("VectorC");
        map.operands_mut()[1] = Operand::rule(DataType::Structure, constant_vector_c(&["1", "2", "3"]))
            .with_structure_name("VectorC");
        map
    }

    #[test]
    fn test_value_at_key_lookup() {
        let dict = dict();
        let mut rule = ValueAtKeyRule::new(true);
        rule.operands_mut()[0] = Operand::rule(DataType::Structure, Box::new(sample_map_rule()))
            .with_structure_name("HashMapC");
        rule.operands_mut()[1].set_origin(Origin::Attribute("k".to_string()));
        rule.compile(&dict);

        assert_eq!(rule.compute_symbol(&record(&dict, "y")).as_str(), "2");
        assert!(rule.compute_symbol(&record(&dict, "w")).is_empty());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let dict = dict();
        let mut map = HashMapRule::new(true);
        map.operands_mut()[0] = Operand::rule(DataType::Structure, constant_vector_c(&["x", "y"]))
            .with_structure_name("VectorC");
        map.operands_mut()[1] = Operand::rule(DataType::Structure, constant_vector_c(&["1"]))
            .with_structure_name("VectorC");
        assert!(map.check_operands_completeness(&dict).is_err());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let dict = dict();
        let mut map = HashMapRule::new(true);
        map.operands_mut()[0] = Operand::rule(DataType::Structure, constant_vector_c(&["x", "x"]))
            .with_structure_name("VectorC");
        map.operands_mut()[1] = Operand::rule(DataType::Structure, constant_vector_c(&["1", "2"]))
            .with_structure_name("VectorC");
        assert!(map.check_operands_completeness(&dict).is_err());
    }

    #[test]
    fn test_continuous_map() {
        let dict = dict();
        let mut values = VectorRule::new(false);
        set_operand_count(&mut values, 2);
        values.operands_mut()[0]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(10.0))));
        values.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(20.0))));

        let mut map = HashMapRule::new(false);
        map.operands_mut()[0] = Operand::rule(DataType::Structure, constant_vector_c(&["a", "b"]))
            .with_structure_name("VectorC");
        map.operands_mut()[1] =
            Operand::rule(DataType::Structure, Box::new(values)).with_structure_name("Vector");

        let mut rule = ValueAtKeyRule::new(false);
        rule.operands_mut()[0] =
            Operand::rule(DataType::Structure, Box::new(map)).with_structure_name("HashMap");
        rule.operands_mut()[1].set_origin(Origin::Attribute("k".to_string()));
        rule.compile(&dict);

        assert_eq!(rule.compute_continuous(&record(&dict, "b")), Continuous::new(20.0));
        assert!(rule.compute_continuous(&record(&dict, "zz")).is_missing());
    }
}
