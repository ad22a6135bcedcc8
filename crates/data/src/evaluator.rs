//! Per-thread evaluation of derived fields
//!
//! An [`Evaluator`] owns a compiled clone of every derived attribute's and
//! block's rule (rules carry mutable caches, so instances are never shared
//! across evaluators) and fills a record's derived slots in the dependency
//! order computed at dictionary compile.

use crate::dictionary::{DataItem, Dictionary, SchemaError};
use crate::record::Record;
use crate::rule::DerivationRule;
use crate::value::Value;
use std::rc::Rc;
use std::sync::Arc;
use tabrule_core::DataType;

enum Target {
    Dense { slot: usize, data_type: DataType },
    ContinuousBlock { slot: usize, block_index: usize },
    SymbolBlock { slot: usize, block_index: usize },
}

struct Derivation {
    target: Target,
    rule: Box<dyn DerivationRule>,
}

/// Computes derived values for records of one dictionary.
/// Single-threaded by design; clone one evaluator per worker.
pub struct Evaluator {
    dictionary: Arc<Dictionary>,
    compiled_freshness: u64,
    derivations: Vec<Derivation>,
}

impl Evaluator {
    pub fn new(dictionary: Arc<Dictionary>) -> Result<Evaluator, SchemaError> {
        if !dictionary.is_compiled() {
            return Err(SchemaError::NotCompiled(dictionary.name().to_string()));
        }

        let mut derivations = Vec::new();
        for item in dictionary.evaluation_order() {
            match *item {
                DataItem::Attribute(index) => {
                    let attribute = dictionary.attribute_at(index);
                    let Some(slot) = attribute.load_index() else { continue };
                    let rule = attribute.rule().expect("derived attribute").clone_rule();
                    derivations.push(Derivation {
                        target: Target::Dense { slot, data_type: attribute.data_type() },
                        rule,
                    });
                }
                DataItem::Block(index) => {
                    let block = dictionary.block_at(index);
                    let Some(slot) = block.load_index() else { continue };
                    let rule = block.rule().expect("derived block").clone_rule();
                    let target = match block.data_type() {
                        DataType::SymbolValueBlock => Target::SymbolBlock { slot, block_index: index },
                        _ => Target::ContinuousBlock { slot, block_index: index },
                    };
                    derivations.push(Derivation { target, rule });
                }
            }
        }

        let mut evaluator =
            Evaluator { dictionary, compiled_freshness: 0, derivations };
        evaluator.recompile();
        Ok(evaluator)
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    fn recompile(&mut self) {
        for derivation in &mut self.derivations {
            derivation.rule.compile(&self.dictionary);
        }
        self.compiled_freshness = self.dictionary.freshness();
    }

    /// Fill every loaded derived slot of `record`.
    pub fn evaluate(&mut self, record: &mut Record) {
        debug_assert!(Arc::ptr_eq(record.dictionary(), &self.dictionary));
        if self.compiled_freshness != self.dictionary.freshness() {
            // Dynamic recompile invalidation: the dictionary moved on.
            self.recompile();
        }

        for derivation in &mut self.derivations {
            match derivation.target {
                Target::Dense { slot, data_type } => {
                    let value = match data_type {
                        DataType::Continuous => {
                            Value::Continuous(derivation.rule.compute_continuous(record))
                        }
                        DataType::Symbol => {
                            Value::Symbol(derivation.rule.compute_symbol(record))
                        }
                        DataType::Date => Value::Date(derivation.rule.compute_date(record)),
                        DataType::Time => Value::Time(derivation.rule.compute_time(record)),
                        DataType::Timestamp => {
                            Value::Timestamp(derivation.rule.compute_timestamp(record))
                        }
                        DataType::TimestampTz => {
                            Value::TimestampTz(derivation.rule.compute_timestamp_tz(record))
                        }
                        DataType::Text => Value::Text(derivation.rule.compute_text(record)),
                        DataType::Object => {
                            Value::Object(derivation.rule.compute_object(record))
                        }
                        DataType::ObjectArray => {
                            Value::ObjectArray(derivation.rule.compute_object_array(record))
                        }
                        DataType::Structure => {
                            let structure = derivation.rule.compute_structure(record).clone();
                            Value::Structure(Some(Rc::new(structure)))
                        }
                        DataType::ContinuousValueBlock | DataType::SymbolValueBlock => {
                            debug_assert!(false, "blocks are not dense slots");
                            continue;
                        }
                    };
                    record.set_value_at(slot, value);
                }
                Target::ContinuousBlock { slot, block_index } => {
                    let keys = self.dictionary.block_at(block_index).key_block();
                    let block = derivation.rule.compute_continuous_block(record, keys);
                    record.set_continuous_block_at(slot, block);
                }
                Target::SymbolBlock { slot, block_index } => {
                    let keys = self.dictionary.block_at(block_index).key_block();
                    let block = derivation.rule.compute_symbol_block(record, keys);
                    record.set_symbol_block_at(slot, block);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::rule::{Constant, Origin, RuleRegistry, set_operand_count};
    use tabrule_core::Continuous;

    #[test]
    fn test_evaluate_copy_chain() {
        let registry = RuleRegistry::with_standard_rules();
        let mut dict = Dictionary::new("Sample");
        dict.add_attribute(Attribute::new("a", DataType::Continuous));

        // c = Copy(b), b = Copy(a): order comes from the dictionary.
        let mut copy_b = registry.lookup("Copy").unwrap();
        copy_b.operands_mut()[0].set_origin(Origin::Attribute("a".to_string()));
        dict.add_attribute(Attribute::new("b", DataType::Continuous).with_rule(copy_b));
        let mut copy_c = registry.lookup("Copy").unwrap();
        copy_c.operands_mut()[0].set_origin(Origin::Attribute("b".to_string()));
        dict.add_attribute(Attribute::new("c", DataType::Continuous).with_rule(copy_c));
        dict.compile().unwrap();
        let dict = Arc::new(dict);

        let mut evaluator = Evaluator::new(dict.clone()).unwrap();
        let mut record = Record::new(dict.clone(), 0);
        let a = dict.lookup_attribute("a").unwrap().load_index().unwrap();
        let c = dict.lookup_attribute("c").unwrap().load_index().unwrap();
        record.set_value_at(a, Value::Continuous(Continuous::new(3.25)));

        evaluator.evaluate(&mut record);
        assert_eq!(record.continuous_at(c), Continuous::new(3.25));
    }

    #[test]
    fn test_evaluate_sum_with_constant() {
        let registry = RuleRegistry::with_standard_rules();
        let mut dict = Dictionary::new("Sample");
        dict.add_attribute(Attribute::new("a", DataType::Continuous));

        let mut sum = registry.lookup("Sum").unwrap();
        set_operand_count(sum.as_mut(), 2);
        sum.operands_mut()[0].set_origin(Origin::Attribute("a".to_string()));
        sum.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(10.0))));
        dict.add_attribute(Attribute::new("total", DataType::Continuous).with_rule(sum));
        dict.compile().unwrap();
        let dict = Arc::new(dict);

        let mut evaluator = Evaluator::new(dict.clone()).unwrap();
        let mut record = Record::new(dict.clone(), 0);
        let a = dict.lookup_attribute("a").unwrap().load_index().unwrap();
        let total = dict.lookup_attribute("total").unwrap().load_index().unwrap();
        record.set_value_at(a, Value::Continuous(Continuous::new(2.5)));

        evaluator.evaluate(&mut record);
        assert_eq!(record.continuous_at(total), Continuous::new(12.5));
    }

    #[test]
    fn test_evaluator_requires_compiled_dictionary() {
        let dict = Arc::new(Dictionary::new("Raw"));
        assert!(matches!(Evaluator::new(dict), Err(SchemaError::NotCompiled(_))));
    }
}
