//! Vector structure rules
//!
//! Vectors are rule-owned structures. When every element operand is a
//! constant (the common case for lookup tables) the vector is built once
//! at compile; otherwise it is rebuilt per record into the rule's buffer.

use super::rule_common;
use crate::dictionary::Dictionary;
use crate::record::Record;
use crate::rule::{DerivationRule, Operand, Origin, RuleCore, RuleDef, RuleRegistry};
use crate::value::Structure;
use tabrule_core::{Continuous, DataType, Symbol};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Box::new(VectorRule::new(true)));
    registry.register(Box::new(VectorRule::new(false)));
    registry.register(Box::new(ValueAtRule::new(true)));
    registry.register(Box::new(ValueAtRule::new(false)));
    registry.register(Box::new(AsVectorRule::new(true)));
    registry.register(Box::new(AsVectorRule::new(false)));
}

static VECTOR_DEF: RuleDef = RuleDef {
    name: "Vector",
    label: "Numerical vector from its element values",
    result_type: DataType::Structure,
    structure_name: Some("Vector"),
    variable_operands: true,
    multiple_scope: false,
};
static VECTOR_C_DEF: RuleDef = RuleDef {
    name: "VectorC",
    label: "Categorical vector from its element values",
    result_type: DataType::Structure,
    structure_name: Some("VectorC"),
    variable_operands: true,
    multiple_scope: false,
};

#[derive(Clone)]
pub(crate) struct VectorRule {
    def: &'static RuleDef,
    core: RuleCore,
    symbolic: bool,
    constant: bool,
    stale: bool,
    buffer: Structure,
}

impl VectorRule {
    pub(crate) fn new(symbolic: bool) -> VectorRule {
        let (def, element_type, buffer) = if symbolic {
            (&VECTOR_C_DEF, DataType::Symbol, Structure::SymbolVector(Vec::new()))
        } else {
            (&VECTOR_DEF, DataType::Continuous, Structure::ContinuousVector(Vec::new()))
        };
        VectorRule {
            def,
            core: RuleCore::with_operands(vec![Operand::new(element_type)]),
            symbolic,
            constant: false,
            stale: true,
            buffer,
        }
    }

    fn rebuild(&mut self, record: &Record) {
        if self.symbolic {
            let mut values = Vec::with_capacity(self.core.operands.len());
            for operand in self.core.operands.iter_mut() {
                values.push(operand.symbol_value(record));
            }
            self.buffer = Structure::SymbolVector(values);
        } else {
            let mut values = Vec::with_capacity(self.core.operands.len());
            for operand in self.core.operands.iter_mut() {
                values.push(operand.continuous_value(record));
            }
            self.buffer = Structure::ContinuousVector(values);
        }
        self.stale = false;
    }
}

impl DerivationRule for VectorRule {
    rule_common!();

    fn compile_rule(&mut self, _dictionary: &Dictionary) {
        self.constant =
            self.core.operands.iter().all(|op| matches!(op.origin(), Origin::Constant(_)));
        self.stale = true;
    }

    fn compute_structure<'a>(&'a mut self, record: &'a Record) -> &'a Structure {
        if !self.constant || self.stale {
            self.rebuild(record);
        }
        &self.buffer
    }
}

// ---------------------------------------------------------------------------

static VALUE_AT_DEF: RuleDef = RuleDef {
    name: "ValueAt",
    label: "Element of a numerical vector at a rank",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static VALUE_AT_C_DEF: RuleDef = RuleDef {
    name: "ValueAtC",
    label: "Element of a categorical vector at a rank",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

/// 1-based element access; a missing or out-of-range rank yields the
/// reset value of the element type.
#[derive(Clone)]
struct ValueAtRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl ValueAtRule {
    fn new(symbolic: bool) -> ValueAtRule {
        let (def, structure_name) =
            if symbolic { (&VALUE_AT_C_DEF, "VectorC") } else { (&VALUE_AT_DEF, "Vector") };
        ValueAtRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Structure).with_structure_name(structure_name),
                Operand::new(DataType::Continuous),
            ]),
        }
    }
}

impl DerivationRule for ValueAtRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let rank = self.core.operands[1].continuous_value(record).as_int();
        let Some(structure) = self.core.operands[0].structure_value(record) else {
            return Continuous::MISSING;
        };
        let Some(values) = structure.as_continuous_vector() else {
            return Continuous::MISSING;
        };
        match rank {
            Some(rank) if rank >= 1 && rank as usize <= values.len() => values[rank as usize - 1],
            _ => Continuous::MISSING,
        }
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let rank = self.core.operands[1].continuous_value(record).as_int();
        let Some(structure) = self.core.operands[0].structure_value(record) else {
            return Symbol::empty();
        };
        let Some(values) = structure.as_symbol_vector() else {
            return Symbol::empty();
        };
        match rank {
            Some(rank) if rank >= 1 && rank as usize <= values.len() => {
                values[rank as usize - 1].clone()
            }
            _ => Symbol::empty(),
        }
    }
}

// ---------------------------------------------------------------------------

static AS_VECTOR_DEF: RuleDef = RuleDef {
    name: "AsVector",
    label: "Numerical vector from a space-separated value",
    result_type: DataType::Structure,
    structure_name: Some("Vector"),
    variable_operands: false,
    multiple_scope: false,
};
static AS_VECTOR_C_DEF: RuleDef = RuleDef {
    name: "AsVectorC",
    label: "Categorical vector from a space-separated value",
    result_type: DataType::Structure,
    structure_name: Some("VectorC"),
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct AsVectorRule {
    def: &'static RuleDef,
    core: RuleCore,
    symbolic: bool,
    buffer: Structure,
}

impl AsVectorRule {
    fn new(symbolic: bool) -> AsVectorRule {
        let (def, buffer) = if symbolic {
            (&AS_VECTOR_C_DEF, Structure::SymbolVector(Vec::new()))
        } else {
            (&AS_VECTOR_DEF, Structure::ContinuousVector(Vec::new()))
        };
        AsVectorRule {
            def,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Symbol)]),
            symbolic,
            buffer,
        }
    }
}

impl DerivationRule for AsVectorRule {
    rule_common!();

    fn compute_structure<'a>(&'a mut self, record: &'a Record) -> &'a Structure {
        let value = self.core.operands[0].symbol_value(record);
        let tokens = value.as_str().split_whitespace();
        if self.symbolic {
            self.buffer = Structure::SymbolVector(tokens.map(Symbol::intern).collect());
        } else {
            self.buffer = Structure::ContinuousVector(
                tokens.map(|token| Continuous::parse(token).0).collect(),
            );
        }
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::rule::{Constant, set_operand_count};
    use crate::value::Value;
    use std::sync::Arc;

    fn dict() -> Arc<Dictionary> {
        let mut dict = Dictionary::new("T");
        dict.add_attribute(Attribute::new("s", DataType::Symbol));
        dict.compile().unwrap();
        Arc::new(dict)
    }

    fn record(dict: &Arc<Dictionary>, s: &str) -> Record {
        let mut record = Record::new(dict.clone(), 0);
        record.set_value_at(0, Value::Symbol(Symbol::intern(s)));
        record
    }

    fn constant_vector_c(values: &[&str]) -> VectorRule {
        let mut vector = VectorRule::new(true);
        set_operand_count(&mut vector, values.len());
        for (operand, value) in vector.operands_mut().iter_mut().zip(values) {
            operand.set_origin(Origin::Constant(Constant::Symbol(Symbol::intern(value))));
        }
        vector
    }

    #[test]
    fn test_constant_vector_built_once() {
        let dict = dict();
        let rec = record(&dict, "");
        let mut vector = constant_vector_c(&["a", "b", "c"]);
        vector.compile(&dict);

        let values = vector.compute_structure(&rec).as_symbol_vector().unwrap().to_vec();
        assert_eq!(values.len(), 3);
        assert_eq!(values[1].as_str(), "b");
    }

    #[test]
    fn test_value_at() {
        let dict = dict();
        let rec = record(&dict, "");

        let mut rule = ValueAtRule::new(true);
        rule.operands_mut()[0] =
            Operand::rule(DataType::Structure, Box::new(constant_vector_c(&["x", "y"])))
                .with_structure_name("VectorC");
        rule.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(2.0))));
        rule.compile(&dict);
        assert_eq!(rule.compute_symbol(&rec).as_str(), "y");

        // Out of range yields the empty symbol.
        rule.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(5.0))));
        rule.compile(&dict);
        assert!(rule.compute_symbol(&rec).is_empty());
    }

    #[test]
    fn test_as_vector_splits() {
        let dict = dict();
        let rec = record(&dict, " 1.5  2 x ");

        let mut as_vector = AsVectorRule::new(false);
        as_vector.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        as_vector.compile(&dict);
        let structure = as_vector.compute_structure(&rec);
        let values = structure.as_continuous_vector().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], Continuous::new(1.5));
        assert_eq!(values[1], Continuous::new(2.0));
        assert!(values[2].is_missing());

        let mut as_vector_c = AsVectorRule::new(true);
        as_vector_c.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        as_vector_c.compile(&dict);
        let names = as_vector_c.compute_structure(&rec).as_symbol_vector().unwrap().to_vec();
        assert_eq!(names.iter().map(|s| s.as_str()).collect::<Vec<_>>(), vec!["1.5", "2", "x"]);
    }
}
