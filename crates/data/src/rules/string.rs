//! Categorical string rules
//!
//! Positions and lengths are expressed in characters, 1-based where the
//! original library is 1-based. Out-of-range arguments clip rather than
//! fail; a missing numerical argument yields the empty symbol.

use super::rule_common;
use crate::record::Record;
use crate::rule::{DerivationRule, Operand, RuleCore, RuleDef, RuleRegistry};
use tabrule_core::{Continuous, DataType, Symbol};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Box::new(LengthRule::new()));
    registry.register(Box::new(ExtractRule::new(ExtractOp::Left)));
    registry.register(Box::new(ExtractRule::new(ExtractOp::Right)));
    registry.register(Box::new(ExtractRule::new(ExtractOp::Middle)));
    registry.register(Box::new(ConcatRule::new()));
    registry.register(Box::new(CaseRule::new(true)));
    registry.register(Box::new(CaseRule::new(false)));
    registry.register(Box::new(SearchRule::new()));
    registry.register(Box::new(ReplaceRule::new()));
}

static LENGTH_DEF: RuleDef = RuleDef {
    name: "Length",
    label: "Length of a categorical value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct LengthRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl LengthRule {
    fn new() -> LengthRule {
        LengthRule {
            def: &LENGTH_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Symbol)]),
        }
    }
}

impl DerivationRule for LengthRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let value = self.core.operands[0].symbol_value(record);
        Continuous::new(value.as_str().chars().count() as f64)
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractOp {
    Left,
    Right,
    Middle,
}

static LEFT_DEF: RuleDef = RuleDef {
    name: "Left",
    label: "Left part of a categorical value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static RIGHT_DEF: RuleDef = RuleDef {
    name: "Right",
    label: "Right part of a categorical value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static MIDDLE_DEF: RuleDef = RuleDef {
    name: "Middle",
    label: "Substring of a categorical value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct ExtractRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: ExtractOp,
}

impl ExtractRule {
    fn new(op: ExtractOp) -> ExtractRule {
        let (def, arity) = match op {
            ExtractOp::Left => (&LEFT_DEF, 2),
            ExtractOp::Right => (&RIGHT_DEF, 2),
            ExtractOp::Middle => (&MIDDLE_DEF, 3),
        };
        let mut operands = vec![Operand::new(DataType::Symbol)];
        operands.extend((1..arity).map(|_| Operand::new(DataType::Continuous)));
        ExtractRule { def, core: RuleCore::with_operands(operands), op }
    }
}

impl DerivationRule for ExtractRule {
    rule_common!();

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let value = self.core.operands[0].symbol_value(record);
        let text = value.as_str();
        let total = text.chars().count();

        let result: String = match self.op {
            ExtractOp::Left => {
                let Some(count) = self.core.operands[1].continuous_value(record).as_int() else {
                    return Symbol::empty();
                };
                let count = count.clamp(0, total as i64) as usize;
                text.chars().take(count).collect()
            }
            ExtractOp::Right => {
                let Some(count) = self.core.operands[1].continuous_value(record).as_int() else {
                    return Symbol::empty();
                };
                let count = count.clamp(0, total as i64) as usize;
                text.chars().skip(total - count).collect()
            }
            ExtractOp::Middle => {
                let begin = self.core.operands[1].continuous_value(record).as_int();
                let length = self.core.operands[2].continuous_value(record).as_int();
                let (Some(begin), Some(length)) = (begin, length) else {
                    return Symbol::empty();
                };
                if begin < 1 || length < 0 {
                    return Symbol::empty();
                }
                text.chars().skip(begin as usize - 1).take(length as usize).collect()
            }
        };
        Symbol::intern(&result)
    }
}

// ---------------------------------------------------------------------------

static CONCAT_DEF: RuleDef = RuleDef {
    name: "Concat",
    label: "Concatenation of categorical values",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: true,
    multiple_scope: false,
};

#[derive(Clone)]
struct ConcatRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl ConcatRule {
    fn new() -> ConcatRule {
        ConcatRule {
            def: &CONCAT_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Symbol),
                Operand::new(DataType::Symbol),
            ]),
        }
    }
}

impl DerivationRule for ConcatRule {
    rule_common!();

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let mut result = String::new();
        for operand in self.core.operands.iter_mut() {
            result.push_str(operand.symbol_value(record).as_str());
        }
        Symbol::intern(&result)
    }
}

// ---------------------------------------------------------------------------

static UPPER_DEF: RuleDef = RuleDef {
    name: "UpperCase",
    label: "Upper case conversion",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static LOWER_DEF: RuleDef = RuleDef {
    name: "LowerCase",
    label: "Lower case conversion",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct CaseRule {
    def: &'static RuleDef,
    core: RuleCore,
    upper: bool,
}

impl CaseRule {
    fn new(upper: bool) -> CaseRule {
        CaseRule {
            def: if upper { &UPPER_DEF } else { &LOWER_DEF },
            core: RuleCore::with_operands(vec![Operand::new(DataType::Symbol)]),
            upper,
        }
    }
}

impl DerivationRule for CaseRule {
    rule_common!();

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let value = self.core.operands[0].symbol_value(record);
        let converted =
            if self.upper { value.as_str().to_uppercase() } else { value.as_str().to_lowercase() };
        Symbol::intern(&converted)
    }
}

// ---------------------------------------------------------------------------

static SEARCH_DEF: RuleDef = RuleDef {
    name: "Search",
    label: "Position of a substring, 0 when absent",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct SearchRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl SearchRule {
    fn new() -> SearchRule {
        SearchRule {
            def: &SEARCH_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Symbol),
                Operand::new(DataType::Symbol),
            ]),
        }
    }
}

impl DerivationRule for SearchRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let value = self.core.operands[0].symbol_value(record);
        let needle = self.core.operands[1].symbol_value(record);
        match value.as_str().find(needle.as_str()) {
            // 1-based character position of the match.
            Some(byte_pos) => {
                let char_pos = value.as_str()[..byte_pos].chars().count() + 1;
                Continuous::new(char_pos as f64)
            }
            None => Continuous::ZERO,
        }
    }
}

static REPLACE_DEF: RuleDef = RuleDef {
    name: "Replace",
    label: "Replacement of every occurrence of a substring",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct ReplaceRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl ReplaceRule {
    fn new() -> ReplaceRule {
        ReplaceRule {
            def: &REPLACE_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Symbol),
                Operand::new(DataType::Symbol),
                Operand::new(DataType::Symbol),
            ]),
        }
    }
}

impl DerivationRule for ReplaceRule {
    rule_common!();

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let value = self.core.operands[0].symbol_value(record);
        let from = self.core.operands[1].symbol_value(record);
        if from.is_empty() {
            return value;
        }
        let to = self.core.operands[2].symbol_value(record);
        Symbol::intern(&value.as_str().replace(from.as_str(), to.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::rule::{Constant, Origin};
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

    fn constant(value: f64) -> Origin {
        Origin::Constant(Constant::Continuous(Continuous::new(value)))
    }

    #[test]
    fn test_length_counts_characters() {
        let dict = dict();
        let mut rule = LengthRule::new();
        rule.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        rule.compile(&dict);
        assert_eq!(rule.compute_continuous(&record(&dict, "héllo")), Continuous::new(5.0));
    }

    #[test]
    fn test_left_right_middle() {
        let dict = dict();
        let rec = record(&dict, "abcdef");

        let mut left = ExtractRule::new(ExtractOp::Left);
        left.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        left.operands_mut()[1].set_origin(constant(2.0));
        left.compile(&dict);
        assert_eq!(left.compute_symbol(&rec).as_str(), "ab");

        let mut right = ExtractRule::new(ExtractOp::Right);
        right.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        right.operands_mut()[1].set_origin(constant(10.0));
        right.compile(&dict);
        // Clipped to the whole value.
        assert_eq!(right.compute_symbol(&rec).as_str(), "abcdef");

        let mut middle = ExtractRule::new(ExtractOp::Middle);
        middle.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        middle.operands_mut()[1].set_origin(constant(2.0));
        middle.operands_mut()[2].set_origin(constant(3.0));
        middle.compile(&dict);
        assert_eq!(middle.compute_symbol(&rec).as_str(), "bcd");
    }

    #[test]
    fn test_missing_count_gives_empty() {
        let dict = dict();
        let rec = record(&dict, "abc");
        let mut left = ExtractRule::new(ExtractOp::Left);
        left.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        left.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::MISSING)));
        left.compile(&dict);
        assert!(left.compute_symbol(&rec).is_empty());
    }

    #[test]
    fn test_search_and_replace() {
        let dict = dict();
        let rec = record(&dict, "one two two");

        let mut search = SearchRule::new();
        search.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        search.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Symbol(Symbol::intern("two"))));
        search.compile(&dict);
        assert_eq!(search.compute_continuous(&rec), Continuous::new(5.0));

        let mut replace = ReplaceRule::new();
        replace.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        replace.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Symbol(Symbol::intern("two"))));
        replace.operands_mut()[2]
            .set_origin(Origin::Constant(Constant::Symbol(Symbol::intern("2"))));
        replace.compile(&dict);
        assert_eq!(replace.compute_symbol(&rec).as_str(), "one 2 2");
    }

    #[test]
    fn test_case_conversion() {
        let dict = dict();
        let rec = record(&dict, "MiXed");

        let mut upper = CaseRule::new(true);
        upper.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        upper.compile(&dict);
        assert_eq!(upper.compute_symbol(&rec).as_str(), "MIXED");

        let mut lower = CaseRule::new(false);
        lower.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        lower.compile(&dict);
        assert_eq!(lower.compute_symbol(&rec).as_str(), "mixed");
    }
}
