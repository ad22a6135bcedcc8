//! Numerical rules
//!
//! All arithmetic is exception-free: a missing operand, a divide by zero
//! or an overflow yields Missing, never a panic.

use super::rule_common;
use crate::record::Record;
use crate::rule::{DerivationRule, Operand, RuleCore, RuleDef, RuleRegistry};
use tabrule_core::{Continuous, DataType};

pub fn register(registry: &mut RuleRegistry) {
    for op in [
        NaryOp::Sum,
        NaryOp::Product,
        NaryOp::Min,
        NaryOp::Max,
        NaryOp::Mean,
    ] {
        registry.register(Box::new(NaryMathRule::new(op)));
    }
    for op in [BinaryOp::Minus, BinaryOp::Divide, BinaryOp::Modulo, BinaryOp::Power] {
        registry.register(Box::new(BinaryMathRule::new(op)));
    }
    for op in [
        UnaryOp::Abs,
        UnaryOp::Round,
        UnaryOp::Floor,
        UnaryOp::Ceiling,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Sqrt,
    ] {
        registry.register(Box::new(UnaryMathRule::new(op)));
    }
    registry.register(Box::new(RandomRule::new()));
    registry.register(Box::new(IndexRule::new()));
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NaryOp {
    Sum,
    Product,
    Min,
    Max,
    Mean,
}

static SUM_DEF: RuleDef = RuleDef {
    name: "Sum",
    label: "Sum of numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: true,
    multiple_scope: false,
};
static PRODUCT_DEF: RuleDef = RuleDef {
    name: "Product",
    label: "Product of numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: true,
    multiple_scope: false,
};
static MIN_DEF: RuleDef = RuleDef {
    name: "Min",
    label: "Minimum of numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: true,
    multiple_scope: false,
};
static MAX_DEF: RuleDef = RuleDef {
    name: "Max",
    label: "Maximum of numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: true,
    multiple_scope: false,
};
static MEAN_DEF: RuleDef = RuleDef {
    name: "Mean",
    label: "Mean of numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: true,
    multiple_scope: false,
};

#[derive(Clone)]
struct NaryMathRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: NaryOp,
}

impl NaryMathRule {
    fn new(op: NaryOp) -> NaryMathRule {
        let def = match op {
            NaryOp::Sum => &SUM_DEF,
            NaryOp::Product => &PRODUCT_DEF,
            NaryOp::Min => &MIN_DEF,
            NaryOp::Max => &MAX_DEF,
            NaryOp::Mean => &MEAN_DEF,
        };
        NaryMathRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Continuous),
                Operand::new(DataType::Continuous),
            ]),
            op,
        }
    }
}

impl DerivationRule for NaryMathRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let mut values = Vec::with_capacity(self.core.operands.len());
        for operand in self.core.operands.iter_mut() {
            let value = operand.continuous_value(record);
            // Pointwise rules propagate Missing from any operand.
            if value.is_missing() {
                return Continuous::MISSING;
            }
            values.push(value.value());
        }
        let result = match self.op {
            NaryOp::Sum => values.iter().sum(),
            NaryOp::Product => values.iter().product(),
            NaryOp::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            NaryOp::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            NaryOp::Mean => values.iter().sum::<f64>() / values.len() as f64,
        };
        Continuous::new(result)
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Minus,
    Divide,
    Modulo,
    Power,
}

static MINUS_DEF: RuleDef = RuleDef {
    name: "Minus",
    label: "Difference of two numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static DIVIDE_DEF: RuleDef = RuleDef {
    name: "Divide",
    label: "Ratio of two numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static MODULO_DEF: RuleDef = RuleDef {
    name: "Modulo",
    label: "Remainder of an integer division",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static POWER_DEF: RuleDef = RuleDef {
    name: "Power",
    label: "Power of a numerical value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct BinaryMathRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: BinaryOp,
}

impl BinaryMathRule {
    fn new(op: BinaryOp) -> BinaryMathRule {
        let def = match op {
            BinaryOp::Minus => &MINUS_DEF,
            BinaryOp::Divide => &DIVIDE_DEF,
            BinaryOp::Modulo => &MODULO_DEF,
            BinaryOp::Power => &POWER_DEF,
        };
        BinaryMathRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Continuous),
                Operand::new(DataType::Continuous),
            ]),
            op,
        }
    }
}

impl DerivationRule for BinaryMathRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let left = self.core.operands[0].continuous_value(record);
        let right = self.core.operands[1].continuous_value(record);
        if left.is_missing() || right.is_missing() {
            return Continuous::MISSING;
        }
        let (a, b) = (left.value(), right.value());
        let result = match self.op {
            BinaryOp::Minus => a - b,
            BinaryOp::Divide => {
                if b == 0.0 {
                    return Continuous::MISSING;
                }
                a / b
            }
            BinaryOp::Modulo => {
                if b == 0.0 {
                    return Continuous::MISSING;
                }
                a % b
            }
            BinaryOp::Power => a.powf(b),
        };
        Continuous::new(result)
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Abs,
    Round,
    Floor,
    Ceiling,
    Exp,
    Log,
    Sqrt,
}

static ABS_DEF: RuleDef = RuleDef {
    name: "Abs",
    label: "Absolute value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static ROUND_DEF: RuleDef = RuleDef {
    name: "Round",
    label: "Closest integer value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static FLOOR_DEF: RuleDef = RuleDef {
    name: "Floor",
    label: "Largest preceding integer value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static CEILING_DEF: RuleDef = RuleDef {
    name: "Ceiling",
    label: "Smallest following integer value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static EXP_DEF: RuleDef = RuleDef {
    name: "Exp",
    label: "Exponential value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static LOG_DEF: RuleDef = RuleDef {
    name: "Log",
    label: "Natural logarithm",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static SQRT_DEF: RuleDef = RuleDef {
    name: "Sqrt",
    label: "Square root",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct UnaryMathRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: UnaryOp,
}

impl UnaryMathRule {
    fn new(op: UnaryOp) -> UnaryMathRule {
        let def = match op {
            UnaryOp::Abs => &ABS_DEF,
            UnaryOp::Round => &ROUND_DEF,
            UnaryOp::Floor => &FLOOR_DEF,
            UnaryOp::Ceiling => &CEILING_DEF,
            UnaryOp::Exp => &EXP_DEF,
            UnaryOp::Log => &LOG_DEF,
            UnaryOp::Sqrt => &SQRT_DEF,
        };
        UnaryMathRule {
            def,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Continuous)]),
            op,
        }
    }
}

impl DerivationRule for UnaryMathRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let value = self.core.operands[0].continuous_value(record);
        if value.is_missing() {
            return Continuous::MISSING;
        }
        let x = value.value();
        let result = match self.op {
            UnaryOp::Abs => x.abs(),
            UnaryOp::Round => x.round(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Ceiling => x.ceil(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => {
                if x <= 0.0 {
                    return Continuous::MISSING;
                }
                x.ln()
            }
            UnaryOp::Sqrt => {
                if x < 0.0 {
                    return Continuous::MISSING;
                }
                x.sqrt()
            }
        };
        Continuous::new(result)
    }
}

// ---------------------------------------------------------------------------

static RANDOM_DEF: RuleDef = RuleDef {
    name: "Random",
    label: "Random number between 0 and 1, seeded by the record rank",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

/// Deterministic per record: the value depends only on the record's
/// creation index, so re-reading a file reproduces the same stream.
#[derive(Clone)]
struct RandomRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl RandomRule {
    fn new() -> RandomRule {
        RandomRule { def: &RANDOM_DEF, core: RuleCore::default() }
    }
}

/// splitmix64 step, a stateless integer mixer.
pub(crate) fn mix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl DerivationRule for RandomRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let mixed = mix64(record.creation_index());
        // 53 high bits give a uniform double in [0, 1).
        Continuous::new((mixed >> 11) as f64 / (1u64 << 53) as f64)
    }
}

static INDEX_DEF: RuleDef = RuleDef {
    name: "Index",
    label: "Creation rank of the record",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct IndexRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl IndexRule {
    fn new() -> IndexRule {
        IndexRule { def: &INDEX_DEF, core: RuleCore::default() }
    }
}

impl DerivationRule for IndexRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        Continuous::new(record.creation_index() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::rule::{Constant, Origin, set_operand_count};
    use crate::value::Value;
    use std::sync::Arc;

    fn dict_xy() -> Arc<Dictionary> {
        let mut dict = Dictionary::new("T");
        dict.add_attribute(Attribute::new("x", DataType::Continuous));
        dict.add_attribute(Attribute::new("y", DataType::Continuous));
        dict.compile().unwrap();
        Arc::new(dict)
    }

    fn record_xy(dict: &Arc<Dictionary>, x: Continuous, y: Continuous) -> Record {
        let mut record = Record::new(dict.clone(), 3);
        record.set_value_at(0, Value::Continuous(x));
        record.set_value_at(1, Value::Continuous(y));
        record
    }

    fn bind_xy(rule: &mut dyn DerivationRule, dict: &Dictionary) {
        rule.operands_mut()[0].set_origin(Origin::Attribute("x".to_string()));
        rule.operands_mut()[1].set_origin(Origin::Attribute("y".to_string()));
        rule.compile(dict);
    }

    #[test]
    fn test_sum_and_product() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::new(2.0), Continuous::new(3.0));

        let mut sum = NaryMathRule::new(NaryOp::Sum);
        bind_xy(&mut sum, &dict);
        assert_eq!(sum.compute_continuous(&record), Continuous::new(5.0));

        let mut product = NaryMathRule::new(NaryOp::Product);
        bind_xy(&mut product, &dict);
        assert_eq!(product.compute_continuous(&record), Continuous::new(6.0));
    }

    #[test]
    fn test_sum_with_three_operands() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::new(2.0), Continuous::new(3.0));

        let mut sum = NaryMathRule::new(NaryOp::Sum);
        set_operand_count(&mut sum, 3);
        sum.operands_mut()[0].set_origin(Origin::Attribute("x".to_string()));
        sum.operands_mut()[1].set_origin(Origin::Attribute("y".to_string()));
        sum.operands_mut()[2]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(10.0))));
        sum.compile(&dict);
        assert_eq!(sum.compute_continuous(&record), Continuous::new(15.0));
    }

    #[test]
    fn test_missing_propagates() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::MISSING, Continuous::new(3.0));

        let mut sum = NaryMathRule::new(NaryOp::Sum);
        bind_xy(&mut sum, &dict);
        assert!(sum.compute_continuous(&record).is_missing());
    }

    #[test]
    fn test_divide_by_zero_is_missing() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::new(1.0), Continuous::new(0.0));

        let mut divide = BinaryMathRule::new(BinaryOp::Divide);
        bind_xy(&mut divide, &dict);
        assert!(divide.compute_continuous(&record).is_missing());
    }

    #[test]
    fn test_overflow_is_missing() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::new(f64::MAX), Continuous::new(f64::MAX));

        let mut product = NaryMathRule::new(NaryOp::Product);
        bind_xy(&mut product, &dict);
        assert!(product.compute_continuous(&record).is_missing());
    }

    #[test]
    fn test_unary_domain_errors() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::new(-4.0), Continuous::ZERO);

        let mut sqrt = UnaryMathRule::new(UnaryOp::Sqrt);
        sqrt.operands_mut()[0].set_origin(Origin::Attribute("x".to_string()));
        sqrt.compile(&dict);
        assert!(sqrt.compute_continuous(&record).is_missing());

        let mut log = UnaryMathRule::new(UnaryOp::Log);
        log.operands_mut()[0].set_origin(Origin::Attribute("x".to_string()));
        log.compile(&dict);
        assert!(log.compute_continuous(&record).is_missing());
    }

    #[test]
    fn test_random_is_deterministic_per_record() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::ZERO, Continuous::ZERO);

        let mut random = RandomRule::new();
        random.compile(&dict);
        let first = random.compute_continuous(&record);
        let second = random.compute_continuous(&record);
        assert_eq!(first, second);
        assert!(first.value() >= 0.0 && first.value() < 1.0);
    }

    #[test]
    fn test_index_reads_creation_rank() {
        let dict = dict_xy();
        let record = record_xy(&dict, Continuous::ZERO, Continuous::ZERO);
        let mut index = IndexRule::new();
        index.compile(&dict);
        assert_eq!(index.compute_continuous(&record), Continuous::new(3.0));
    }
}
