//! Comparisons, boolean connectives and conditionals
//!
//! Logical results are continuous 1/0. Comparisons use the total order
//! that puts Missing first, so they never fail; boolean operands treat
//! Missing and 0 as false.

use super::rule_common;
use crate::record::Record;
use crate::rule::{DerivationRule, Operand, RuleCore, RuleDef, RuleRegistry};
use std::cmp::Ordering;
use tabrule_core::{Continuous, DataType, Symbol};

pub fn register(registry: &mut RuleRegistry) {
    for op in [
        CompareOp::Eq,
        CompareOp::Neq,
        CompareOp::Greater,
        CompareOp::GreaterEq,
        CompareOp::Less,
        CompareOp::LessEq,
    ] {
        registry.register(Box::new(CompareRule::new(op)));
    }
    registry.register(Box::new(SymbolCompareRule::new(false)));
    registry.register(Box::new(SymbolCompareRule::new(true)));
    registry.register(Box::new(LogicalRule::new(LogicalOp::And)));
    registry.register(Box::new(LogicalRule::new(LogicalOp::Or)));
    registry.register(Box::new(LogicalRule::new(LogicalOp::Not)));
    registry.register(Box::new(IfRule::new(&IF_DEF)));
    registry.register(Box::new(IfRule::new(&IF_C_DEF)));
}

fn truth(value: bool) -> Continuous {
    Continuous::new(if value { 1.0 } else { 0.0 })
}

fn as_bool(value: Continuous) -> bool {
    !value.is_missing() && value.value() != 0.0
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Neq,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

static EQ_DEF: RuleDef = RuleDef {
    name: "EQ",
    label: "Equality of two numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static NEQ_DEF: RuleDef = RuleDef {
    name: "NEQ",
    label: "Inequality of two numerical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static G_DEF: RuleDef = RuleDef {
    name: "G",
    label: "Strict greater comparison",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static GE_DEF: RuleDef = RuleDef {
    name: "GE",
    label: "Greater or equal comparison",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static L_DEF: RuleDef = RuleDef {
    name: "L",
    label: "Strict less comparison",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static LE_DEF: RuleDef = RuleDef {
    name: "LE",
    label: "Less or equal comparison",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct CompareRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: CompareOp,
}

impl CompareRule {
    fn new(op: CompareOp) -> CompareRule {
        let def = match op {
            CompareOp::Eq => &EQ_DEF,
            CompareOp::Neq => &NEQ_DEF,
            CompareOp::Greater => &G_DEF,
            CompareOp::GreaterEq => &GE_DEF,
            CompareOp::Less => &L_DEF,
            CompareOp::LessEq => &LE_DEF,
        };
        CompareRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Continuous),
                Operand::new(DataType::Continuous),
            ]),
            op,
        }
    }
}

impl DerivationRule for CompareRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let left = self.core.operands[0].continuous_value(record);
        let right = self.core.operands[1].continuous_value(record);
        let ordering = left.compare(right);
        truth(match self.op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Neq => ordering != Ordering::Equal,
            CompareOp::Greater => ordering == Ordering::Greater,
            CompareOp::GreaterEq => ordering != Ordering::Less,
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessEq => ordering != Ordering::Greater,
        })
    }
}

static EQ_C_DEF: RuleDef = RuleDef {
    name: "EQc",
    label: "Equality of two categorical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static NEQ_C_DEF: RuleDef = RuleDef {
    name: "NEQc",
    label: "Inequality of two categorical values",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct SymbolCompareRule {
    def: &'static RuleDef,
    core: RuleCore,
    negate: bool,
}

impl SymbolCompareRule {
    fn new(negate: bool) -> SymbolCompareRule {
        SymbolCompareRule {
            def: if negate { &NEQ_C_DEF } else { &EQ_C_DEF },
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Symbol),
                Operand::new(DataType::Symbol),
            ]),
            negate,
        }
    }
}

impl DerivationRule for SymbolCompareRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        // Interned symbols compare by identity.
        let left = self.core.operands[0].symbol_value(record);
        let right = self.core.operands[1].symbol_value(record);
        truth((left == right) != self.negate)
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalOp {
    And,
    Or,
    Not,
}

static AND_DEF: RuleDef = RuleDef {
    name: "And",
    label: "Logical and",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static OR_DEF: RuleDef = RuleDef {
    name: "Or",
    label: "Logical or",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static NOT_DEF: RuleDef = RuleDef {
    name: "Not",
    label: "Logical negation",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct LogicalRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: LogicalOp,
}

impl LogicalRule {
    fn new(op: LogicalOp) -> LogicalRule {
        let (def, arity) = match op {
            LogicalOp::And => (&AND_DEF, 2),
            LogicalOp::Or => (&OR_DEF, 2),
            LogicalOp::Not => (&NOT_DEF, 1),
        };
        let operands = (0..arity).map(|_| Operand::new(DataType::Continuous)).collect();
        LogicalRule { def, core: RuleCore::with_operands(operands), op }
    }
}

impl DerivationRule for LogicalRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let first = as_bool(self.core.operands[0].continuous_value(record));
        match self.op {
            LogicalOp::Not => truth(!first),
            LogicalOp::And => {
                if !first {
                    return truth(false);
                }
                truth(as_bool(self.core.operands[1].continuous_value(record)))
            }
            LogicalOp::Or => {
                if first {
                    return truth(true);
                }
                truth(as_bool(self.core.operands[1].continuous_value(record)))
            }
        }
    }
}

// ---------------------------------------------------------------------------

static IF_DEF: RuleDef = RuleDef {
    name: "If",
    label: "Numerical value chosen by a condition",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static IF_C_DEF: RuleDef = RuleDef {
    name: "IfC",
    label: "Categorical value chosen by a condition",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct IfRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl IfRule {
    fn new(def: &'static RuleDef) -> IfRule {
        IfRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Continuous),
                Operand::new(def.result_type),
                Operand::new(def.result_type),
            ]),
        }
    }

    fn branch(&mut self, record: &Record) -> usize {
        if as_bool(self.core.operands[0].continuous_value(record)) { 1 } else { 2 }
    }
}

impl DerivationRule for IfRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let branch = self.branch(record);
        self.core.operands[branch].continuous_value(record)
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let branch = self.branch(record);
        self.core.operands[branch].symbol_value(record)
    }
}
