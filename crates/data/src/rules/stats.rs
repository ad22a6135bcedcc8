//! Statistics over tables
//!
//! Numerical statistics skip operand values equal to Missing; categorical
//! statistics treat the empty symbol as a valid value. An empty input
//! yields Missing, except Count/CountSum (0) and symbol results (empty).
//!
//! Every statistic has two entry points: the rule path iterating an
//! `ObjectArray` with per-row operand evaluation, and a vector path
//! taking already-materialized values plus `(record_count, default)`,
//! used when the source is a sparse block whose default value stands for
//! the rows that are not stored.

use super::rule_common;
use crate::dictionary::Dictionary;
use crate::record::Record;
use crate::rule::{
    DerivationRule, Operand, OperandScope, RuleCore, RuleDef, RuleRegistry,
    relation_operand_class,
};
use std::collections::HashMap;
use std::sync::Arc;
use tabrule_core::{Continuous, DataType, Symbol};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Box::new(TableCountRule::new()));
    for stat in [
        ContinuousStat::Mean,
        ContinuousStat::StdDev,
        ContinuousStat::Median,
        ContinuousStat::Min,
        ContinuousStat::Max,
        ContinuousStat::Sum,
        ContinuousStat::CountSum,
    ] {
        registry.register(Box::new(TableStatsRule::new(stat)));
    }
    registry.register(Box::new(TableTrendRule::new()));
    for stat in
        [SymbolStat::CountDistinct, SymbolStat::Entropy, SymbolStat::Mode, SymbolStat::Concat]
    {
        registry.register(Box::new(TableSymbolStatsRule::new(stat)));
    }
    registry.register(Box::new(TableModeAtRule::new()));
}

// ---------------------------------------------------------------------------
// Numerical statistics, usable standalone for block-backed sources.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuousStat {
    Mean,
    StdDev,
    Median,
    Min,
    Max,
    Sum,
    CountSum,
}

impl ContinuousStat {
    /// Record-path entry point: aggregate the given values, skipping
    /// Missing ones.
    pub fn compute<I: IntoIterator<Item = Continuous>>(self, values: I) -> Continuous {
        let present: Vec<f64> =
            values.into_iter().filter(|v| !v.is_missing()).map(|v| v.value()).collect();
        if present.is_empty() {
            return match self {
                ContinuousStat::CountSum => Continuous::ZERO,
                _ => Continuous::MISSING,
            };
        }
        let n = present.len() as f64;
        let result = match self {
            ContinuousStat::Mean => present.iter().sum::<f64>() / n,
            ContinuousStat::StdDev => {
                let mean = present.iter().sum::<f64>() / n;
                let variance = present.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                // Population standard deviation; clamp rounding noise.
                variance.max(0.0).sqrt()
            }
            ContinuousStat::Median => {
                let mut sorted = present.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let middle = sorted.len() / 2;
                if sorted.len() % 2 == 1 {
                    sorted[middle]
                } else {
                    (sorted[middle - 1] + sorted[middle]) / 2.0
                }
            }
            ContinuousStat::Min => present.iter().cloned().fold(f64::INFINITY, f64::min),
            ContinuousStat::Max => present.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ContinuousStat::Sum | ContinuousStat::CountSum => present.iter().sum::<f64>(),
        };
        Continuous::new(result)
    }

    /// Vector-path entry point: `values` are the stored entries of a
    /// sparse source; `record_count - values.len()` implicit rows carry
    /// `default`.
    pub fn compute_with_default(
        self,
        values: &[Continuous],
        record_count: usize,
        default: Continuous,
    ) -> Continuous {
        let implicit = record_count.saturating_sub(values.len());
        self.compute(
            values.iter().copied().chain(std::iter::repeat_n(default, implicit)),
        )
    }
}

/// Least-squares slope of `y` against `x`, pairwise-skipping Missing.
pub fn trend<I: IntoIterator<Item = (Continuous, Continuous)>>(pairs: I) -> Continuous {
    let points: Vec<(f64, f64)> = pairs
        .into_iter()
        .filter(|(y, x)| !y.is_missing() && !x.is_missing())
        .map(|(y, x)| (y.value(), x.value()))
        .collect();
    if points.len() < 2 {
        return Continuous::MISSING;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(_, x)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(y, _)| y).sum::<f64>() / n;
    let covariance: f64 = points.iter().map(|(y, x)| (x - mean_x) * (y - mean_y)).sum();
    let variance: f64 = points.iter().map(|(_, x)| (x - mean_x) * (x - mean_x)).sum();
    if variance == 0.0 {
        return Continuous::MISSING;
    }
    Continuous::new(covariance / variance)
}

// ---------------------------------------------------------------------------

static TABLE_COUNT_DEF: RuleDef = RuleDef {
    name: "TableCount",
    label: "Number of sub-records in a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct TableCountRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TableCountRule {
    fn new() -> TableCountRule {
        TableCountRule {
            def: &TABLE_COUNT_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::ObjectArray)]),
        }
    }
}

impl DerivationRule for TableCountRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let table = self.core.operands[0].object_array_value(record);
        Continuous::new(table.len() as f64)
    }
}

static TABLE_MEAN_DEF: RuleDef = RuleDef {
    name: "TableMean",
    label: "Mean of a value over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_STD_DEV_DEF: RuleDef = RuleDef {
    name: "TableStdDev",
    label: "Standard deviation of a value over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_MEDIAN_DEF: RuleDef = RuleDef {
    name: "TableMedian",
    label: "Median of a value over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_MIN_DEF: RuleDef = RuleDef {
    name: "TableMin",
    label: "Minimum of a value over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_MAX_DEF: RuleDef = RuleDef {
    name: "TableMax",
    label: "Maximum of a value over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_SUM_DEF: RuleDef = RuleDef {
    name: "TableSum",
    label: "Sum of a value over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_COUNT_SUM_DEF: RuleDef = RuleDef {
    name: "TableCountSum",
    label: "Sum of a value over a table, 0 when empty",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

#[derive(Clone)]
struct TableStatsRule {
    def: &'static RuleDef,
    core: RuleCore,
    stat: ContinuousStat,
}

impl TableStatsRule {
    fn new(stat: ContinuousStat) -> TableStatsRule {
        let def = match stat {
            ContinuousStat::Mean => &TABLE_MEAN_DEF,
            ContinuousStat::StdDev => &TABLE_STD_DEV_DEF,
            ContinuousStat::Median => &TABLE_MEDIAN_DEF,
            ContinuousStat::Min => &TABLE_MIN_DEF,
            ContinuousStat::Max => &TABLE_MAX_DEF,
            ContinuousStat::Sum => &TABLE_SUM_DEF,
            ContinuousStat::CountSum => &TABLE_COUNT_SUM_DEF,
        };
        TableStatsRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Continuous).with_scope(OperandScope::Secondary),
            ]),
            stat,
        }
    }
}

impl DerivationRule for TableStatsRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let table = self.core.operands[0].object_array_value(record);
        let operand = &mut self.core.operands[1];
        let values: Vec<Continuous> =
            table.iter().map(|element| operand.continuous_value(element)).collect();
        self.stat.compute(values)
    }
}

static TABLE_TREND_DEF: RuleDef = RuleDef {
    name: "TableTrend",
    label: "Linear regression slope of a value against another",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

#[derive(Clone)]
struct TableTrendRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TableTrendRule {
    fn new() -> TableTrendRule {
        TableTrendRule {
            def: &TABLE_TREND_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Continuous).with_scope(OperandScope::Secondary),
                Operand::new(DataType::Continuous).with_scope(OperandScope::Secondary),
            ]),
        }
    }
}

impl DerivationRule for TableTrendRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let table = self.core.operands[0].object_array_value(record);
        let (y_op, x_op) = {
            let (left, right) = self.core.operands.split_at_mut(2);
            (&mut left[1], &mut right[0])
        };
        trend(table.iter().map(|element| {
            (y_op.continuous_value(element), x_op.continuous_value(element))
        }))
    }
}

// ---------------------------------------------------------------------------
// Categorical statistics.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolStat {
    CountDistinct,
    Entropy,
    Mode,
    Concat,
}

/// Frequency table of symbol values. The map owns its key symbols, so
/// the interner's refcount alone keeps them (and their numeric keys)
/// alive for the whole pass.
fn frequencies<I: IntoIterator<Item = Symbol>>(values: I) -> HashMap<Symbol, u64> {
    let mut counts: HashMap<Symbol, u64> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

impl SymbolStat {
    pub fn compute_continuous<I: IntoIterator<Item = Symbol>>(self, values: I) -> Continuous {
        match self {
            SymbolStat::CountDistinct => {
                Continuous::new(frequencies(values).len() as f64)
            }
            SymbolStat::Entropy => {
                let counts = frequencies(values);
                let total: u64 = counts.values().sum();
                if total == 0 {
                    return Continuous::MISSING;
                }
                let entropy = -counts
                    .values()
                    .map(|count| {
                        let p = *count as f64 / total as f64;
                        p * p.ln()
                    })
                    .sum::<f64>();
                // Rounding can push an all-equal distribution below zero.
                Continuous::new(entropy.max(0.0))
            }
            _ => {
                debug_assert!(false, "not a numerical symbol statistic");
                Continuous::MISSING
            }
        }
    }

    pub fn compute_symbol<I: IntoIterator<Item = Symbol>>(self, values: I) -> Symbol {
        match self {
            SymbolStat::Mode => mode_at(frequencies(values), 1),
            SymbolStat::Concat => {
                let mut concatenated = String::new();
                for value in values {
                    concatenated.push_str(value.as_str());
                }
                Symbol::intern(&concatenated)
            }
            _ => {
                debug_assert!(false, "not a categorical symbol statistic");
                Symbol::empty()
            }
        }
    }

    /// Vector-path entry point mirroring the sparse-block semantics.
    pub fn compute_with_default(
        self,
        values: &[Symbol],
        record_count: usize,
        default: &Symbol,
    ) -> (Continuous, Symbol) {
        let implicit = record_count.saturating_sub(values.len());
        let all =
            values.iter().cloned().chain(std::iter::repeat_n(default.clone(), implicit));
        match self {
            SymbolStat::CountDistinct | SymbolStat::Entropy => {
                (self.compute_continuous(all), Symbol::empty())
            }
            SymbolStat::Mode | SymbolStat::Concat => {
                (Continuous::MISSING, self.compute_symbol(all))
            }
        }
    }
}

/// The `rank`-th most frequent value, 1-based; ties break lexicographic.
fn mode_at(counts: HashMap<Symbol, u64>, rank: usize) -> Symbol {
    if rank == 0 || rank > counts.len() {
        return Symbol::empty();
    }
    let mut ordered: Vec<(Symbol, u64)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ordered[rank - 1].0.clone()
}

static TABLE_COUNT_DISTINCT_DEF: RuleDef = RuleDef {
    name: "TableCountDistinct",
    label: "Number of distinct values over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_ENTROPY_DEF: RuleDef = RuleDef {
    name: "TableEntropy",
    label: "Shannon entropy of a value over a table",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_MODE_DEF: RuleDef = RuleDef {
    name: "TableMode",
    label: "Most frequent value over a table",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};
static TABLE_CONCAT_DEF: RuleDef = RuleDef {
    name: "TableConcat",
    label: "Concatenation of a value over a table",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

#[derive(Clone)]
struct TableSymbolStatsRule {
    def: &'static RuleDef,
    core: RuleCore,
    stat: SymbolStat,
}

impl TableSymbolStatsRule {
    fn new(stat: SymbolStat) -> TableSymbolStatsRule {
        let def = match stat {
            SymbolStat::CountDistinct => &TABLE_COUNT_DISTINCT_DEF,
            SymbolStat::Entropy => &TABLE_ENTROPY_DEF,
            SymbolStat::Mode => &TABLE_MODE_DEF,
            SymbolStat::Concat => &TABLE_CONCAT_DEF,
        };
        TableSymbolStatsRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Symbol).with_scope(OperandScope::Secondary),
            ]),
            stat,
        }
    }

    fn values(&mut self, record: &Record) -> Vec<Symbol> {
        let table = self.core.operands[0].object_array_value(record);
        let operand = &mut self.core.operands[1];
        table.iter().map(|element| operand.symbol_value(element)).collect()
    }
}

impl DerivationRule for TableSymbolStatsRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        match self.stat {
            SymbolStat::CountDistinct => {
                // An empty table has zero distinct values, not Missing.
                let values = self.values(record);
                Continuous::new(frequencies(values).len() as f64)
            }
            _ => {
                let values = self.values(record);
                self.stat.compute_continuous(values)
            }
        }
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let values = self.values(record);
        self.stat.compute_symbol(values)
    }
}

static TABLE_MODE_AT_DEF: RuleDef = RuleDef {
    name: "TableModeAt",
    label: "I-th most frequent value over a table",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: true,
};

#[derive(Clone)]
struct TableModeAtRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TableModeAtRule {
    fn new() -> TableModeAtRule {
        TableModeAtRule {
            def: &TABLE_MODE_AT_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::ObjectArray),
                Operand::new(DataType::Symbol).with_scope(OperandScope::Secondary),
                Operand::new(DataType::Continuous),
            ]),
        }
    }
}

impl DerivationRule for TableModeAtRule {
    rule_common!();

    fn secondary_scope_dictionary(&self, dictionary: &Dictionary) -> Option<Arc<Dictionary>> {
        relation_operand_class(&self.core.operands[0], dictionary)
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let Some(rank) = self.core.operands[2].continuous_value(record).as_int() else {
            return Symbol::empty();
        };
        if rank < 1 {
            return Symbol::empty();
        }
        let table = self.core.operands[0].object_array_value(record);
        let operand = &mut self.core.operands[1];
        let counts =
            frequencies(table.iter().map(|element| operand.symbol_value(element)));
        mode_at(counts, rank as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::rule::{Constant, Origin};
    use crate::value::{ObjectArray, Value};
    use std::rc::Rc;

    fn element_dictionary() -> Arc<Dictionary> {
        let mut dict = Dictionary::new("Element");
        dict.add_attribute(Attribute::new("f", DataType::Continuous));
        dict.add_attribute(Attribute::new("g", DataType::Continuous));
        dict.add_attribute(Attribute::new("s", DataType::Symbol));
        dict.compile().unwrap();
        Arc::new(dict)
    }

    fn main_dictionary(element_dict: &Arc<Dictionary>) -> Arc<Dictionary> {
        let mut dict = Dictionary::new("Main");
        dict.add_attribute(
            Attribute::new("items", DataType::ObjectArray).with_object_class(element_dict.clone()),
        );
        dict.compile().unwrap();
        Arc::new(dict)
    }

    fn table_record(
        md: &Arc<Dictionary>,
        ed: &Arc<Dictionary>,
        rows: &[(Continuous, f64, &str)],
    ) -> Record {
        let mut table = ObjectArray::new();
        for (f, g, s) in rows {
            let mut element = Record::new(ed.clone(), 0);
            element.set_value_at(0, Value::Continuous(*f));
            element.set_value_at(1, Value::Continuous(Continuous::new(*g)));
            element.set_value_at(2, Value::Symbol(Symbol::intern(s)));
            table.push(Rc::new(element));
        }
        let mut record = Record::new(md.clone(), 0);
        record.set_value_at(0, Value::ObjectArray(table));
        record
    }

    fn stats_rule(stat: ContinuousStat, md: &Arc<Dictionary>) -> TableStatsRule {
        let mut rule = TableStatsRule::new(stat);
        rule.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        rule.operands_mut()[1].set_origin(Origin::Attribute("f".to_string()));
        rule.check_completeness(md).unwrap();
        rule.compile(md);
        rule
    }

    #[test]
    fn test_mean_skips_missing() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        let rec = table_record(
            &md,
            &ed,
            &[
                (Continuous::new(1.0), 0.0, ""),
                (Continuous::MISSING, 0.0, ""),
                (Continuous::new(3.0), 0.0, ""),
            ],
        );
        assert_eq!(stats_rule(ContinuousStat::Mean, &md).compute_continuous(&rec), Continuous::new(2.0));
    }

    #[test]
    fn test_empty_table_statistics() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        let rec = table_record(&md, &ed, &[]);

        assert!(stats_rule(ContinuousStat::Mean, &md).compute_continuous(&rec).is_missing());
        assert!(stats_rule(ContinuousStat::Sum, &md).compute_continuous(&rec).is_missing());
        assert_eq!(
            stats_rule(ContinuousStat::CountSum, &md).compute_continuous(&rec),
            Continuous::ZERO
        );

        let mut count = TableCountRule::new();
        count.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        count.compile(&md);
        assert_eq!(count.compute_continuous(&rec), Continuous::ZERO);
    }

    #[test]
    fn test_std_dev_and_median() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        let rec = table_record(
            &md,
            &ed,
            &[
                (Continuous::new(2.0), 0.0, ""),
                (Continuous::new(4.0), 0.0, ""),
                (Continuous::new(4.0), 0.0, ""),
                (Continuous::new(4.0), 0.0, ""),
                (Continuous::new(5.0), 0.0, ""),
                (Continuous::new(5.0), 0.0, ""),
                (Continuous::new(7.0), 0.0, ""),
                (Continuous::new(9.0), 0.0, ""),
            ],
        );
        // Classic population example: stddev = 2.
        assert_eq!(
            stats_rule(ContinuousStat::StdDev, &md).compute_continuous(&rec),
            Continuous::new(2.0)
        );
        assert_eq!(
            stats_rule(ContinuousStat::Median, &md).compute_continuous(&rec),
            Continuous::new(4.5)
        );
    }

    #[test]
    fn test_mode_lexicographic_tie_break() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        let rec = table_record(
            &md,
            &ed,
            &[
                (Continuous::ZERO, 0.0, "b"),
                (Continuous::ZERO, 0.0, "a"),
                (Continuous::ZERO, 0.0, "a"),
                (Continuous::ZERO, 0.0, "b"),
            ],
        );
        let mut mode = TableSymbolStatsRule::new(SymbolStat::Mode);
        mode.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        mode.operands_mut()[1].set_origin(Origin::Attribute("s".to_string()));
        mode.compile(&md);
        assert_eq!(mode.compute_symbol(&rec).as_str(), "a");
    }

    #[test]
    fn test_mode_at_ranks() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        let rec = table_record(
            &md,
            &ed,
            &[
                (Continuous::ZERO, 0.0, "x"),
                (Continuous::ZERO, 0.0, "x"),
                (Continuous::ZERO, 0.0, "x"),
                (Continuous::ZERO, 0.0, "y"),
                (Continuous::ZERO, 0.0, "y"),
                (Continuous::ZERO, 0.0, "z"),
            ],
        );
        let mut mode_at_rule = TableModeAtRule::new();
        mode_at_rule.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        mode_at_rule.operands_mut()[1].set_origin(Origin::Attribute("s".to_string()));
        for (rank, expected) in [(1.0, "x"), (2.0, "y"), (3.0, "z"), (4.0, "")] {
            mode_at_rule.operands_mut()[2]
                .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(rank))));
            mode_at_rule.compile(&md);
            assert_eq!(mode_at_rule.compute_symbol(&rec).as_str(), expected);
        }
    }

    #[test]
    fn test_count_distinct_and_entropy() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        let rec = table_record(
            &md,
            &ed,
            &[
                (Continuous::ZERO, 0.0, "a"),
                (Continuous::ZERO, 0.0, "b"),
                (Continuous::ZERO, 0.0, "a"),
                // The empty symbol counts as a value.
                (Continuous::ZERO, 0.0, ""),
            ],
        );
        let mut distinct = TableSymbolStatsRule::new(SymbolStat::CountDistinct);
        distinct.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        distinct.operands_mut()[1].set_origin(Origin::Attribute("s".to_string()));
        distinct.compile(&md);
        assert_eq!(distinct.compute_continuous(&rec), Continuous::new(3.0));

        let mut entropy = TableSymbolStatsRule::new(SymbolStat::Entropy);
        entropy.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        entropy.operands_mut()[1].set_origin(Origin::Attribute("s".to_string()));
        entropy.compile(&md);
        // p = [1/2, 1/4, 1/4].
        let expected = -(0.5f64 * 0.5f64.ln() + 2.0 * 0.25 * 0.25f64.ln());
        let got = entropy.compute_continuous(&rec);
        assert!((got.value() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_trend_slope() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        // y = 2x + 1 exactly.
        let rec = table_record(
            &md,
            &ed,
            &[
                (Continuous::new(3.0), 1.0, ""),
                (Continuous::new(5.0), 2.0, ""),
                (Continuous::new(7.0), 3.0, ""),
            ],
        );
        let mut trend_rule = TableTrendRule::new();
        trend_rule.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        trend_rule.operands_mut()[1].set_origin(Origin::Attribute("f".to_string()));
        trend_rule.operands_mut()[2].set_origin(Origin::Attribute("g".to_string()));
        trend_rule.compile(&md);
        let slope = trend_rule.compute_continuous(&rec);
        assert!((slope.value() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_vector_entry_point_with_default() {
        // Sparse source: stored values [4, 8] over 4 records, default 0.
        let values = [Continuous::new(4.0), Continuous::new(8.0)];
        assert_eq!(
            ContinuousStat::Mean.compute_with_default(&values, 4, Continuous::ZERO),
            Continuous::new(3.0)
        );
        assert_eq!(
            ContinuousStat::Sum.compute_with_default(&values, 4, Continuous::ZERO),
            Continuous::new(12.0)
        );
        // The two entry points agree on dense input.
        assert_eq!(
            ContinuousStat::Mean.compute_with_default(&values, 2, Continuous::ZERO),
            ContinuousStat::Mean.compute(values.iter().copied())
        );
    }

    #[test]
    fn test_concat_preserves_order() {
        let ed = element_dictionary();
        let md = main_dictionary(&ed);
        let rec = table_record(
            &md,
            &ed,
            &[(Continuous::ZERO, 0.0, "a"), (Continuous::ZERO, 0.0, "b"), (Continuous::ZERO, 0.0, "c")],
        );
        let mut concat = TableSymbolStatsRule::new(SymbolStat::Concat);
        concat.operands_mut()[0].set_origin(Origin::Attribute("items".to_string()));
        concat.operands_mut()[1].set_origin(Origin::Attribute("s".to_string()));
        concat.compile(&md);
        assert_eq!(concat.compute_symbol(&rec).as_str(), "abc");
    }
}
