//! Text tokenization and character n-gram rules
//!
//! `MultipleCharNGramCounts` hashes character n-grams into a series of
//! hash tables of growing sizes. The canonical schedule (1-grams at sizes
//! 1, 16, 32, 64, 128; 2-grams at 256, 512, 1024; 3-grams at 2048, 4096,
//! 8192; 4- to 8-grams at 16384 and 32768 each) concatenates into one
//! 1-based key space, so any prefix of the variables in generation order
//! is a valid smaller representation. The tables active for a requested
//! block size are selected by cumulative size. Counts are deterministic
//! for a given (text, block size).

use super::math::mix64;
use super::rule_common;
use crate::dictionary::{AttributeBlock, Dictionary, SchemaError};
use crate::record::Record;
use crate::rule::{Constant, DerivationRule, Operand, Origin, RuleCore, RuleDef, RuleRegistry};
use std::sync::OnceLock;
use tabrule_core::{Continuous, ContinuousValueBlock, DataType, IndexedKeyBlock, Symbol, VarKey};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Box::new(TokenizeRule::new()));
    registry.register(Box::new(TokenCountsRule::new()));
    registry.register(Box::new(NGramCountsRule::new()));
}

// ---------------------------------------------------------------------------

static TOKENIZE_DEF: RuleDef = RuleDef {
    name: "Tokenize",
    label: "Space-separated alphabetic tokens of a value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct TokenizeRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TokenizeRule {
    fn new() -> TokenizeRule {
        TokenizeRule {
            def: &TOKENIZE_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Symbol)]),
        }
    }
}

/// Alphabetic runs of `text`, in order.
fn alphabetic_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphabetic()).filter(|token| !token.is_empty())
}

impl DerivationRule for TokenizeRule {
    rule_common!();

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let value = self.core.operands[0].symbol_value(record);
        let tokens: Vec<&str> = alphabetic_tokens(value.as_str()).collect();
        Symbol::intern(&tokens.join(" "))
    }
}

// ---------------------------------------------------------------------------

static TOKEN_COUNTS_DEF: RuleDef = RuleDef {
    name: "TokenCounts",
    label: "Counts of known tokens in a text value",
    result_type: DataType::ContinuousValueBlock,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

/// Counts whitespace-separated tokens of the text against the consumer
/// block's symbol keys; unknown tokens are simply not represented.
#[derive(Clone)]
struct TokenCountsRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TokenCountsRule {
    fn new() -> TokenCountsRule {
        TokenCountsRule {
            def: &TOKEN_COUNTS_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Text)]),
        }
    }
}

impl DerivationRule for TokenCountsRule {
    rule_common!();

    fn compute_continuous_block(
        &mut self,
        record: &Record,
        target_keys: &IndexedKeyBlock,
    ) -> ContinuousValueBlock {
        let text = self.core.operands[0].text_value(record);
        let mut pairs: Vec<(usize, f64)> = Vec::new();
        for token in text.as_str().split_whitespace() {
            let key = VarKey::Symbol(Symbol::intern(token));
            if let Some(sparse_index) = target_keys.key_index(&key) {
                match pairs.iter_mut().find(|(index, _)| *index == sparse_index) {
                    Some((_, count)) => *count += 1.0,
                    None => pairs.push((sparse_index, 1.0)),
                }
            }
        }
        ContinuousValueBlock::from_unsorted_pairs(
            pairs.into_iter().map(|(index, count)| (index, Continuous::new(count))).collect(),
        )
    }
}

// ---------------------------------------------------------------------------

const MAX_NGRAM_LENGTH: usize = 8;
const MAX_BLOCK_SIZE: i64 = 1_000_000;

struct NGramSchedule {
    lengths: Vec<usize>,
    sizes: Vec<u64>,
    /// cumulated[i] = total size of tables before table i.
    cumulated: Vec<u64>,
    /// masks[len] keeps the low `len` bytes of the rolling value.
    masks: [u64; MAX_NGRAM_LENGTH + 1],
}

fn schedule() -> &'static NGramSchedule {
    static SCHEDULE: OnceLock<NGramSchedule> = OnceLock::new();
    SCHEDULE.get_or_init(|| {
        let mut lengths = Vec::new();
        let mut sizes = Vec::new();

        // 1-grams: a size-1 table (text length), then 16 to 128.
        lengths.push(1);
        sizes.push(1);
        let mut size = 16;
        while size <= 128 {
            lengths.push(1);
            sizes.push(size);
            size *= 2;
        }
        // 2-grams: the next three doublings.
        size = 256;
        while size <= 1024 {
            lengths.push(2);
            sizes.push(size);
            size *= 2;
        }
        // 3-grams: the next three doublings.
        size = 2048;
        while size <= 8192 {
            lengths.push(3);
            sizes.push(size);
            size *= 2;
        }
        // Longer n-grams: two fixed sizes each.
        for length in 4..=MAX_NGRAM_LENGTH {
            lengths.push(length);
            sizes.push(16384);
            lengths.push(length);
            sizes.push(32768);
        }

        let mut cumulated = vec![0u64];
        for table_size in &sizes {
            cumulated.push(cumulated.last().unwrap() + table_size);
        }

        let mut masks = [0u64; MAX_NGRAM_LENGTH + 1];
        for length in 1..=MAX_NGRAM_LENGTH {
            masks[length] = if length == 8 { u64::MAX } else { (1u64 << (8 * length)) - 1 };
        }

        NGramSchedule { lengths, sizes, cumulated, masks }
    })
}

static NGRAM_COUNTS_DEF: RuleDef = RuleDef {
    name: "MultipleCharNGramCounts",
    label: "Char n-gram counts of a text value across a table series",
    result_type: DataType::ContinuousValueBlock,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct NGramCountsRule {
    def: &'static RuleDef,
    core: RuleCore,
    used_tables: usize,
    // Scratch reused across records: dense counts plus the touched
    // sparse indexes, zeroed again after each block is built.
    counts: Vec<i64>,
    touched: Vec<usize>,
}

impl NGramCountsRule {
    fn new() -> NGramCountsRule {
        NGramCountsRule {
            def: &NGRAM_COUNTS_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Text),
                Operand::new(DataType::Continuous),
            ]),
            used_tables: 0,
            counts: Vec::new(),
            touched: Vec::new(),
        }
    }

    fn block_size(&self) -> Option<i64> {
        match self.core.operands[1].origin() {
            Origin::Constant(Constant::Continuous(value)) => value.as_int(),
            _ => None,
        }
    }
}

impl DerivationRule for NGramCountsRule {
    rule_common!();

    fn check_operands_completeness(&self, _dictionary: &Dictionary) -> Result<(), SchemaError> {
        match self.core.operands[1].origin() {
            Origin::Constant(Constant::Continuous(value)) => {
                let Some(size) = value.as_int() else {
                    return Err(SchemaError::BadRule {
                        rule: self.name().to_string(),
                        cause: "the block size operand must be an integer".to_string(),
                    });
                };
                if !(1..=MAX_BLOCK_SIZE).contains(&size) {
                    return Err(SchemaError::BadRule {
                        rule: self.name().to_string(),
                        cause: format!(
                            "block size {} must be between 1 and {}",
                            size, MAX_BLOCK_SIZE
                        ),
                    });
                }
                Ok(())
            }
            _ => Err(SchemaError::BadRule {
                rule: self.name().to_string(),
                cause: "the block size operand must be a constant".to_string(),
            }),
        }
    }

    fn check_block_attributes(
        &self,
        _dictionary: &Dictionary,
        block: &AttributeBlock,
    ) -> Result<(), SchemaError> {
        let block_size = self.block_size().unwrap_or(0);
        for member in block.members() {
            let VarKey::Integer(key) = member.var_key else {
                return Err(SchemaError::BadRule {
                    rule: self.name().to_string(),
                    cause: format!("member '{}' must have an integer VarKey", member.name),
                });
            };
            if key as i64 > block_size {
                return Err(SchemaError::BadRule {
                    rule: self.name().to_string(),
                    cause: format!(
                        "member '{}' has VarKey {} beyond the {} generated n-gram variables",
                        member.name, key, block_size
                    ),
                });
            }
        }
        Ok(())
    }

    fn compile_rule(&mut self, _dictionary: &Dictionary) {
        // Active tables cover the requested block size by cumulated sizes.
        let block_size = self.block_size().unwrap_or(0).max(0) as u64;
        let schedule = schedule();
        self.used_tables = 0;
        let mut cumulated = 0;
        while cumulated < block_size && self.used_tables < schedule.sizes.len() {
            cumulated += schedule.sizes[self.used_tables];
            self.used_tables += 1;
        }
    }

    fn compute_continuous_block(
        &mut self,
        record: &Record,
        target_keys: &IndexedKeyBlock,
    ) -> ContinuousValueBlock {
        let text = self.core.operands[0].text_value(record);
        let bytes = text.as_str().as_bytes();
        let schedule = schedule();

        if self.counts.len() < target_keys.key_count() {
            self.counts.resize(target_keys.key_count(), 0);
        }
        debug_assert!(self.touched.is_empty());

        let mut first_table = 0;
        while first_table < self.used_tables {
            let length = schedule.lengths[first_table];
            let mut last_table = first_table;
            while last_table + 1 < self.used_tables
                && schedule.lengths[last_table + 1] == length
            {
                last_table += 1;
            }

            if bytes.len() >= length {
                let start_key_base = 1 + schedule.cumulated[first_table];
                let mask = schedule.masks[length];

                // Rolling n-gram value over the text bytes.
                let mut value: u64 = 0;
                for byte in bytes.iter().take(length - 1) {
                    value = (value << 8) + *byte as u64;
                }
                for byte in bytes.iter().skip(length - 1) {
                    value = ((value << 8) + *byte as u64) & mask;

                    // One pseudo-random base hash per n-gram, varied per
                    // table cuckoo-style.
                    let mut hash = mix64(value);
                    let mut start_key = start_key_base;
                    for table in first_table..=last_table {
                        let key = start_key + hash % schedule.sizes[table];
                        if let Some(sparse_index) =
                            target_keys.key_index(&VarKey::Integer(key as u32))
                        {
                            if self.counts[sparse_index] == 0 {
                                self.touched.push(sparse_index);
                            }
                            self.counts[sparse_index] += 1;
                        }
                        start_key += schedule.sizes[table];
                        hash ^= value;
                    }
                }
            }
            first_table = last_table + 1;
        }

        self.touched.sort_unstable();
        let mut block = ContinuousValueBlock::with_capacity(self.touched.len());
        for sparse_index in self.touched.drain(..) {
            block.push(sparse_index, Continuous::new(self.counts[sparse_index] as f64));
            self.counts[sparse_index] = 0;
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::value::Value;
    use std::sync::Arc;
    use tabrule_core::{Text, VarKeyType};

    fn text_dict() -> Arc<Dictionary> {
        let mut dict = Dictionary::new("T");
        dict.add_attribute(Attribute::new("t", DataType::Text));
        dict.add_attribute(Attribute::new("s", DataType::Symbol));
        dict.compile().unwrap();
        Arc::new(dict)
    }

    fn record(dict: &Arc<Dictionary>, text: &str) -> Record {
        let mut record = Record::new(dict.clone(), 0);
        record.set_value_at(0, Value::Text(Text::new(text)));
        record.set_value_at(1, Value::Symbol(Symbol::intern(text)));
        record
    }

    #[test]
    fn test_tokenize_alphabetic_runs() {
        let dict = text_dict();
        let mut rule = TokenizeRule::new();
        rule.operands_mut()[0].set_origin(Origin::Attribute("s".to_string()));
        rule.compile(&dict);
        let rec = record(&dict, "hello,world 42 foo_bar");
        assert_eq!(rule.compute_symbol(&rec).as_str(), "hello world foo bar");
    }

    #[test]
    fn test_token_counts() {
        let dict = text_dict();
        let keys = IndexedKeyBlock::from_keys(
            VarKeyType::Symbol,
            ["the", "cat"].iter().map(|s| VarKey::Symbol(Symbol::intern(s))),
        )
        .unwrap();

        let mut rule = TokenCountsRule::new();
        rule.operands_mut()[0].set_origin(Origin::Attribute("t".to_string()));
        rule.compile(&dict);

        let rec = record(&dict, "the cat saw the dog");
        let block = rule.compute_continuous_block(&rec, &keys);
        assert_eq!(block.len(), 2);
        assert_eq!(block.value_at_sparse_index(0), Some(&Continuous::new(2.0)));
        assert_eq!(block.value_at_sparse_index(1), Some(&Continuous::new(1.0)));
    }

    #[test]
    fn test_schedule_shape() {
        let schedule = schedule();
        // 5 one-gram tables, 3 two-gram, 3 three-gram, 2 each for 4..=8.
        assert_eq!(schedule.sizes.len(), 5 + 3 + 3 + 5 * 2);
        assert_eq!(&schedule.sizes[..5], &[1, 16, 32, 64, 128]);
        assert_eq!(&schedule.sizes[5..8], &[256, 512, 1024]);
        assert_eq!(&schedule.sizes[8..11], &[2048, 4096, 8192]);
        assert_eq!(schedule.lengths[11], 4);
        // The whole key space stays within u32 range.
        assert!(*schedule.cumulated.last().unwrap() < u32::MAX as u64);
    }

    fn full_key_block(size: u32) -> IndexedKeyBlock {
        IndexedKeyBlock::from_keys(
            VarKeyType::Integer,
            (1..=size).map(VarKey::Integer),
        )
        .unwrap()
    }

    fn ngram_rule(block_size: f64, dict: &Arc<Dictionary>) -> NGramCountsRule {
        let mut rule = NGramCountsRule::new();
        rule.operands_mut()[0].set_origin(Origin::Attribute("t".to_string()));
        rule.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(block_size))));
        rule.check_operands_completeness(dict).unwrap();
        rule.compile(dict);
        rule
    }

    #[test]
    fn test_ngram_counts_deterministic() {
        let dict = text_dict();
        let keys = full_key_block(241);
        let mut rule = ngram_rule(241.0, &dict);

        let rec = record(&dict, "abcab");
        let first = rule.compute_continuous_block(&rec, &keys);
        let second = rule.compute_continuous_block(&rec, &keys);
        assert_eq!(first, second);
        assert!(!first.is_empty());

        // The size-1 table counts every 1-gram: key 1 holds the text length.
        assert_eq!(first.value_at_sparse_index(0), Some(&Continuous::new(5.0)));
    }

    #[test]
    fn test_ngram_small_block_uses_prefix_tables() {
        let dict = text_dict();
        // Block size 17 activates the size-1 and size-16 tables only.
        let keys = full_key_block(17);
        let mut rule = ngram_rule(17.0, &dict);

        let rec = record(&dict, "hello");
        let block = rule.compute_continuous_block(&rec, &keys);
        // Total count: 5 in table one, 5 distributed in table two.
        let total: f64 = (0..block.len()).map(|i| block.value_at(i).value()).sum();
        assert_eq!(total, 10.0);
        for position in 0..block.len() {
            assert!(block.sparse_index_at(position) < 17);
        }
    }

    #[test]
    fn test_ngram_empty_text() {
        let dict = text_dict();
        let keys = full_key_block(241);
        let mut rule = ngram_rule(241.0, &dict);
        let rec = record(&dict, "");
        assert!(rule.compute_continuous_block(&rec, &keys).is_empty());
    }

    #[test]
    fn test_ngram_prefix_consistency() {
        // A smaller block is a prefix of the key space: counts for keys
        // inside the smaller range match the bigger configuration's
        // counts in the shared tables.
        let dict = text_dict();
        let rec = record(&dict, "prefix property");

        let small_keys = full_key_block(17);
        let mut small_rule = ngram_rule(17.0, &dict);
        let small = small_rule.compute_continuous_block(&rec, &small_keys);

        let big_keys = full_key_block(241);
        let mut big_rule = ngram_rule(241.0, &dict);
        let big = big_rule.compute_continuous_block(&rec, &big_keys);

        for (sparse_index, value) in small.iter() {
            assert_eq!(big.value_at_sparse_index(sparse_index), Some(value));
        }
    }

    #[test]
    fn test_block_size_bounds_rejected() {
        let dict = text_dict();
        let mut rule = NGramCountsRule::new();
        rule.operands_mut()[0].set_origin(Origin::Attribute("t".to_string()));
        rule.operands_mut()[1]
            .set_origin(Origin::Constant(Constant::Continuous(Continuous::new(0.0))));
        assert!(rule.check_operands_completeness(&dict).is_err());
    }
}
