//! Sparse value blocks and their indexed key blocks
//!
//! An attribute block groups sparse variables sharing a key space. The
//! [`IndexedKeyBlock`] maps each member's [`VarKey`] (a positive integer or
//! a symbol) to a stable *sparse index*; a [`ValueBlock`] stores only the
//! `(sparse_index, value)` pairs that differ from the block's default
//! value, sorted by sparse index.
//!
//! The textual field encoding is space-separated `key:value` pairs. Pairs
//! may appear in any order in text; the stored form is always sorted.
//! Keys absent from the key block belong to unloaded members and are
//! skipped silently; duplicate known keys are an error.

use crate::continuous::{Continuous, ConversionError};
use crate::symbol::Symbol;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Kind of key a block's members are identified by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKeyType {
    Integer,
    Symbol,
}

/// A member key inside an attribute block.
///
/// Integer keys are 1-based. Symbol keys hash by interned identity, so the
/// key index map below gets O(1) lookups while it keeps the symbols alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarKey {
    Integer(u32),
    Symbol(Symbol),
}

impl VarKey {
    pub fn key_type(&self) -> VarKeyType {
        match self {
            VarKey::Integer(_) => VarKeyType::Integer,
            VarKey::Symbol(_) => VarKeyType::Symbol,
        }
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarKey::Integer(n) => write!(f, "{}", n),
            VarKey::Symbol(s) => f.write_str(s.as_str()),
        }
    }
}

/// Errors raised while declaring block keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("duplicate block key '{0}'")]
    Duplicate(String),
    #[error("block key '{0}' does not match the block key type")]
    TypeMismatch(String),
    #[error("integer block key must be at least 1")]
    NonPositive,
}

/// Errors raised while parsing a sparse block field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockParseError {
    #[error("malformed key:value pair near '{0}'")]
    MalformedPair(String),
    #[error("invalid block key '{0}'")]
    BadKey(String),
    #[error("duplicate block key '{0}'")]
    DuplicateKey(String),
    #[error("invalid value for block key '{key}': {cause}")]
    BadValue { key: String, cause: String },
}

/// Ordered, indexed set of block keys. Immutable once the owning
/// dictionary is compiled.
#[derive(Debug, Clone)]
pub struct IndexedKeyBlock {
    key_type: VarKeyType,
    keys: Vec<VarKey>,
    index: HashMap<VarKey, usize>,
}

impl IndexedKeyBlock {
    pub fn new(key_type: VarKeyType) -> IndexedKeyBlock {
        IndexedKeyBlock { key_type, keys: Vec::new(), index: HashMap::new() }
    }

    /// Append a key, assigning it the next sparse index.
    pub fn add_key(&mut self, key: VarKey) -> Result<usize, KeyError> {
        if key.key_type() != self.key_type {
            return Err(KeyError::TypeMismatch(key.to_string()));
        }
        if let VarKey::Integer(n) = key
            && n == 0
        {
            return Err(KeyError::NonPositive);
        }
        if self.index.contains_key(&key) {
            return Err(KeyError::Duplicate(key.to_string()));
        }
        let sparse_index = self.keys.len();
        self.index.insert(key.clone(), sparse_index);
        self.keys.push(key);
        Ok(sparse_index)
    }

    pub fn from_keys<I: IntoIterator<Item = VarKey>>(
        key_type: VarKeyType,
        keys: I,
    ) -> Result<IndexedKeyBlock, KeyError> {
        let mut block = IndexedKeyBlock::new(key_type);
        for key in keys {
            block.add_key(key)?;
        }
        Ok(block)
    }

    pub fn key_type(&self) -> VarKeyType {
        self.key_type
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// O(1) expected lookup of a key's sparse index.
    pub fn key_index(&self, key: &VarKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn key_at(&self, sparse_index: usize) -> &VarKey {
        &self.keys[sparse_index]
    }

    pub fn keys(&self) -> &[VarKey] {
        &self.keys
    }
}

/// Mapping from old sparse indexes to new ones; `-1` drops the entry.
pub type NewValueIndexes = Vec<i32>;

/// A sparse block: `(sparse_index, value)` pairs, strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBlock<T> {
    pairs: Vec<(usize, T)>,
}

pub type ContinuousValueBlock = ValueBlock<Continuous>;
pub type SymbolValueBlock = ValueBlock<Symbol>;

impl<T: Clone + PartialEq> ValueBlock<T> {
    /// Allocate an empty block expecting `count` entries.
    pub fn with_capacity(count: usize) -> ValueBlock<T> {
        ValueBlock { pairs: Vec::with_capacity(count) }
    }

    pub fn empty() -> ValueBlock<T> {
        ValueBlock { pairs: Vec::new() }
    }

    /// Append a pair; sparse indexes must arrive in increasing order.
    pub fn push(&mut self, sparse_index: usize, value: T) {
        debug_assert!(
            self.pairs.last().is_none_or(|(last, _)| *last < sparse_index),
            "sparse indexes must be strictly increasing"
        );
        self.pairs.push((sparse_index, value));
    }

    /// Build from pairs in any order; panics on duplicates in debug only,
    /// last writer wins otherwise.
    pub fn from_unsorted_pairs(mut pairs: Vec<(usize, T)>) -> ValueBlock<T> {
        pairs.sort_by_key(|(index, _)| *index);
        debug_assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0), "duplicate sparse index");
        ValueBlock { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn sparse_index_at(&self, position: usize) -> usize {
        self.pairs[position].0
    }

    pub fn value_at(&self, position: usize) -> &T {
        &self.pairs[position].1
    }

    /// Binary search by sparse index.
    pub fn value_at_sparse_index(&self, sparse_index: usize) -> Option<&T> {
        self.pairs
            .binary_search_by_key(&sparse_index, |(index, _)| *index)
            .ok()
            .map(|position| &self.pairs[position].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.pairs.iter().map(|(index, value)| (*index, value))
    }

    /// Re-index through `new_value_indexes`, dropping entries mapped to
    /// `-1`, and sort by the new index. This is the reverse-mapping
    /// primitive behind derived blocks that are key subsets of a source.
    pub fn extract_subset(&self, new_value_indexes: &NewValueIndexes) -> ValueBlock<T> {
        let mut pairs = Vec::new();
        for (old_index, value) in self.iter() {
            let mapped = new_value_indexes.get(old_index).copied().unwrap_or(-1);
            if mapped >= 0 {
                pairs.push((mapped as usize, value.clone()));
            }
        }
        ValueBlock::from_unsorted_pairs(pairs)
    }
}

/// Per-type hooks for the textual field encoding.
pub trait BlockValue: Clone + PartialEq + Sized {
    fn parse_block_value(token: &str) -> Result<Self, String>;
    fn write_block_value(&self) -> String;
}

impl BlockValue for Continuous {
    fn parse_block_value(token: &str) -> Result<Self, String> {
        let (value, error) = Continuous::parse(token);
        match error {
            ConversionError::Ok | ConversionError::Empty => Ok(value),
            other => Err(other.label().to_string()),
        }
    }

    fn write_block_value(&self) -> String {
        self.to_field_string()
    }
}

impl BlockValue for Symbol {
    fn parse_block_value(token: &str) -> Result<Self, String> {
        Ok(Symbol::intern(token))
    }

    fn write_block_value(&self) -> String {
        quote_component(self.as_str())
    }
}

impl<T: BlockValue> ValueBlock<T> {
    /// Parse the sparse field encoding against `keys`.
    ///
    /// Pairs whose key is unknown to `keys` are skipped (unloaded
    /// members); pairs whose value equals `default` are not stored;
    /// duplicate known keys are an error.
    pub fn build_from_field(
        keys: &IndexedKeyBlock,
        field_text: &str,
        default: &T,
    ) -> Result<ValueBlock<T>, BlockParseError> {
        let mut pairs: Vec<(usize, T)> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut scanner = PairScanner::new(field_text);

        while let Some((key_text, value_text)) = scanner.next_pair()? {
            let key = match keys.key_type() {
                VarKeyType::Integer => match key_text.parse::<u32>() {
                    Ok(n) if n >= 1 => VarKey::Integer(n),
                    _ => return Err(BlockParseError::BadKey(key_text)),
                },
                VarKeyType::Symbol => VarKey::Symbol(Symbol::intern(&key_text)),
            };

            let Some(sparse_index) = keys.key_index(&key) else {
                continue;
            };
            if !seen.insert(sparse_index) {
                return Err(BlockParseError::DuplicateKey(key_text));
            }

            let value = T::parse_block_value(&value_text)
                .map_err(|cause| BlockParseError::BadValue { key: key_text, cause })?;
            if value != *default {
                pairs.push((sparse_index, value));
            }
        }

        Ok(ValueBlock::from_unsorted_pairs(pairs))
    }

    /// Inverse of [`build_from_field`](Self::build_from_field): sorted
    /// order, entries equal to `default` omitted.
    pub fn write_field(&self, keys: &IndexedKeyBlock, default: &T) -> String {
        let mut out = String::new();
        for (sparse_index, value) in self.iter() {
            if *value == *default {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            match keys.key_at(sparse_index) {
                VarKey::Integer(n) => out.push_str(&n.to_string()),
                VarKey::Symbol(s) => out.push_str(&quote_component(s.as_str())),
            }
            out.push(':');
            out.push_str(&value.write_block_value());
        }
        out
    }
}

/// Quote a key or symbol value when it would break the pair syntax.
fn quote_component(text: &str) -> String {
    let needs_quotes =
        text.is_empty() || text.contains(' ') || text.contains(':') || text.starts_with('"');
    if !needs_quotes {
        return text.to_string();
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Scanner over space-separated `key:value` pairs with optional quoting.
struct PairScanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> PairScanner<'a> {
    fn new(text: &'a str) -> PairScanner<'a> {
        PairScanner { text, pos: 0 }
    }

    fn next_pair(&mut self) -> Result<Option<(String, String)>, BlockParseError> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos] == b' ' {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return Ok(None);
        }
        let start = self.pos;

        let key = self.scan_component(b':').ok_or_else(|| self.malformed(start))?;
        if self.pos >= bytes.len() || bytes[self.pos] != b':' {
            return Err(self.malformed(start));
        }
        self.pos += 1;
        let value = self.scan_component(b' ').ok_or_else(|| self.malformed(start))?;
        if self.pos < bytes.len() && bytes[self.pos] != b' ' {
            return Err(self.malformed(start));
        }
        Ok(Some((key, value)))
    }

    /// One component: quoted (with `""` escapes) or raw until `stop`.
    fn scan_component(&mut self, stop: u8) -> Option<String> {
        let bytes = self.text.as_bytes();
        if self.pos < bytes.len() && bytes[self.pos] == b'"' {
            self.pos += 1;
            let mut component = String::new();
            loop {
                if self.pos >= bytes.len() {
                    return None;
                }
                if bytes[self.pos] == b'"' {
                    if self.pos + 1 < bytes.len() && bytes[self.pos + 1] == b'"' {
                        component.push('"');
                        self.pos += 2;
                        continue;
                    }
                    self.pos += 1;
                    return Some(component);
                }
                let rest = &self.text[self.pos..];
                let c = rest.chars().next()?;
                component.push(c);
                self.pos += c.len_utf8();
            }
        } else {
            let start = self.pos;
            while self.pos < bytes.len() && bytes[self.pos] != stop && bytes[self.pos] != b' ' {
                self.pos += 1;
            }
            Some(self.text[start..self.pos].to_string())
        }
    }

    fn malformed(&self, start: usize) -> BlockParseError {
        let end = (start + 24).min(self.text.len());
        let mut cut = end;
        while !self.text.is_char_boundary(cut) {
            cut -= 1;
        }
        BlockParseError::MalformedPair(self.text[start..cut].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integer_keys(keys: &[u32]) -> IndexedKeyBlock {
        IndexedKeyBlock::from_keys(
            VarKeyType::Integer,
            keys.iter().map(|n| VarKey::Integer(*n)),
        )
        .unwrap()
    }

    fn symbol_keys(keys: &[&str]) -> IndexedKeyBlock {
        IndexedKeyBlock::from_keys(
            VarKeyType::Symbol,
            keys.iter().map(|s| VarKey::Symbol(Symbol::intern(s))),
        )
        .unwrap()
    }

    #[test]
    fn test_key_block_lookup() {
        let keys = integer_keys(&[1, 2, 3]);
        assert_eq!(keys.key_index(&VarKey::Integer(1)), Some(0));
        assert_eq!(keys.key_index(&VarKey::Integer(3)), Some(2));
        assert_eq!(keys.key_index(&VarKey::Integer(9)), None);
        assert_eq!(keys.key_count(), 3);
    }

    #[test]
    fn test_key_block_rejects_bad_keys() {
        let mut keys = integer_keys(&[1]);
        assert_eq!(keys.add_key(VarKey::Integer(1)), Err(KeyError::Duplicate("1".into())));
        assert_eq!(keys.add_key(VarKey::Integer(0)), Err(KeyError::NonPositive));
        assert!(matches!(
            keys.add_key(VarKey::Symbol(Symbol::intern("x"))),
            Err(KeyError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_parse_sparse_field() {
        // Members at keys {1,2,3}, default 0: text "1:1.5 3:-2".
        let keys = integer_keys(&[1, 2, 3]);
        let block =
            ContinuousValueBlock::build_from_field(&keys, "1:1.5 3:-2", &Continuous::ZERO).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block.sparse_index_at(0), 0);
        assert_eq!(*block.value_at(0), Continuous::new(1.5));
        assert_eq!(block.sparse_index_at(1), 2);
        assert_eq!(*block.value_at(1), Continuous::new(-2.0));

        let text = block.write_field(&keys, &Continuous::ZERO);
        assert_eq!(text, "1:1.5 3:-2");
    }

    #[test]
    fn test_parse_any_order_stored_sorted() {
        let keys = integer_keys(&[1, 2, 3]);
        let block =
            ContinuousValueBlock::build_from_field(&keys, "3:-2 1:1.5", &Continuous::ZERO).unwrap();
        assert_eq!(block.write_field(&keys, &Continuous::ZERO), "1:1.5 3:-2");
    }

    #[test]
    fn test_parse_skips_unknown_and_default() {
        let keys = integer_keys(&[1, 2]);
        let block = ContinuousValueBlock::build_from_field(&keys, "1:4 7:9 2:0", &Continuous::ZERO)
            .unwrap();
        // Key 7 is an unloaded member, 2:0 equals the default.
        assert_eq!(block.len(), 1);
        assert_eq!(block.value_at_sparse_index(0), Some(&Continuous::new(4.0)));
        assert_eq!(block.value_at_sparse_index(1), None);
    }

    #[test]
    fn test_parse_duplicate_key_is_error() {
        let keys = integer_keys(&[1, 2]);
        let result = ContinuousValueBlock::build_from_field(&keys, "1:4 1:5", &Continuous::ZERO);
        assert_eq!(result, Err(BlockParseError::DuplicateKey("1".into())));
    }

    #[test]
    fn test_parse_bad_value_is_error() {
        let keys = integer_keys(&[1]);
        let result = ContinuousValueBlock::build_from_field(&keys, "1:abc", &Continuous::ZERO);
        assert!(matches!(result, Err(BlockParseError::BadValue { .. })));
    }

    #[test]
    fn test_symbol_block_quoting_round_trip() {
        let keys = symbol_keys(&["plain", "with space", "co:lon"]);
        let default = Symbol::empty();
        let mut block = SymbolValueBlock::empty();
        block.push(0, Symbol::intern("a"));
        block.push(1, Symbol::intern("b b"));
        block.push(2, Symbol::intern("c\"c"));

        let text = block.write_field(&keys, &default);
        let back = SymbolValueBlock::build_from_field(&keys, &text, &default).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_sparse_round_trip_integer_blocks() {
        let keys = integer_keys(&[1, 2, 3, 4, 5]);
        for pairs in [
            vec![(0usize, 1.5), (2, -2.0)],
            vec![(1, 0.25)],
            vec![(0, -1.0), (1, 2.0), (2, 3.0), (3, 4.5), (4, 1e10)],
            vec![],
        ] {
            let block = ContinuousValueBlock::from_unsorted_pairs(
                pairs.iter().map(|(i, v)| (*i, Continuous::new(*v))).collect(),
            );
            let text = block.write_field(&keys, &Continuous::ZERO);
            let back =
                ContinuousValueBlock::build_from_field(&keys, &text, &Continuous::ZERO).unwrap();
            assert_eq!(back, block, "round trip of {:?}", text);
        }
    }

    #[test]
    fn test_extract_subset() {
        let block = ContinuousValueBlock::from_unsorted_pairs(vec![
            (0, Continuous::new(1.0)),
            (1, Continuous::new(2.0)),
            (2, Continuous::new(3.0)),
        ]);
        // Keep 0 and 2, reversing their order in the target space.
        let mapping: NewValueIndexes = vec![1, -1, 0];
        let subset = block.extract_subset(&mapping);
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.sparse_index_at(0), 0);
        assert_eq!(*subset.value_at(0), Continuous::new(3.0));
        assert_eq!(subset.sparse_index_at(1), 1);
        assert_eq!(*subset.value_at(1), Continuous::new(1.0));
    }

    #[test]
    fn test_extract_subset_composes() {
        let block = ContinuousValueBlock::from_unsorted_pairs(
            (0..6).map(|i| (i, Continuous::new(i as f64))).collect(),
        );
        let m1: NewValueIndexes = vec![2, -1, 0, 1, -1, 3];
        let m2: NewValueIndexes = vec![-1, 0, 1, 2];

        // Composition: old -> m1 -> m2, dropping through either -1.
        let mut composed: NewValueIndexes = Vec::new();
        for old in 0..6 {
            let mid = m1[old];
            composed.push(if mid < 0 { -1 } else { m2[mid as usize] });
        }

        let two_step = block.extract_subset(&m1).extract_subset(&m2);
        let one_step = block.extract_subset(&composed);
        assert_eq!(two_step, one_step);
    }

    #[test]
    fn test_binary_search() {
        let block = ContinuousValueBlock::from_unsorted_pairs(
            (0..100).filter(|i| i % 3 == 0).map(|i| (i, Continuous::new(i as f64))).collect(),
        );
        assert_eq!(block.value_at_sparse_index(33), Some(&Continuous::new(33.0)));
        assert_eq!(block.value_at_sparse_index(34), None);
    }
}
