//! tabrule-data: schemas, records and the derivation rule engine
//!
//! A [`dictionary::Dictionary`] declares typed fields with optional
//! derivation rules; [`record::Record`]s are its row instances; the
//! [`rule`] module defines the operand and rule framework; [`rules`] is
//! the closed standard library of registered rules; an
//! [`evaluator::Evaluator`] computes derived fields one record at a time.
//!
//! Concurrency model: everything here is single-threaded within one
//! evaluator. Dictionaries are immutable once compiled and can be shared
//! across threads; rules carry mutable caches and are cloned per
//! evaluator instead.

pub mod dictionary;
pub mod evaluator;
pub mod record;
pub mod rule;
pub mod rules;
pub mod value;

pub use dictionary::{
    Attribute, AttributeBlock, BlockDefault, BlockMember, DataItem, Dictionary, SchemaError,
};
pub use evaluator::Evaluator;
pub use record::Record;
pub use rule::{
    Constant, DerivationRule, Operand, OperandScope, Origin, RuleDef, RuleRegistry,
    set_operand_count,
};
pub use value::{ObjectArray, Structure, SymbolKeyedMap, Value};
