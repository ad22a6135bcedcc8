//! tabrule-core: value model for tabular records
//!
//! The leaf crate of the tabrule workspace. It defines the closed set of
//! value types a dictionary can declare (continuous values with a Missing
//! sentinel, interned symbols, temporal values, capped text) and the
//! sparse block machinery shared by the schema, record and rule layers.
//!
//! Nothing in this crate performs I/O or knows about schemas; those live
//! in `tabrule-io` and `tabrule-data`.

pub mod block;
pub mod continuous;
pub mod symbol;
pub mod temporal;
pub mod text;
pub mod value;

pub use block::{
    BlockParseError, ContinuousValueBlock, IndexedKeyBlock, KeyError, NewValueIndexes,
    SymbolValueBlock, ValueBlock, VarKey, VarKeyType,
};
pub use continuous::{Continuous, ConversionError};
pub use symbol::{NumericKey, Symbol};
pub use temporal::{Date, Time, Timestamp, TimestampTz, check_format};
pub use text::Text;
pub use value::DataType;
