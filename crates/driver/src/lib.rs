//! tabrule-driver: binding dictionaries to tabular files
//!
//! The table driver opens an input file against a compiled dictionary,
//! binds header columns to load indexes, and streams records with the
//! §-style row dispositions (drop or degrade, never abort). The
//! dictionary JSON loader realizes the external dictionary-file
//! interface, and the error sink applies flow control to per-row
//! warnings.

pub mod dictionary_file;
pub mod sink;
pub mod table;

pub use dictionary_file::{
    DictionaryFileSpec, DictionarySpec, ExpressionSpec, LoadError, load_dictionaries,
    parse_dictionary_file,
};
pub use sink::{ErrorSink, WarningCategory};
pub use table::{DataTableDriver, OpenError, TableFormat, write_header, write_record};
