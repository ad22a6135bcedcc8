//! Error taxonomy of the buffered file layer

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the underlying file driver, plus encoding rejections
/// detected on the first page of an input file.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("cannot open '{path}'")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("read error on '{path}' at offset {offset}")]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("write error on '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("close error on '{path}'")]
    Close {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding error in '{path}': {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: EncodingError,
    },
}

/// Input encodings the line layer refuses to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("UTF-16 or UTF-32 byte order mark; only ASCII-compatible encodings are supported")]
    UnsupportedBom,
    #[error("null byte in the first page; the file looks binary or UTF-16/UTF-32 encoded")]
    NulByte,
    #[error("carriage returns without line feeds; legacy Mac line endings are not supported")]
    LegacyMacFormat,
}
