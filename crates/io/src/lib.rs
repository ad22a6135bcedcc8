//! tabrule-io: line-accurate buffered tabular file access
//!
//! Input files expose byte-positioned line APIs designed for chunked
//! scanning; output files write through a cache with append and
//! open-on-demand modes. The [`field`] module implements the field
//! separator and quoting discipline shared by both directions, and
//! [`system`] is the driver seam behind which local, remote or
//! distributed filesystems live.

pub mod error;
pub mod field;
pub mod input;
pub mod output;
pub mod system;

pub use error::{EncodingError, IoError};
pub use field::{FieldError, FieldParser, InvalidSeparator, MAX_FIELD_SIZE, ParsedField, write_field};
pub use input::{InputBufferedFile, InputOptions, LineFill, OuterFill};
pub use output::{OutputBufferedFile, OutputOptions};
pub use system::{FileReader, FileWriter, LocalFileDriver, SystemFileDriver, resolve_local_path};
