//! Data table driver: header binding and record streaming
//!
//! Binds an input file's columns to a compiled dictionary, producing the
//! load-index vector, then streams records one line at a time. Rows
//! never abort the process: they are dropped (row-level problems, field
//! errors in key columns) or accepted with degraded values (conversion
//! and block parse problems), with warnings routed through the
//! [`ErrorSink`]. For a root dictionary the key columns are captured
//! into a last-read-key vector even when the rest of the row is
//! rejected, so deduplication decisions can be made before the row is
//! discarded.

use crate::sink::{ErrorSink, WarningCategory};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tabrule_core::{
    Continuous, ContinuousValueBlock, Date, Symbol, SymbolValueBlock, Text, Time, Timestamp,
    TimestampTz, ValueBlock,
};
use tabrule_data::dictionary::{DataItem, Dictionary, SchemaError};
use tabrule_data::record::Record;
use tabrule_data::value::Value;
use tabrule_io::error::IoError;
use tabrule_io::field::{FieldParser, InvalidSeparator, ParsedField};
use tabrule_io::input::{InputBufferedFile, InputOptions};
use tabrule_io::output::OutputBufferedFile;
use tabrule_io::system::SystemFileDriver;
use thiserror::Error;

/// Interval between cancellation checks, in records.
const INTERRUPTION_CHECK_PERIOD: u64 = 128;

#[derive(Debug, Clone)]
pub struct TableFormat {
    pub header_line: bool,
    pub separator: u8,
    pub input: InputOptions,
}

impl Default for TableFormat {
    fn default() -> Self {
        TableFormat { header_line: true, separator: b'\t', input: InputOptions::default() }
    }
}

/// Failures that keep the driver from entering the open state.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Separator(#[from] InvalidSeparator),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("input file has no header line")]
    MissingHeader,
    #[error("required column '{0}' is missing from the input file")]
    MissingColumn(String),
}

/// What one input column feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnBinding {
    Dense { attribute_index: usize, slot: usize },
    Block { block_index: usize, slot: usize },
    Skip,
}

pub struct DataTableDriver {
    dictionary: Arc<Dictionary>,
    input: InputBufferedFile,
    parser: FieldParser,
    bindings: Vec<ColumnBinding>,
    /// Key rank -> column position, for root dictionaries.
    key_columns: Vec<usize>,
    last_read_key: Vec<Symbol>,
    position: u64,
    range_end: u64,
    record_index: u64,
    sink: ErrorSink,
    interruption: Option<Arc<AtomicBool>>,
}

impl DataTableDriver {
    /// Open `path_or_uri` against `dictionary` and bind its columns.
    pub fn open(
        system: &dyn SystemFileDriver,
        dictionary: Arc<Dictionary>,
        path_or_uri: &str,
        format: &TableFormat,
    ) -> Result<DataTableDriver, OpenError> {
        if !dictionary.is_compiled() {
            return Err(SchemaError::NotCompiled(dictionary.name().to_string()).into());
        }
        let parser = FieldParser::new(format.separator)?;
        let mut input = InputBufferedFile::open(system, path_or_uri, format.input.clone())?;
        let mut position = input.start_position();
        let mut sink = ErrorSink::new();

        let bindings = if format.header_line {
            let fill = input.fill_one_line(position)?;
            if !fill.found {
                return Err(OpenError::MissingHeader);
            }
            let header = read_fields(&parser, input.buffer());
            position = fill.next_position;
            bind_header(&dictionary, &header, &mut sink)?
        } else {
            bind_natural_order(&dictionary)
        };

        let key_columns = key_column_positions(&dictionary, &bindings);
        let key_count = dictionary.key_names().len();
        let range_end = input.file_size();
        Ok(DataTableDriver {
            dictionary,
            input,
            parser,
            bindings,
            key_columns,
            last_read_key: vec![Symbol::empty(); key_count],
            position,
            range_end,
            record_index: 0,
            sink,
            interruption: None,
        })
    }

    /// Restrict the scan to lines starting in `[begin, end)` of the
    /// file, for parallel chunked reads. The first whole line at or
    /// after `begin` becomes the starting point.
    pub fn set_byte_range(&mut self, begin: u64, end: u64) -> Result<(), IoError> {
        let data_start = self.position.max(self.input.start_position());
        self.range_end = end.min(self.input.file_size());
        if begin <= data_start {
            self.position = data_start;
            return Ok(());
        }
        // Lines straddling `begin` belong to the previous chunk.
        self.position = match self.input.search_next_line_until(begin - 1, self.input.file_size())?
        {
            Some(next_line) => next_line,
            None => self.input.file_size(),
        };
        Ok(())
    }

    pub fn set_interruption_flag(&mut self, flag: Arc<AtomicBool>) {
        self.interruption = Some(flag);
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    /// Records (including dropped ones) seen so far; warning messages
    /// reference these indexes.
    pub fn record_index(&self) -> u64 {
        self.record_index
    }

    /// Key values of the last row whose key columns could be read, kept
    /// current even for rows that were dropped afterwards.
    pub fn last_read_key(&self) -> &[Symbol] {
        &self.last_read_key
    }

    /// Read the next accepted record. `Ok(None)` means end of range or a
    /// cancellation signalled by the external task layer.
    pub fn read(&mut self) -> Result<Option<Record>, IoError> {
        loop {
            if self.position >= self.range_end {
                return Ok(None);
            }
            if self.record_index % INTERRUPTION_CHECK_PERIOD == 0
                && let Some(flag) = &self.interruption
                && flag.load(Ordering::Relaxed)
            {
                return Ok(None);
            }

            let fill = self.input.fill_one_line(self.position)?;
            if fill.line_too_long {
                self.record_index += 1;
                self.sink.warn(
                    WarningCategory::LineTooLong,
                    self.record_index,
                    "line longer than the configured maximum, skipped",
                );
                self.position = fill.next_position;
                continue;
            }
            if !fill.found {
                return Ok(None);
            }
            self.record_index += 1;
            self.position = fill.next_position;

            let line = self.input.buffer().to_vec();
            if let Some(record) = self.parse_row(&line) {
                return Ok(Some(record));
            }
        }
    }

    /// One row to one record; `None` drops the row (warnings already
    /// emitted, key capture already done).
    fn parse_row(&mut self, line: &[u8]) -> Option<Record> {
        let fields = read_fields(&self.parser, line);

        // Empty line: only a row when a single column is expected.
        if fields.len() == 1 && fields[0].text.is_empty() && self.bindings.len() >= 2 {
            self.sink.warn(WarningCategory::Row, self.record_index, "empty line");
            return None;
        }

        // Root key capture happens before any reject decision.
        for (rank, column) in self.key_columns.iter().enumerate() {
            if let Some(field) = fields.get(*column) {
                self.last_read_key[rank] = Symbol::intern(&field.text);
            }
        }

        if fields.len() != self.bindings.len() {
            self.sink.warn(
                WarningCategory::Row,
                self.record_index,
                &format!("{} fields instead of {}", fields.len(), self.bindings.len()),
            );
            return None;
        }

        let mut record = Record::new(self.dictionary.clone(), self.record_index);
        let mut dropped = false;
        let bindings = self.bindings.clone();
        for (column, (binding, field)) in bindings.iter().zip(&fields).enumerate() {
            if let Some(error) = field.error {
                self.sink.warn(
                    WarningCategory::Field,
                    self.record_index,
                    &format!("column {}: {}", column + 1, error),
                );
                // A broken key field invalidates the whole row.
                if self.key_columns.contains(&column) {
                    dropped = true;
                }
            }
            match *binding {
                ColumnBinding::Skip => {}
                ColumnBinding::Dense { attribute_index, slot } => {
                    self.load_dense_field(attribute_index, slot, &field.text, &mut record);
                }
                ColumnBinding::Block { block_index, slot } => {
                    self.load_block_field(block_index, slot, &field.text, &mut record);
                }
            }
        }
        if dropped { None } else { Some(record) }
    }

    fn load_dense_field(
        &mut self,
        attribute_index: usize,
        slot: usize,
        text: &str,
        record: &mut Record,
    ) {
        let attribute = self.dictionary.attribute_at(attribute_index);
        let attribute_name = attribute.name().to_string();
        let value = match attribute.data_type() {
            tabrule_core::DataType::Continuous => {
                let (value, error) = Continuous::parse(text);
                if error.is_error() {
                    self.warn_conversion(&attribute_name, error.label());
                }
                Value::Continuous(value)
            }
            tabrule_core::DataType::Symbol => Value::Symbol(Symbol::intern(text)),
            tabrule_core::DataType::Text => Value::Text(Text::new(text)),
            tabrule_core::DataType::Date => {
                let value = Date::parse(text, attribute.format());
                if !value.check() && !text.trim().is_empty() {
                    self.warn_conversion(&attribute_name, "invalid date");
                }
                Value::Date(value)
            }
            tabrule_core::DataType::Time => {
                let value = Time::parse(text, attribute.format());
                if !value.check() && !text.trim().is_empty() {
                    self.warn_conversion(&attribute_name, "invalid time");
                }
                Value::Time(value)
            }
            tabrule_core::DataType::Timestamp => {
                let value = Timestamp::parse(text, attribute.format());
                if !value.check() && !text.trim().is_empty() {
                    self.warn_conversion(&attribute_name, "invalid timestamp");
                }
                Value::Timestamp(value)
            }
            tabrule_core::DataType::TimestampTz => {
                let value = TimestampTz::parse(text, attribute.format());
                if !value.check() && !text.trim().is_empty() {
                    self.warn_conversion(&attribute_name, "invalid timestamp with time zone");
                }
                Value::TimestampTz(value)
            }
            other => {
                debug_assert!(false, "type {} is never file-bound", other);
                return;
            }
        };
        record.set_value_at(slot, value);
    }

    fn load_block_field(
        &mut self,
        block_index: usize,
        slot: usize,
        text: &str,
        record: &mut Record,
    ) {
        let block = self.dictionary.block_at(block_index);
        match block.data_type() {
            tabrule_core::DataType::SymbolValueBlock => {
                let default = block.default_symbol();
                match SymbolValueBlock::build_from_field(block.key_block(), text, &default) {
                    Ok(value) => record.set_symbol_block_at(slot, value),
                    Err(error) => {
                        self.sink.warn(
                            WarningCategory::BlockParse,
                            self.record_index,
                            &format!("block '{}': {}", block.name(), error),
                        );
                        record.set_symbol_block_at(slot, ValueBlock::empty());
                    }
                }
            }
            _ => {
                let default = block.default_continuous();
                match ContinuousValueBlock::build_from_field(block.key_block(), text, &default) {
                    Ok(value) => record.set_continuous_block_at(slot, value),
                    Err(error) => {
                        self.sink.warn(
                            WarningCategory::BlockParse,
                            self.record_index,
                            &format!("block '{}': {}", block.name(), error),
                        );
                        record.set_continuous_block_at(slot, ValueBlock::empty());
                    }
                }
            }
        }
    }

    fn warn_conversion(&mut self, attribute: &str, cause: &str) {
        self.sink.warn(
            WarningCategory::ValueConversion,
            self.record_index,
            &format!("field '{}': {}", attribute, cause),
        );
    }
}

fn read_fields(parser: &FieldParser, line: &[u8]) -> Vec<ParsedField> {
    let mut fields = Vec::new();
    let mut position = 0;
    loop {
        let field = parser.next_field(line, &mut position);
        let end_of_line = field.end_of_line;
        fields.push(field);
        if end_of_line {
            break;
        }
    }
    fields
}

/// Bind header column names against the dictionary.
fn bind_header(
    dictionary: &Dictionary,
    header: &[ParsedField],
    sink: &mut ErrorSink,
) -> Result<Vec<ColumnBinding>, OpenError> {
    let mut bindings = Vec::with_capacity(header.len());
    for field in header {
        let name = field.text.as_str();
        let binding = match dictionary.lookup_data_item(name) {
            Some(DataItem::Attribute(index)) => {
                let attribute = dictionary.attribute_at(index);
                if attribute.is_derived() {
                    sink.warn(
                        WarningCategory::Row,
                        0,
                        &format!("column '{}' matches a derived field and is ignored", name),
                    );
                    ColumnBinding::Skip
                } else if !attribute.is_loaded() {
                    sink.warn(
                        WarningCategory::Row,
                        0,
                        &format!("column '{}' exists but is not loaded", name),
                    );
                    ColumnBinding::Skip
                } else {
                    ColumnBinding::Dense {
                        attribute_index: index,
                        slot: attribute.load_index().expect("loaded attribute has a slot"),
                    }
                }
            }
            Some(DataItem::Block(index)) => {
                let block = dictionary.block_at(index);
                if block.is_derived() || !block.is_loaded() {
                    sink.warn(
                        WarningCategory::Row,
                        0,
                        &format!("column '{}' exists but is not read from files", name),
                    );
                    ColumnBinding::Skip
                } else {
                    ColumnBinding::Block {
                        block_index: index,
                        slot: block.load_index().expect("loaded block has a slot"),
                    }
                }
            }
            None => {
                sink.warn(WarningCategory::Row, 0, &format!("unknown column '{}'", name));
                ColumnBinding::Skip
            }
        };
        bindings.push(binding);
    }

    // Every native field of the dictionary must have a column.
    for item in dictionary.native_field_order() {
        let (name, expected) = match item {
            DataItem::Attribute(index) => {
                let attribute = dictionary.attribute_at(index);
                if !attribute.is_loaded() {
                    continue;
                }
                (
                    attribute.name().to_string(),
                    ColumnBinding::Dense {
                        attribute_index: index,
                        slot: attribute.load_index().expect("loaded"),
                    },
                )
            }
            DataItem::Block(index) => {
                let block = dictionary.block_at(index);
                if !block.is_loaded() {
                    continue;
                }
                (
                    block.name().to_string(),
                    ColumnBinding::Block {
                        block_index: index,
                        slot: block.load_index().expect("loaded"),
                    },
                )
            }
        };
        if !bindings.contains(&expected) {
            return Err(OpenError::MissingColumn(name));
        }
    }
    Ok(bindings)
}

/// Without a header: native fields in declaration order.
fn bind_natural_order(dictionary: &Dictionary) -> Vec<ColumnBinding> {
    dictionary
        .native_field_order()
        .into_iter()
        .map(|item| match item {
            DataItem::Attribute(index) => {
                match dictionary.attribute_at(index).load_index() {
                    Some(slot) => ColumnBinding::Dense { attribute_index: index, slot },
                    None => ColumnBinding::Skip,
                }
            }
            DataItem::Block(index) => match dictionary.block_at(index).load_index() {
                Some(slot) => ColumnBinding::Block { block_index: index, slot },
                None => ColumnBinding::Skip,
            },
        })
        .collect()
}

fn key_column_positions(dictionary: &Dictionary, bindings: &[ColumnBinding]) -> Vec<usize> {
    if !dictionary.is_root() {
        return Vec::new();
    }
    dictionary
        .key_names()
        .iter()
        .filter_map(|name| {
            bindings.iter().position(|binding| match binding {
                ColumnBinding::Dense { attribute_index, .. } => {
                    dictionary.attribute_at(*attribute_index).name() == name.as_str()
                }
                _ => false,
            })
        })
        .collect()
}

/// Serialize the loaded stored fields of `record` as one output line.
pub fn write_record(
    output: &mut OutputBufferedFile<'_>,
    dictionary: &Dictionary,
    record: &Record,
) -> Result<(), IoError> {
    let mut first = true;
    for item in dictionary.declaration() {
        let text = match *item {
            DataItem::Attribute(index) => {
                let attribute = dictionary.attribute_at(index);
                let Some(slot) = attribute.load_index() else { continue };
                if !attribute.data_type().is_stored() {
                    continue;
                }
                match attribute.data_type() {
                    tabrule_core::DataType::Continuous => {
                        record.continuous_at(slot).to_field_string()
                    }
                    tabrule_core::DataType::Symbol => record.symbol_at(slot).as_str().to_string(),
                    tabrule_core::DataType::Text => record.text_at(slot).as_str().to_string(),
                    tabrule_core::DataType::Date => {
                        record.date_at(slot).format(attribute.format())
                    }
                    tabrule_core::DataType::Time => {
                        record.time_at(slot).format(attribute.format())
                    }
                    tabrule_core::DataType::Timestamp => {
                        record.timestamp_at(slot).format(attribute.format())
                    }
                    tabrule_core::DataType::TimestampTz => {
                        record.timestamp_tz_at(slot).format(attribute.format())
                    }
                    _ => continue,
                }
            }
            DataItem::Block(index) => {
                let block = dictionary.block_at(index);
                let Some(slot) = block.load_index() else { continue };
                match block.data_type() {
                    tabrule_core::DataType::SymbolValueBlock => record
                        .symbol_block_at(slot)
                        .write_field(block.key_block(), &block.default_symbol()),
                    _ => record
                        .continuous_block_at(slot)
                        .write_field(block.key_block(), &block.default_continuous()),
                }
            }
        };
        if !first {
            output.write_separator()?;
        }
        output.write_field(&text)?;
        first = false;
    }
    output.write_end_of_line()
}

/// Header line matching [`write_record`]'s column order.
pub fn write_header(
    output: &mut OutputBufferedFile<'_>,
    dictionary: &Dictionary,
) -> Result<(), IoError> {
    let mut first = true;
    for item in dictionary.declaration() {
        let name = match *item {
            DataItem::Attribute(index) => {
                let attribute = dictionary.attribute_at(index);
                if attribute.load_index().is_none() || !attribute.data_type().is_stored() {
                    continue;
                }
                attribute.name()
            }
            DataItem::Block(index) => {
                let block = dictionary.block_at(index);
                if block.load_index().is_none() {
                    continue;
                }
                block.name()
            }
        };
        if !first {
            output.write_separator()?;
        }
        output.write_field(name)?;
        first = false;
    }
    output.write_end_of_line()
}
