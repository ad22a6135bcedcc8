//! Copy, conversion and formatting rules

use super::rule_common;
use crate::dictionary::Dictionary;
use crate::record::Record;
use crate::rule::{
    BlockLayoutMap, Constant, DerivationRule, Operand, Origin, RuleCore, RuleDef, RuleRegistry,
};
use crate::dictionary::SchemaError;
use std::fs;
use tabrule_core::{
    Continuous, ContinuousValueBlock, DataType, Date, IndexedKeyBlock, Symbol, SymbolValueBlock,
    Text, Time, Timestamp, TimestampTz, check_format,
};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Box::new(CopyRule::new(&COPY_DEF)));
    registry.register(Box::new(CopyRule::new(&COPY_C_DEF)));
    registry.register(Box::new(CopyRule::new(&COPY_D_DEF)));
    registry.register(Box::new(CopyRule::new(&COPY_T_DEF)));
    registry.register(Box::new(CopyRule::new(&COPY_TS_DEF)));
    registry.register(Box::new(CopyRule::new(&COPY_TSTZ_DEF)));
    registry.register(Box::new(CopyRule::new(&TEXT_COPY_DEF)));
    registry.register(Box::new(CopyBlockRule::new(&COPY_BLOCK_DEF)));
    registry.register(Box::new(CopyBlockRule::new(&COPY_BLOCK_C_DEF)));
    registry.register(Box::new(AsNumericalRule::new(false)));
    registry.register(Box::new(AsNumericalRule::new(true)));
    registry.register(Box::new(AsCategoricalRule::new()));
    registry.register(Box::new(RecodeMissingRule::new()));
    registry.register(Box::new(FromTextRule::new()));
    registry.register(Box::new(ToTextRule::new()));
    registry.register(Box::new(TemporalParseRule::new(&AS_DATE_DEF)));
    registry.register(Box::new(TemporalParseRule::new(&AS_TIME_DEF)));
    registry.register(Box::new(TemporalParseRule::new(&AS_TIMESTAMP_DEF)));
    registry.register(Box::new(TemporalParseRule::new(&AS_TIMESTAMP_TZ_DEF)));
    registry.register(Box::new(TemporalFormatRule::new(&FORMAT_DATE_DEF)));
    registry.register(Box::new(TemporalFormatRule::new(&FORMAT_TIME_DEF)));
    registry.register(Box::new(TemporalFormatRule::new(&FORMAT_TIMESTAMP_DEF)));
    registry.register(Box::new(TemporalFormatRule::new(&FORMAT_TIMESTAMP_TZ_DEF)));
    registry.register(Box::new(TextLoadFileRule::new()));
}

// ---------------------------------------------------------------------------
// Copy rules: one per stored scalar type, returning the operand verbatim.

static COPY_DEF: RuleDef = RuleDef {
    name: "Copy",
    label: "Copy of a numerical value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static COPY_C_DEF: RuleDef = RuleDef {
    name: "CopyC",
    label: "Copy of a categorical value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static COPY_D_DEF: RuleDef = RuleDef {
    name: "CopyD",
    label: "Copy of a date value",
    result_type: DataType::Date,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static COPY_T_DEF: RuleDef = RuleDef {
    name: "CopyT",
    label: "Copy of a time value",
    result_type: DataType::Time,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static COPY_TS_DEF: RuleDef = RuleDef {
    name: "CopyTS",
    label: "Copy of a timestamp value",
    result_type: DataType::Timestamp,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static COPY_TSTZ_DEF: RuleDef = RuleDef {
    name: "CopyTSTZ",
    label: "Copy of a timestamp with time zone",
    result_type: DataType::TimestampTz,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static TEXT_COPY_DEF: RuleDef = RuleDef {
    name: "TextCopy",
    label: "Copy of a text value",
    result_type: DataType::Text,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct CopyRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl CopyRule {
    fn new(def: &'static RuleDef) -> CopyRule {
        CopyRule { def, core: RuleCore::with_operands(vec![Operand::new(def.result_type)]) }
    }
}

impl DerivationRule for CopyRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        self.core.operands[0].continuous_value(record)
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        self.core.operands[0].symbol_value(record)
    }

    fn compute_date(&mut self, record: &Record) -> Date {
        self.core.operands[0].date_value(record)
    }

    fn compute_time(&mut self, record: &Record) -> Time {
        self.core.operands[0].time_value(record)
    }

    fn compute_timestamp(&mut self, record: &Record) -> Timestamp {
        self.core.operands[0].timestamp_value(record)
    }

    fn compute_timestamp_tz(&mut self, record: &Record) -> TimestampTz {
        self.core.operands[0].timestamp_tz_value(record)
    }

    fn compute_text(&mut self, record: &Record) -> Text {
        self.core.operands[0].text_value(record)
    }
}

// ---------------------------------------------------------------------------
// Block copies: re-index the source block into the consumer's key space.

static COPY_BLOCK_DEF: RuleDef = RuleDef {
    name: "CopyBlock",
    label: "Copy of a numerical sparse block",
    result_type: DataType::ContinuousValueBlock,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static COPY_BLOCK_C_DEF: RuleDef = RuleDef {
    name: "CopyBlockC",
    label: "Copy of a categorical sparse block",
    result_type: DataType::SymbolValueBlock,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct CopyBlockRule {
    def: &'static RuleDef,
    core: RuleCore,
    layout: BlockLayoutMap,
}

impl CopyBlockRule {
    fn new(def: &'static RuleDef) -> CopyBlockRule {
        CopyBlockRule {
            def,
            core: RuleCore::with_operands(vec![Operand::new(def.result_type)]),
            layout: BlockLayoutMap::default(),
        }
    }
}

impl DerivationRule for CopyBlockRule {
    rule_common!();

    fn compute_continuous_block(
        &mut self,
        record: &Record,
        target_keys: &IndexedKeyBlock,
    ) -> ContinuousValueBlock {
        let Some(source_keys) = self.core.operands[0].source_key_block(record) else {
            return self.core.operands[0].continuous_block_value(record, target_keys).into_owned();
        };
        self.layout.ensure(source_keys, target_keys);
        let source = self.core.operands[0].continuous_block_value(record, target_keys);
        if self.layout.same_value_indexes {
            source.into_owned()
        } else {
            source.extract_subset(&self.layout.new_value_indexes)
        }
    }

    fn compute_symbol_block(
        &mut self,
        record: &Record,
        target_keys: &IndexedKeyBlock,
    ) -> SymbolValueBlock {
        let Some(source_keys) = self.core.operands[0].source_key_block(record) else {
            return self.core.operands[0].symbol_block_value(record, target_keys).into_owned();
        };
        self.layout.ensure(source_keys, target_keys);
        let source = self.core.operands[0].symbol_block_value(record, target_keys);
        if self.layout.same_value_indexes {
            source.into_owned()
        } else {
            source.extract_subset(&self.layout.new_value_indexes)
        }
    }
}

// ---------------------------------------------------------------------------
// Numerical/categorical conversions.

static AS_NUMERICAL_DEF: RuleDef = RuleDef {
    name: "AsNumerical",
    label: "Numerical conversion of a categorical value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static AS_NUMERICAL_ERROR_DEF: RuleDef = RuleDef {
    name: "AsNumericalError",
    label: "Conversion error label of a numerical conversion",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

/// `AsNumerical` parses; `AsNumericalError` reports the parse error label
/// for the same operand (empty when the conversion is clean).
#[derive(Clone)]
struct AsNumericalRule {
    def: &'static RuleDef,
    core: RuleCore,
    report_error: bool,
}

impl AsNumericalRule {
    fn new(report_error: bool) -> AsNumericalRule {
        let def = if report_error { &AS_NUMERICAL_ERROR_DEF } else { &AS_NUMERICAL_DEF };
        AsNumericalRule {
            def,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Symbol)]),
            report_error,
        }
    }
}

impl DerivationRule for AsNumericalRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let symbol = self.core.operands[0].symbol_value(record);
        Continuous::parse(symbol.as_str()).0
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        debug_assert!(self.report_error);
        let symbol = self.core.operands[0].symbol_value(record);
        Symbol::intern(Continuous::parse(symbol.as_str()).1.label())
    }
}

static AS_CATEGORICAL_DEF: RuleDef = RuleDef {
    name: "AsCategorical",
    label: "Categorical conversion of a numerical value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct AsCategoricalRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl AsCategoricalRule {
    fn new() -> AsCategoricalRule {
        AsCategoricalRule {
            def: &AS_CATEGORICAL_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Continuous)]),
        }
    }
}

impl DerivationRule for AsCategoricalRule {
    rule_common!();

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let value = self.core.operands[0].continuous_value(record);
        Symbol::intern(&value.to_field_string())
    }
}

static RECODE_MISSING_DEF: RuleDef = RuleDef {
    name: "RecodeMissing",
    label: "Replacement of a missing value",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct RecodeMissingRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl RecodeMissingRule {
    fn new() -> RecodeMissingRule {
        RecodeMissingRule {
            def: &RECODE_MISSING_DEF,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Continuous),
                Operand::new(DataType::Continuous),
            ]),
        }
    }
}

impl DerivationRule for RecodeMissingRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        let value = self.core.operands[0].continuous_value(record);
        if value.is_missing() { self.core.operands[1].continuous_value(record) } else { value }
    }
}

static FROM_TEXT_DEF: RuleDef = RuleDef {
    name: "FromText",
    label: "Categorical value from a text value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct FromTextRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl FromTextRule {
    fn new() -> FromTextRule {
        FromTextRule {
            def: &FROM_TEXT_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Text)]),
        }
    }
}

impl DerivationRule for FromTextRule {
    rule_common!();

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        Symbol::intern(self.core.operands[0].text_value(record).as_str())
    }
}

static TO_TEXT_DEF: RuleDef = RuleDef {
    name: "ToText",
    label: "Text value from a categorical value",
    result_type: DataType::Text,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct ToTextRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl ToTextRule {
    fn new() -> ToTextRule {
        ToTextRule {
            def: &TO_TEXT_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Symbol)]),
        }
    }
}

impl DerivationRule for ToTextRule {
    rule_common!();

    fn compute_text(&mut self, record: &Record) -> Text {
        Text::new(self.core.operands[0].symbol_value(record).as_str())
    }
}

// ---------------------------------------------------------------------------
// Temporal parse/format: the format is a constant second operand, checked
// once at schema compile so evaluation cannot fail loudly.

static AS_DATE_DEF: RuleDef = RuleDef {
    name: "AsDate",
    label: "Date from a categorical value and a format",
    result_type: DataType::Date,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static AS_TIME_DEF: RuleDef = RuleDef {
    name: "AsTime",
    label: "Time from a categorical value and a format",
    result_type: DataType::Time,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static AS_TIMESTAMP_DEF: RuleDef = RuleDef {
    name: "AsTimestamp",
    label: "Timestamp from a categorical value and a format",
    result_type: DataType::Timestamp,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static AS_TIMESTAMP_TZ_DEF: RuleDef = RuleDef {
    name: "AsTimestampTZ",
    label: "Timestamp with time zone from a categorical value and a format",
    result_type: DataType::TimestampTz,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct TemporalParseRule {
    def: &'static RuleDef,
    core: RuleCore,
    format: String,
}

impl TemporalParseRule {
    fn new(def: &'static RuleDef) -> TemporalParseRule {
        TemporalParseRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(DataType::Symbol),
                Operand::new(DataType::Symbol),
            ]),
            format: String::new(),
        }
    }

    fn constant_format(&self) -> Option<Symbol> {
        match self.core.operands[1].origin() {
            Origin::Constant(Constant::Symbol(format)) => Some(format.clone()),
            _ => None,
        }
    }
}

impl DerivationRule for TemporalParseRule {
    rule_common!();

    fn check_operands_completeness(&self, _dictionary: &Dictionary) -> Result<(), SchemaError> {
        let format = self.constant_format().ok_or_else(|| SchemaError::BadRule {
            rule: self.name().to_string(),
            cause: "the format operand must be a constant".to_string(),
        })?;
        if !check_format(format.as_str()) {
            return Err(SchemaError::BadRule {
                rule: self.name().to_string(),
                cause: format!("invalid format '{}'", format),
            });
        }
        Ok(())
    }

    fn compile_rule(&mut self, _dictionary: &Dictionary) {
        self.format = self.constant_format().map(|s| s.as_str().to_string()).unwrap_or_default();
    }

    fn compute_date(&mut self, record: &Record) -> Date {
        let value = self.core.operands[0].symbol_value(record);
        Date::parse(value.as_str(), &self.format)
    }

    fn compute_time(&mut self, record: &Record) -> Time {
        let value = self.core.operands[0].symbol_value(record);
        Time::parse(value.as_str(), &self.format)
    }

    fn compute_timestamp(&mut self, record: &Record) -> Timestamp {
        let value = self.core.operands[0].symbol_value(record);
        Timestamp::parse(value.as_str(), &self.format)
    }

    fn compute_timestamp_tz(&mut self, record: &Record) -> TimestampTz {
        let value = self.core.operands[0].symbol_value(record);
        TimestampTz::parse(value.as_str(), &self.format)
    }
}

static FORMAT_DATE_DEF: RuleDef = RuleDef {
    name: "FormatDate",
    label: "Formatting of a date value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static FORMAT_TIME_DEF: RuleDef = RuleDef {
    name: "FormatTime",
    label: "Formatting of a time value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static FORMAT_TIMESTAMP_DEF: RuleDef = RuleDef {
    name: "FormatTimestamp",
    label: "Formatting of a timestamp value",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static FORMAT_TIMESTAMP_TZ_DEF: RuleDef = RuleDef {
    name: "FormatTimestampTZ",
    label: "Formatting of a timestamp with time zone",
    result_type: DataType::Symbol,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct TemporalFormatRule {
    def: &'static RuleDef,
    core: RuleCore,
    format: String,
}

impl TemporalFormatRule {
    fn new(def: &'static RuleDef) -> TemporalFormatRule {
        let value_type = match def.name {
            "FormatDate" => DataType::Date,
            "FormatTime" => DataType::Time,
            "FormatTimestamp" => DataType::Timestamp,
            _ => DataType::TimestampTz,
        };
        TemporalFormatRule {
            def,
            core: RuleCore::with_operands(vec![
                Operand::new(value_type),
                Operand::new(DataType::Symbol),
            ]),
            format: String::new(),
        }
    }

    fn constant_format(&self) -> Option<Symbol> {
        match self.core.operands[1].origin() {
            Origin::Constant(Constant::Symbol(format)) => Some(format.clone()),
            _ => None,
        }
    }
}

impl DerivationRule for TemporalFormatRule {
    rule_common!();

    fn check_operands_completeness(&self, _dictionary: &Dictionary) -> Result<(), SchemaError> {
        let format = self.constant_format().ok_or_else(|| SchemaError::BadRule {
            rule: self.name().to_string(),
            cause: "the format operand must be a constant".to_string(),
        })?;
        if !check_format(format.as_str()) {
            return Err(SchemaError::BadRule {
                rule: self.name().to_string(),
                cause: format!("invalid format '{}'", format),
            });
        }
        Ok(())
    }

    fn compile_rule(&mut self, _dictionary: &Dictionary) {
        self.format = self.constant_format().map(|s| s.as_str().to_string()).unwrap_or_default();
    }

    fn compute_symbol(&mut self, record: &Record) -> Symbol {
        let formatted = match self.core.operands[0].data_type() {
            DataType::Date => self.core.operands[0].date_value(record).format(&self.format),
            DataType::Time => self.core.operands[0].time_value(record).format(&self.format),
            DataType::Timestamp => {
                self.core.operands[0].timestamp_value(record).format(&self.format)
            }
            _ => self.core.operands[0].timestamp_tz_value(record).format(&self.format),
        };
        Symbol::intern(&formatted)
    }
}

// ---------------------------------------------------------------------------
// Text file loading.

static TEXT_LOAD_FILE_DEF: RuleDef = RuleDef {
    name: "TextLoadFile",
    label: "Text content of a named file",
    result_type: DataType::Text,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

/// Reads a file into a text value. Control characters that would break the
/// tabular encoding (`\0`, `\r`, `\n`) become spaces and the result is
/// trimmed, so the value stays round-trippable when written to a field.
/// Read failures are warnings, never errors.
#[derive(Clone)]
struct TextLoadFileRule {
    def: &'static RuleDef,
    core: RuleCore,
}

impl TextLoadFileRule {
    fn new() -> TextLoadFileRule {
        TextLoadFileRule {
            def: &TEXT_LOAD_FILE_DEF,
            core: RuleCore::with_operands(vec![Operand::new(DataType::Symbol)]),
        }
    }
}

impl DerivationRule for TextLoadFileRule {
    rule_common!();

    fn compute_text(&mut self, record: &Record) -> Text {
        let path = self.core.operands[0].symbol_value(record);
        if path.is_empty() {
            return Text::default();
        }
        let bytes = match fs::read(path.as_str()) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(path = path.as_str(), %error, "TextLoadFile: cannot read file");
                return Text::default();
            }
        };
        let truncated = &bytes[..bytes.len().min(Text::MAX_LENGTH)];
        let mut content = String::from_utf8_lossy(truncated).into_owned();
        content = content.replace(['\0', '\r', '\n'], " ");
        Text::new(content.trim())
    }
}
