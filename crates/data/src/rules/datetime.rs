//! Date, time and timestamp rules
//!
//! Invalid temporal operands yield Missing (for numerical results) or the
//! invalid value of the result type; nothing here can fail loudly.

use super::rule_common;
use crate::record::Record;
use crate::rule::{DerivationRule, Operand, RuleCore, RuleDef, RuleRegistry};
use tabrule_core::{Continuous, DataType, Date, Time, Timestamp};

pub fn register(registry: &mut RuleRegistry) {
    for op in [
        TemporalOp::Year,
        TemporalOp::Month,
        TemporalOp::Day,
        TemporalOp::WeekDay,
        TemporalOp::YearDay,
        TemporalOp::DiffDate,
        TemporalOp::AddDays,
        TemporalOp::Hour,
        TemporalOp::Minute,
        TemporalOp::Second,
        TemporalOp::DecimalTime,
        TemporalOp::DiffTime,
        TemporalOp::GetDate,
        TemporalOp::GetTime,
        TemporalOp::DiffTimestamp,
        TemporalOp::AddSeconds,
        TemporalOp::UtcTimestamp,
    ] {
        registry.register(Box::new(TemporalRule::new(op)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemporalOp {
    Year,
    Month,
    Day,
    WeekDay,
    YearDay,
    DiffDate,
    AddDays,
    Hour,
    Minute,
    Second,
    DecimalTime,
    DiffTime,
    GetDate,
    GetTime,
    DiffTimestamp,
    AddSeconds,
    UtcTimestamp,
}

static YEAR_DEF: RuleDef = RuleDef {
    name: "Year",
    label: "Year of a date",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static MONTH_DEF: RuleDef = RuleDef {
    name: "Month",
    label: "Month of a date",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static DAY_DEF: RuleDef = RuleDef {
    name: "Day",
    label: "Day of a date",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static WEEK_DAY_DEF: RuleDef = RuleDef {
    name: "WeekDay",
    label: "Day of week of a date, 1 for Monday",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static YEAR_DAY_DEF: RuleDef = RuleDef {
    name: "YearDay",
    label: "Day of year of a date",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static DIFF_DATE_DEF: RuleDef = RuleDef {
    name: "DiffDate",
    label: "Difference of two dates in days",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static ADD_DAYS_DEF: RuleDef = RuleDef {
    name: "AddDays",
    label: "Date shifted by a number of days",
    result_type: DataType::Date,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static HOUR_DEF: RuleDef = RuleDef {
    name: "Hour",
    label: "Hour of a time",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static MINUTE_DEF: RuleDef = RuleDef {
    name: "Minute",
    label: "Minute of a time",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static SECOND_DEF: RuleDef = RuleDef {
    name: "Second",
    label: "Second of a time",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static DECIMAL_TIME_DEF: RuleDef = RuleDef {
    name: "DecimalTime",
    label: "Time as a decimal number of hours",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static DIFF_TIME_DEF: RuleDef = RuleDef {
    name: "DiffTime",
    label: "Difference of two times in seconds",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static GET_DATE_DEF: RuleDef = RuleDef {
    name: "GetDate",
    label: "Date part of a timestamp",
    result_type: DataType::Date,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static GET_TIME_DEF: RuleDef = RuleDef {
    name: "GetTime",
    label: "Time part of a timestamp",
    result_type: DataType::Time,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static DIFF_TIMESTAMP_DEF: RuleDef = RuleDef {
    name: "DiffTimestamp",
    label: "Difference of two timestamps in seconds",
    result_type: DataType::Continuous,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static ADD_SECONDS_DEF: RuleDef = RuleDef {
    name: "AddSeconds",
    label: "Timestamp shifted by a number of seconds",
    result_type: DataType::Timestamp,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};
static UTC_TIMESTAMP_DEF: RuleDef = RuleDef {
    name: "UtcTimestamp",
    label: "UTC timestamp of a timestamp with time zone",
    result_type: DataType::Timestamp,
    structure_name: None,
    variable_operands: false,
    multiple_scope: false,
};

#[derive(Clone)]
struct TemporalRule {
    def: &'static RuleDef,
    core: RuleCore,
    op: TemporalOp,
}

impl TemporalRule {
    fn new(op: TemporalOp) -> TemporalRule {
        let (def, operand_types): (&'static RuleDef, Vec<DataType>) = match op {
            TemporalOp::Year => (&YEAR_DEF, vec![DataType::Date]),
            TemporalOp::Month => (&MONTH_DEF, vec![DataType::Date]),
            TemporalOp::Day => (&DAY_DEF, vec![DataType::Date]),
            TemporalOp::WeekDay => (&WEEK_DAY_DEF, vec![DataType::Date]),
            TemporalOp::YearDay => (&YEAR_DAY_DEF, vec![DataType::Date]),
            TemporalOp::DiffDate => (&DIFF_DATE_DEF, vec![DataType::Date, DataType::Date]),
            TemporalOp::AddDays => (&ADD_DAYS_DEF, vec![DataType::Date, DataType::Continuous]),
            TemporalOp::Hour => (&HOUR_DEF, vec![DataType::Time]),
            TemporalOp::Minute => (&MINUTE_DEF, vec![DataType::Time]),
            TemporalOp::Second => (&SECOND_DEF, vec![DataType::Time]),
            TemporalOp::DecimalTime => (&DECIMAL_TIME_DEF, vec![DataType::Time]),
            TemporalOp::DiffTime => (&DIFF_TIME_DEF, vec![DataType::Time, DataType::Time]),
            TemporalOp::GetDate => (&GET_DATE_DEF, vec![DataType::Timestamp]),
            TemporalOp::GetTime => (&GET_TIME_DEF, vec![DataType::Timestamp]),
            TemporalOp::DiffTimestamp => {
                (&DIFF_TIMESTAMP_DEF, vec![DataType::Timestamp, DataType::Timestamp])
            }
            TemporalOp::AddSeconds => {
                (&ADD_SECONDS_DEF, vec![DataType::Timestamp, DataType::Continuous])
            }
            TemporalOp::UtcTimestamp => (&UTC_TIMESTAMP_DEF, vec![DataType::TimestampTz]),
        };
        let operands = operand_types.into_iter().map(Operand::new).collect();
        TemporalRule { def, core: RuleCore::with_operands(operands), op }
    }

    fn continuous_of(part: Option<impl Into<f64>>) -> Continuous {
        match part {
            Some(value) => Continuous::new(value.into()),
            None => Continuous::MISSING,
        }
    }
}

impl DerivationRule for TemporalRule {
    rule_common!();

    fn compute_continuous(&mut self, record: &Record) -> Continuous {
        match self.op {
            TemporalOp::Year => {
                Self::continuous_of(self.core.operands[0].date_value(record).year())
            }
            TemporalOp::Month => {
                Self::continuous_of(self.core.operands[0].date_value(record).month())
            }
            TemporalOp::Day => Self::continuous_of(self.core.operands[0].date_value(record).day()),
            TemporalOp::WeekDay => {
                Self::continuous_of(self.core.operands[0].date_value(record).weekday())
            }
            TemporalOp::YearDay => {
                Self::continuous_of(self.core.operands[0].date_value(record).year_day())
            }
            TemporalOp::DiffDate => {
                let left = self.core.operands[0].date_value(record);
                let right = self.core.operands[1].date_value(record);
                Self::continuous_of(left.diff_days(&right).map(|d| d as f64))
            }
            TemporalOp::Hour => Self::continuous_of(self.core.operands[0].time_value(record).hour()),
            TemporalOp::Minute => {
                Self::continuous_of(self.core.operands[0].time_value(record).minute())
            }
            TemporalOp::Second => {
                Self::continuous_of(self.core.operands[0].time_value(record).second())
            }
            TemporalOp::DecimalTime => {
                Self::continuous_of(self.core.operands[0].time_value(record).decimal_time())
            }
            TemporalOp::DiffTime => {
                let left = self.core.operands[0].time_value(record);
                let right = self.core.operands[1].time_value(record);
                Self::continuous_of(left.diff_seconds(&right).map(|s| s as f64))
            }
            TemporalOp::DiffTimestamp => {
                let left = self.core.operands[0].timestamp_value(record);
                let right = self.core.operands[1].timestamp_value(record);
                Self::continuous_of(left.diff_seconds(&right).map(|s| s as f64))
            }
            _ => {
                debug_assert!(false, "rule '{}' is not numerical", self.name());
                Continuous::MISSING
            }
        }
    }

    fn compute_date(&mut self, record: &Record) -> Date {
        match self.op {
            TemporalOp::AddDays => {
                let date = self.core.operands[0].date_value(record);
                match self.core.operands[1].continuous_value(record).as_int() {
                    Some(days) => date.add_days(days),
                    None => Date::default(),
                }
            }
            TemporalOp::GetDate => self.core.operands[0].timestamp_value(record).date(),
            _ => {
                debug_assert!(false, "rule '{}' does not produce a date", self.name());
                Date::default()
            }
        }
    }

    fn compute_time(&mut self, record: &Record) -> Time {
        debug_assert!(self.op == TemporalOp::GetTime);
        self.core.operands[0].timestamp_value(record).time()
    }

    fn compute_timestamp(&mut self, record: &Record) -> Timestamp {
        match self.op {
            TemporalOp::AddSeconds => {
                let timestamp = self.core.operands[0].timestamp_value(record);
                match self.core.operands[1].continuous_value(record).as_int() {
                    Some(seconds) => timestamp.add_seconds(seconds),
                    None => Timestamp::default(),
                }
            }
            TemporalOp::UtcTimestamp => {
                self.core.operands[0].timestamp_tz_value(record).utc_timestamp()
            }
            _ => {
                debug_assert!(false, "rule '{}' does not produce a timestamp", self.name());
                Timestamp::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Attribute, Dictionary};
    use crate::rule::Origin;
    use crate::value::Value;
    use std::sync::Arc;

    fn dict() -> Arc<Dictionary> {
        let mut dict = Dictionary::new("T");
        dict.add_attribute(Attribute::new("d", DataType::Date));
        dict.add_attribute(Attribute::new("d2", DataType::Date));
        dict.add_attribute(Attribute::new("t", DataType::Time));
        dict.add_attribute(Attribute::new("ts", DataType::Timestamp));
        dict.compile().unwrap();
        Arc::new(dict)
    }

    fn record(dict: &Arc<Dictionary>) -> Record {
        let mut record = Record::new(dict.clone(), 0);
        record.set_value_at(0, Value::Date(Date::from_ymd(2024, 3, 15)));
        record.set_value_at(1, Value::Date(Date::from_ymd(2024, 3, 1)));
        record.set_value_at(2, Value::Time(Time::from_hms(12, 30, 0)));
        record.set_value_at(
            3,
            Value::Timestamp(Timestamp::from_date_time(
                Date::from_ymd(2024, 3, 15),
                Time::from_hms(6, 0, 0),
            )),
        );
        record
    }

    fn rule_on(op: TemporalOp, attr: &str, dict: &Arc<Dictionary>) -> TemporalRule {
        let mut rule = TemporalRule::new(op);
        rule.operands_mut()[0].set_origin(Origin::Attribute(attr.to_string()));
        rule.compile(dict);
        rule
    }

    #[test]
    fn test_date_parts() {
        let dict = dict();
        let rec = record(&dict);
        assert_eq!(
            rule_on(TemporalOp::Year, "d", &dict).compute_continuous(&rec),
            Continuous::new(2024.0)
        );
        assert_eq!(
            rule_on(TemporalOp::Month, "d", &dict).compute_continuous(&rec),
            Continuous::new(3.0)
        );
        assert_eq!(
            rule_on(TemporalOp::Day, "d", &dict).compute_continuous(&rec),
            Continuous::new(15.0)
        );
    }

    #[test]
    fn test_diff_date() {
        let dict = dict();
        let rec = record(&dict);
        let mut diff = TemporalRule::new(TemporalOp::DiffDate);
        diff.operands_mut()[0].set_origin(Origin::Attribute("d".to_string()));
        diff.operands_mut()[1].set_origin(Origin::Attribute("d2".to_string()));
        diff.compile(&dict);
        assert_eq!(diff.compute_continuous(&rec), Continuous::new(14.0));
    }

    #[test]
    fn test_invalid_date_is_missing() {
        let dict = dict();
        let mut rec = record(&dict);
        rec.set_value_at(0, Value::Date(Date::default()));
        assert!(rule_on(TemporalOp::Year, "d", &dict).compute_continuous(&rec).is_missing());
    }

    #[test]
    fn test_time_and_timestamp_parts() {
        let dict = dict();
        let rec = record(&dict);
        assert_eq!(
            rule_on(TemporalOp::DecimalTime, "t", &dict).compute_continuous(&rec),
            Continuous::new(12.5)
        );
        assert_eq!(
            rule_on(TemporalOp::GetDate, "ts", &dict).compute_date(&rec),
            Date::from_ymd(2024, 3, 15)
        );
        assert_eq!(
            rule_on(TemporalOp::GetTime, "ts", &dict).compute_time(&rec),
            Time::from_hms(6, 0, 0)
        );
    }
}
