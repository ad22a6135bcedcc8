//! Continuous values with a distinguished Missing sentinel
//!
//! A `Continuous` is a 64-bit float where exactly one bit pattern means
//! "no value". Arithmetic never unwinds: operations that cannot produce a
//! finite result return [`Continuous::MISSING`] and callers read the
//! sentinel. Parsing is locale-tolerant (decimal point or comma) and
//! reports how much of the input survived the conversion.

use std::fmt;

/// Bit pattern reserved for the Missing sentinel.
///
/// A quiet NaN with a fixed payload, so every ordinary f64 (including the
/// infinities produced by overflow, which constructors map to Missing)
/// stays representable.
const MISSING_BITS: u64 = 0x7FF8_0000_0000_00A1;

/// A continuous (numerical) value.
///
/// `PartialEq` treats two Missing values as equal and otherwise compares
/// the underlying floats, so the sentinel behaves like a regular value in
/// tests and in block storage.
#[derive(Clone, Copy)]
pub struct Continuous(f64);

impl Continuous {
    /// The "no value" sentinel.
    pub const MISSING: Continuous = Continuous(f64::from_bits(MISSING_BITS));

    /// Zero, the default value of most blocks.
    pub const ZERO: Continuous = Continuous(0.0);

    /// Build from a float, mapping every non-finite input to Missing.
    pub fn new(value: f64) -> Continuous {
        if value.is_finite() {
            Continuous(value)
        } else {
            Continuous::MISSING
        }
    }

    /// The raw float. Callers must check [`is_missing`](Self::is_missing)
    /// first; the sentinel reads back as a NaN.
    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_missing(self) -> bool {
        self.0.to_bits() == MISSING_BITS
    }

    /// Total order used by sort keys: Missing first, then numeric order.
    pub fn compare(self, other: Continuous) -> std::cmp::Ordering {
        match (self.is_missing(), other.is_missing()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => self.0.total_cmp(&other.0),
        }
    }

    /// Round-trip-stable text form. Missing formats as the empty string.
    pub fn to_field_string(self) -> String {
        if self.is_missing() {
            String::new()
        } else {
            format!("{}", self.0)
        }
    }

    /// Integer view, or `None` when the value is missing or not integral.
    pub fn as_int(self) -> Option<i64> {
        if self.is_missing() {
            return None;
        }
        let rounded = self.0.round();
        if (self.0 - rounded).abs() < 1e-9 && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64
        {
            Some(rounded as i64)
        } else {
            None
        }
    }

    /// Parse a textual numeric field.
    ///
    /// Surrounding ASCII whitespace is trimmed; a single decimal comma is
    /// accepted in place of a point. The returned error classifies the
    /// loss; `Ok` and `Empty` carry no warning label.
    pub fn parse(text: &str) -> (Continuous, ConversionError) {
        let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace());
        if trimmed.is_empty() {
            return (Continuous::MISSING, ConversionError::Empty);
        }

        // Locale tolerance: one comma standing in for the decimal point.
        let normalized;
        let candidate = if trimmed.contains(',')
            && !trimmed.contains('.')
            && trimmed.matches(',').count() == 1
        {
            normalized = trimmed.replace(',', ".");
            normalized.as_str()
        } else {
            trimmed
        };

        match candidate.parse::<f64>() {
            Ok(value) => Continuous::classify(value, candidate, ConversionError::Ok),
            Err(_) => {
                // Retry on the longest numeric prefix to detect trailing garbage.
                let prefix_len = numeric_prefix_len(candidate);
                if prefix_len == 0 {
                    return (Continuous::MISSING, ConversionError::NotNumeric);
                }
                match candidate[..prefix_len].parse::<f64>() {
                    Ok(value) => {
                        Continuous::classify(value, candidate, ConversionError::TrailingGarbage)
                    }
                    Err(_) => (Continuous::MISSING, ConversionError::NotNumeric),
                }
            }
        }
    }

    // Fold a parsed float into the sentinel space. Overflow and underflow
    // outrank the clean/trailing-garbage classification.
    fn classify(value: f64, literal: &str, clean: ConversionError) -> (Continuous, ConversionError) {
        if value.is_infinite() {
            (Continuous::MISSING, ConversionError::Overflow)
        } else if value == 0.0 && literal_has_nonzero_digit(literal) {
            (Continuous::ZERO, ConversionError::Underflow)
        } else {
            (Continuous(value), clean)
        }
    }
}

/// Longest prefix of `text` that still looks like a float literal.
fn numeric_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut best = 0;
    let mut end = 0;
    // Grow the candidate byte by byte and remember the last parseable length.
    while end < bytes.len() {
        end += 1;
        if text.is_char_boundary(end) && text[..end].parse::<f64>().is_ok() {
            best = end;
        }
    }
    best
}

fn literal_has_nonzero_digit(literal: &str) -> bool {
    // Only digits of the significand count; "0e-5" truly is zero.
    literal
        .chars()
        .take_while(|c| *c != 'e' && *c != 'E')
        .any(|c| ('1'..='9').contains(&c))
}

/// Outcome classification for [`Continuous::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionError {
    /// Exact or precision-bounded conversion.
    Ok,
    /// Empty field; the value is Missing but no warning is due.
    Empty,
    /// Nothing numeric at the start of the field.
    NotNumeric,
    /// Magnitude beyond f64 range.
    Overflow,
    /// Nonzero literal truncated to zero.
    Underflow,
    /// A numeric prefix was used; the rest of the field was dropped.
    TrailingGarbage,
}

impl ConversionError {
    pub fn is_error(self) -> bool {
        !matches!(self, ConversionError::Ok | ConversionError::Empty)
    }

    /// Human-readable cause, empty when the conversion is clean.
    pub fn label(self) -> &'static str {
        match self {
            ConversionError::Ok | ConversionError::Empty => "",
            ConversionError::NotNumeric => "value is not numeric",
            ConversionError::Overflow => "value too large",
            ConversionError::Underflow => "value too small, truncated to zero",
            ConversionError::TrailingGarbage => "numeric value followed by extra characters",
        }
    }
}

impl PartialEq for Continuous {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_missing(), other.is_missing()) {
            (true, true) => true,
            (false, false) => self.0 == other.0,
            _ => false,
        }
    }
}

impl Default for Continuous {
    fn default() -> Self {
        Continuous::MISSING
    }
}

impl From<f64> for Continuous {
    fn from(value: f64) -> Self {
        Continuous::new(value)
    }
}

impl fmt::Debug for Continuous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_missing() {
            write!(f, "Continuous(Missing)")
        } else {
            write!(f, "Continuous({})", self.0)
        }
    }
}

impl fmt::Display for Continuous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_field_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_is_distinguished() {
        assert!(Continuous::MISSING.is_missing());
        assert!(!Continuous::new(0.0).is_missing());
        assert!(!Continuous::new(f64::MAX).is_missing());
        // NaN from arithmetic folds into the sentinel.
        assert!(Continuous::new(f64::NAN).is_missing());
        assert!(Continuous::new(f64::INFINITY).is_missing());
    }

    #[test]
    fn test_missing_equality() {
        assert_eq!(Continuous::MISSING, Continuous::MISSING);
        assert_ne!(Continuous::MISSING, Continuous::new(0.0));
        assert_eq!(Continuous::new(1.5), Continuous::new(1.5));
    }

    #[test]
    fn test_parse_plain() {
        let (v, err) = Continuous::parse("1.5");
        assert_eq!(v, Continuous::new(1.5));
        assert_eq!(err, ConversionError::Ok);

        let (v, err) = Continuous::parse("  -2 ");
        assert_eq!(v, Continuous::new(-2.0));
        assert_eq!(err, ConversionError::Ok);
    }

    #[test]
    fn test_parse_decimal_comma() {
        let (v, err) = Continuous::parse("3,25");
        assert_eq!(v, Continuous::new(3.25));
        assert_eq!(err, ConversionError::Ok);

        // Two commas cannot be a decimal separator.
        let (_, err) = Continuous::parse("1,234,5");
        assert!(err.is_error());
    }

    #[test]
    fn test_parse_empty() {
        let (v, err) = Continuous::parse("   ");
        assert!(v.is_missing());
        assert_eq!(err, ConversionError::Empty);
        assert!(!err.is_error());
    }

    #[test]
    fn test_parse_garbage() {
        let (v, err) = Continuous::parse("abc");
        assert!(v.is_missing());
        assert_eq!(err, ConversionError::NotNumeric);

        let (v, err) = Continuous::parse("12.5kg");
        assert_eq!(v, Continuous::new(12.5));
        assert_eq!(err, ConversionError::TrailingGarbage);
    }

    #[test]
    fn test_parse_overflow_underflow() {
        let (v, err) = Continuous::parse("1e999");
        assert!(v.is_missing());
        assert_eq!(err, ConversionError::Overflow);

        let (v, err) = Continuous::parse("1e-999");
        assert_eq!(v, Continuous::ZERO);
        assert_eq!(err, ConversionError::Underflow);

        // A true zero with an exponent is clean.
        let (v, err) = Continuous::parse("0e-5");
        assert_eq!(v, Continuous::ZERO);
        assert_eq!(err, ConversionError::Ok);
    }

    #[test]
    fn test_field_string_round_trip() {
        for raw in [0.0, 1.5, -2.0, 1234.0, 0.1, f64::MAX, f64::MIN_POSITIVE] {
            let v = Continuous::new(raw);
            let text = v.to_field_string();
            let (back, err) = Continuous::parse(&text);
            assert_eq!(err, ConversionError::Ok, "round trip of {}", raw);
            assert_eq!(back, v, "round trip of {}", raw);
        }
        assert_eq!(Continuous::MISSING.to_field_string(), "");
    }

    #[test]
    fn test_compare_orders_missing_first() {
        use std::cmp::Ordering;
        assert_eq!(Continuous::MISSING.compare(Continuous::new(-1e300)), Ordering::Less);
        assert_eq!(Continuous::new(1.0).compare(Continuous::new(2.0)), Ordering::Less);
        assert_eq!(Continuous::MISSING.compare(Continuous::MISSING), Ordering::Equal);
    }

    #[test]
    fn test_as_int() {
        assert_eq!(Continuous::new(3.0).as_int(), Some(3));
        assert_eq!(Continuous::new(3.4).as_int(), None);
        assert_eq!(Continuous::MISSING.as_int(), None);
    }
}
