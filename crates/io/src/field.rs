//! Field tokenizer and quoting discipline
//!
//! Fields are separated by a configured single byte and may be quoted: a
//! field starting with `"` must end with `"`, may contain the separator,
//! and doubles embedded quotes. Unquoted fields are trimmed of
//! surrounding whitespace and may carry interior double quotes as plain
//! content (only a trailing one is flagged); quoted fields preserve
//! their exact content, which is why the writer quotes anything starting
//! or ending with whitespace. parse(write(s)) returns s for every s free
//! of CR, LF and NUL.

use thiserror::Error;

/// Fields longer than this are truncated and flagged.
pub const MAX_FIELD_SIZE: usize = 1_000_000;

/// Per-field tokenization problems. The field still carries a
/// best-effort value; the caller decides whether the row survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("missing double quote at the start of the field")]
    MissingBeginDoubleQuote,
    #[error("double quote in the middle of the field should be paired")]
    MissingMiddleDoubleQuote,
    #[error("missing double quote at the end of the field")]
    MissingEndDoubleQuote,
    #[error("field too long, truncated to {MAX_FIELD_SIZE} characters")]
    TooLong,
}

/// Rejection cause for a proposed separator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid field separator: must be a single non-alphanumeric byte, not '\"', CR, LF or NUL")]
pub struct InvalidSeparator;

/// One tokenized field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedField {
    pub text: String,
    pub error: Option<FieldError>,
    pub end_of_line: bool,
}

/// Tokenizes the fields of one line.
#[derive(Debug, Clone, Copy)]
pub struct FieldParser {
    separator: u8,
}

impl FieldParser {
    pub fn new(separator: u8) -> Result<FieldParser, InvalidSeparator> {
        if separator.is_ascii_alphanumeric()
            || matches!(separator, b'"' | b'\r' | b'\n' | b'\0')
        {
            return Err(InvalidSeparator);
        }
        Ok(FieldParser { separator })
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// Read the next field of `line` starting at `*position`, advancing
    /// the cursor past the separator (or to the end of line). `line` may
    /// carry its terminating LF or CR+LF; both count as end of line.
    pub fn next_field(&self, line: &[u8], position: &mut usize) -> ParsedField {
        let mut pos = *position;

        // Leading whitespace outside quotes never belongs to the field.
        while pos < line.len() && (line[pos] == b' ' || line[pos] == b'\t') && line[pos] != self.separator {
            pos += 1;
        }

        let (field, error, after) = if pos < line.len() && line[pos] == b'"' {
            self.scan_quoted(line, pos)
        } else {
            self.scan_raw(line, pos)
        };

        // Step past the separator; otherwise we are at end of line.
        let mut end_of_line = true;
        let mut next = after;
        if after < line.len() && line[after] == self.separator {
            end_of_line = false;
            next = after + 1;
        }
        *position = next;

        let (text, error) = finish_field(field, error);
        ParsedField { text, error, end_of_line }
    }

    /// Unquoted field: bytes until the separator or end of line, trimmed.
    /// Interior double quotes are ordinary content; only a field that
    /// *ends* with one is flagged, since that pairs with a begin quote
    /// that was never there.
    fn scan_raw(&self, line: &[u8], start: usize) -> (Vec<u8>, Option<FieldError>, usize) {
        let mut pos = start;
        while pos < line.len() {
            let byte = line[pos];
            if byte == self.separator || is_eol(line, pos) {
                break;
            }
            pos += 1;
        }
        let error = if pos > start && line[pos - 1] == b'"' {
            Some(FieldError::MissingBeginDoubleQuote)
        } else {
            None
        };
        let mut field = line[start..pos].to_vec();
        while field.last().is_some_and(|b| *b == b' ' || *b == b'\t') {
            field.pop();
        }
        (field, error, skip_eol(line, pos))
    }

    /// Quoted field: content between the quotes with `""` decoding to a
    /// single `"`. Content after the closing quote, or a missing closing
    /// quote, flags the field.
    fn scan_quoted(&self, line: &[u8], start: usize) -> (Vec<u8>, Option<FieldError>, usize) {
        debug_assert_eq!(line[start], b'"');
        let mut field = Vec::new();
        let mut error = None;
        let mut pos = start + 1;
        let mut closed = false;

        while pos < line.len() && !is_eol(line, pos) {
            let byte = line[pos];
            if byte == b'"' {
                if pos + 1 < line.len() && line[pos + 1] == b'"' {
                    field.push(b'"');
                    pos += 2;
                    continue;
                }
                closed = true;
                pos += 1;
                break;
            }
            field.push(byte);
            pos += 1;
        }

        if !closed {
            return (field, Some(FieldError::MissingEndDoubleQuote), skip_eol(line, pos));
        }

        // Only whitespace may sit between the closing quote and the
        // separator; anything else is an unpaired middle quote.
        let mut after = pos;
        while after < line.len()
            && line[after] != self.separator
            && !is_eol(line, after)
        {
            if line[after] != b' ' && line[after] != b'\t' {
                error = Some(FieldError::MissingMiddleDoubleQuote);
            }
            after += 1;
        }
        (field, error, skip_eol(line, after))
    }
}

fn is_eol(line: &[u8], pos: usize) -> bool {
    match line[pos] {
        b'\n' => true,
        b'\r' => pos + 1 >= line.len() || line[pos + 1] == b'\n',
        _ => false,
    }
}

fn skip_eol(line: &[u8], pos: usize) -> usize {
    let mut end = pos;
    if end < line.len() && line[end] == b'\r' && (end + 1 == line.len() || line[end + 1] == b'\n')
    {
        end += 1;
    }
    if end < line.len() && line[end] == b'\n' {
        end += 1;
    }
    end
}

fn finish_field(mut field: Vec<u8>, mut error: Option<FieldError>) -> (String, Option<FieldError>) {
    if field.len() > MAX_FIELD_SIZE {
        let mut cut = MAX_FIELD_SIZE;
        while cut > 0 && (field[cut] & 0xC0) == 0x80 {
            cut -= 1;
        }
        field.truncate(cut);
        error = Some(FieldError::TooLong);
    }
    (String::from_utf8_lossy(&field).into_owned(), error)
}

/// Inverse of the tokenizer: quote when the content would otherwise not
/// survive a parse (separator, quotes, line breaks, or surrounding
/// whitespace that trimming would eat).
pub fn write_field(field: &str, separator: u8, out: &mut String) {
    let needs_quotes = field.as_bytes().contains(&separator)
        || field.starts_with('"')
        || field.contains('\r')
        || field.contains('\n')
        || field.starts_with(|c| c == ' ' || c == '\t')
        || field.ends_with(|c| c == ' ' || c == '\t');

    if !needs_quotes {
        out.push_str(field);
        return;
    }
    out.push('"');
    for c in field.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &FieldParser, line: &[u8]) -> Vec<ParsedField> {
        let mut fields = Vec::new();
        let mut position = 0;
        loop {
            let field = parser.next_field(line, &mut position);
            let end = field.end_of_line;
            fields.push(field);
            if end {
                break;
            }
        }
        fields
    }

    #[test]
    fn test_separator_validation() {
        assert!(FieldParser::new(b',').is_ok());
        assert!(FieldParser::new(b'\t').is_ok());
        assert!(FieldParser::new(b';').is_ok());
        assert!(FieldParser::new(b'a').is_err());
        assert!(FieldParser::new(b'7').is_err());
        assert!(FieldParser::new(b'"').is_err());
        assert!(FieldParser::new(b'\n').is_err());
        assert!(FieldParser::new(b'\0').is_err());
    }

    #[test]
    fn test_simple_fields() {
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b"a,b,c\n");
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].text, "a");
        assert_eq!(fields[2].text, "c");
        assert!(fields[2].end_of_line);
        assert!(fields.iter().all(|f| f.error.is_none()));
    }

    #[test]
    fn test_whitespace_trimming() {
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b"  a  , b\n");
        assert_eq!(fields[0].text, "a");
        assert_eq!(fields[1].text, "b");
    }

    #[test]
    fn test_quoted_with_separator_and_escapes() {
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b"\"a,b\",\"c\"\"d\"\n");
        assert_eq!(fields[0].text, "a,b");
        assert_eq!(fields[1].text, "c\"d");
        assert!(fields.iter().all(|f| f.error.is_none()));
    }

    #[test]
    fn test_crlf_end_of_line() {
        let parser = FieldParser::new(b';').unwrap();
        let fields = parse_all(&parser, b"x;y\r\n");
        assert_eq!(fields[1].text, "y");
        assert!(fields[1].end_of_line);
    }

    #[test]
    fn test_missing_end_quote() {
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b"\"abc\n");
        assert_eq!(fields[0].error, Some(FieldError::MissingEndDoubleQuote));
        assert_eq!(fields[0].text, "abc");
    }

    #[test]
    fn test_interior_quote_in_raw_field_is_content() {
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b"ab\"c,5\"2,he said\"hi\n");
        assert_eq!(fields[0].text, "ab\"c");
        assert_eq!(fields[1].text, "5\"2");
        assert_eq!(fields[2].text, "he said\"hi");
        assert!(fields.iter().all(|f| f.error.is_none()));
    }

    #[test]
    fn test_trailing_quote_in_raw_field_is_flagged() {
        // A raw field ending with a double quote pairs with a begin
        // quote that was never there; the value itself is kept.
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b"abc\",d\n");
        assert_eq!(fields[0].error, Some(FieldError::MissingBeginDoubleQuote));
        assert_eq!(fields[0].text, "abc\"");
        assert_eq!(fields[1].text, "d");
    }

    #[test]
    fn test_content_after_closing_quote() {
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b"\"ab\"junk,d\n");
        assert_eq!(fields[0].error, Some(FieldError::MissingMiddleDoubleQuote));
        assert_eq!(fields[1].text, "d");
    }

    #[test]
    fn test_field_too_long_truncated() {
        let parser = FieldParser::new(b',').unwrap();
        let long = vec![b'x'; MAX_FIELD_SIZE + 10];
        let mut line = long.clone();
        line.push(b'\n');
        let fields = parse_all(&parser, &line);
        assert_eq!(fields[0].error, Some(FieldError::TooLong));
        assert_eq!(fields[0].text.len(), MAX_FIELD_SIZE);
    }

    #[test]
    fn test_empty_fields() {
        let parser = FieldParser::new(b',').unwrap();
        let fields = parse_all(&parser, b",,\n");
        assert_eq!(fields.len(), 3);
        assert!(fields.iter().all(|f| f.text.is_empty()));
    }

    #[test]
    fn test_write_field_round_trip() {
        let parser = FieldParser::new(b',').unwrap();
        for case in [
            "plain",
            "with,separator",
            "\"starts with quote",
            "embedded\"quote",
            " leading space",
            "trailing space ",
            "",
            "tab\tinside",
            "unicode é ✓",
        ] {
            let mut line = String::new();
            write_field(case, b',', &mut line);
            line.push('\n');
            let mut position = 0;
            let field = parser.next_field(line.as_bytes(), &mut position);
            assert_eq!(field.text, case, "round trip of {:?}", case);
            assert_eq!(field.error, None, "round trip of {:?}", case);
        }
    }

    #[test]
    fn test_write_field_round_trip_multi() {
        // Several exotic fields on one line survive together.
        let parser = FieldParser::new(b';').unwrap();
        let cases = ["a;b", "", "  ", "\"\"", "x"];
        let mut line = String::new();
        for (index, case) in cases.iter().enumerate() {
            if index > 0 {
                line.push(';');
            }
            write_field(case, b';', &mut line);
        }
        line.push('\n');

        let mut position = 0;
        for expected in cases {
            let field = parser.next_field(line.as_bytes(), &mut position);
            assert_eq!(field.text, expected);
            assert_eq!(field.error, None);
        }
    }
}
