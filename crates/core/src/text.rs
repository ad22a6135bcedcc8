//! Large text values
//!
//! `Text` carries symbol-like content too large to intern: file bodies,
//! long free-text fields. Construction caps the length at
//! [`Text::MAX_LENGTH`] so a hostile field cannot exhaust memory.

use std::fmt;
use std::sync::Arc;

/// An immutable, size-capped text value.
#[derive(Clone, PartialEq, Eq)]
pub struct Text(Arc<str>);

impl Text {
    /// Maximum stored length in bytes; longer inputs are truncated at a
    /// character boundary.
    pub const MAX_LENGTH: usize = 1 << 20;

    pub fn new(content: &str) -> Text {
        if content.len() <= Text::MAX_LENGTH {
            Text(Arc::from(content))
        } else {
            let mut cut = Text::MAX_LENGTH;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            Text(Arc::from(&content[..cut]))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Text {
    fn default() -> Self {
        Text(Arc::from(""))
    }
}

impl From<&str> for Text {
    fn from(content: &str) -> Self {
        Text::new(content)
    }
}

impl From<String> for Text {
    fn from(content: String) -> Self {
        Text::new(&content)
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() <= 40 {
            write!(f, "Text({:?})", self.as_str())
        } else {
            write!(f, "Text({:?}… {} bytes)", &self.as_str()[..40], self.len())
        }
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        let t = Text::new("hello");
        assert_eq!(t.as_str(), "hello");
        assert_eq!(t.len(), 5);
        assert!(!t.is_empty());
        assert!(Text::default().is_empty());
    }

    #[test]
    fn test_truncation_at_cap() {
        let long = "x".repeat(Text::MAX_LENGTH + 100);
        let t = Text::new(&long);
        assert_eq!(t.len(), Text::MAX_LENGTH);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // 'é' is two bytes; force the cap to land mid-character.
        let mut long = "x".repeat(Text::MAX_LENGTH - 1);
        long.push_str("ééé");
        let t = Text::new(&long);
        assert!(t.len() <= Text::MAX_LENGTH);
        assert!(t.as_str().chars().last().is_some());
    }
}
