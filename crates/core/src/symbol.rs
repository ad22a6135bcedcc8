//! Interned symbol values
//!
//! Every distinct byte string maps to one canonical, refcounted entry in a
//! process-wide intern table. A [`Symbol`] is a cheap handle to that entry;
//! equality and hashing use the entry's identity, so symbol-keyed maps get
//! O(1) lookups. The identity is exposed as a [`NumericKey`] that stays
//! stable for the life of the interned entry; maps keyed by it must keep
//! the `Symbol` alive for the map's lifetime.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// Pointer-stable identity of an interned symbol.
///
/// Equal keys imply equal symbol values. A key may be reused only after the
/// last handle to its entry is dropped, which is exactly the lifetime the
/// map owner is required to guarantee.
pub type NumericKey = usize;

struct SymbolData {
    text: Box<str>,
}

/// An interned, immutable string value.
#[derive(Clone)]
pub struct Symbol(Arc<SymbolData>);

struct InternTable {
    entries: HashMap<Box<str>, Weak<SymbolData>>,
    /// Purge dead entries when the table grows past this mark.
    purge_mark: usize,
}

fn table() -> &'static Mutex<InternTable> {
    static TABLE: OnceLock<Mutex<InternTable>> = OnceLock::new();
    TABLE.get_or_init(|| {
        Mutex::new(InternTable {
            entries: HashMap::new(),
            purge_mark: 64,
        })
    })
}

impl Symbol {
    /// Intern `text`, returning the canonical handle.
    pub fn intern(text: &str) -> Symbol {
        let mut table = table().lock().expect("symbol intern table poisoned");

        if let Some(weak) = table.entries.get(text)
            && let Some(strong) = weak.upgrade()
        {
            return Symbol(strong);
        }

        let data = Arc::new(SymbolData { text: Box::from(text) });
        table.entries.insert(Box::from(text), Arc::downgrade(&data));

        // Opportunistic purge keeps dead Weak entries from accumulating.
        if table.entries.len() > table.purge_mark {
            table.entries.retain(|_, weak| weak.strong_count() > 0);
            table.purge_mark = (table.entries.len() * 2).max(64);
        }

        Symbol(data)
    }

    /// The interned empty symbol.
    pub fn empty() -> Symbol {
        Symbol::intern("")
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    pub fn len(&self) -> usize {
        self.0.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.text.is_empty()
    }

    /// Identity of the interned entry, stable while any handle lives.
    pub fn numeric_key(&self) -> NumericKey {
        Arc::as_ptr(&self.0) as NumericKey
    }
}

/// Number of live entries in the intern table (for tests and diagnostics).
pub fn interned_count() -> usize {
    let table = table().lock().expect("symbol intern table poisoned");
    table
        .entries
        .values()
        .filter(|weak| weak.strong_count() > 0)
        .count()
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        // Interning makes identity equality complete for value equality.
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numeric_key().hash(state);
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    /// Lexicographic by content, the order used by statistical tie-breaks.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Symbol::empty()
    }
}

impl From<&str> for Symbol {
    fn from(text: &str) -> Self {
        Symbol::intern(text)
    }
}

impl From<String> for Symbol {
    fn from(text: String) -> Self {
        Symbol::intern(&text)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_intern_dedup() {
        let a = Symbol::intern("alpha");
        let b = Symbol::intern("alpha");
        let c = Symbol::intern("beta");

        assert_eq!(a, b);
        assert_eq!(a.numeric_key(), b.numeric_key());
        assert_ne!(a, c);
        assert_ne!(a.numeric_key(), c.numeric_key());
    }

    #[test]
    fn test_empty_symbol() {
        let e = Symbol::empty();
        assert!(e.is_empty());
        assert_eq!(e, Symbol::intern(""));
        assert_eq!(Symbol::default(), e);
    }

    #[test]
    fn test_lexicographic_order() {
        let mut symbols = vec![Symbol::intern("b"), Symbol::intern("a"), Symbol::intern("c")];
        symbols.sort();
        let texts: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_numeric_key_map_stability() {
        // Insert by numeric key while keeping the symbols alive: lookups
        // must return the originally inserted values.
        let symbols: Vec<Symbol> = (0..100).map(|i| Symbol::intern(&format!("key-{}", i))).collect();
        let mut map = HashMap::new();
        for (i, s) in symbols.iter().enumerate() {
            map.insert(s.numeric_key(), i);
        }
        for (i, s) in symbols.iter().enumerate() {
            // Re-interning the same text finds the same entry.
            let again = Symbol::intern(&format!("key-{}", i));
            assert_eq!(map.get(&again.numeric_key()), Some(&i));
            assert_eq!(again, *s);
        }
    }

    #[test]
    #[serial]
    fn test_dead_entries_are_purged() {
        let before = interned_count();
        {
            let _held: Vec<Symbol> =
                (0..500).map(|i| Symbol::intern(&format!("transient-{}", i))).collect();
            assert!(interned_count() >= before + 500);
        }
        // All transient handles dropped: live count falls back.
        let _trigger: Vec<Symbol> =
            (0..100).map(|i| Symbol::intern(&format!("post-{}", i))).collect();
        assert!(interned_count() < before + 500);
    }
}
