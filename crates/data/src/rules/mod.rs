//! The standard derivation rule library
//!
//! A closed set registered by name at startup. Rules are grouped in
//! families: one concrete struct per family, preconfigured per registered
//! name (the source system's deep inheritance tree collapsed into tagged
//! structs behind the `DerivationRule` trait).

use crate::rule::RuleRegistry;

pub mod compare;
pub mod datetime;
pub mod hashmap;
pub mod math;
pub mod standard;
pub mod stats;
pub mod string;
pub mod table;
pub mod text;
pub mod vector;

/// Install the whole library into `registry`.
pub fn register_all(registry: &mut RuleRegistry) {
    standard::register(registry);
    math::register(registry);
    compare::register(registry);
    string::register(registry);
    datetime::register(registry);
    vector::register(registry);
    hashmap::register(registry);
    table::register(registry);
    stats::register(registry);
    text::register(registry);
}

/// The `def`/`core`/`clone_rule` plumbing shared by every rule family.
macro_rules! rule_common {
    () => {
        fn def(&self) -> &'static $crate::rule::RuleDef {
            self.def
        }

        fn core(&self) -> &$crate::rule::RuleCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut $crate::rule::RuleCore {
            &mut self.core
        }

        fn clone_rule(&self) -> Box<dyn $crate::rule::DerivationRule> {
            Box::new(self.clone())
        }
    };
}

pub(crate) use rule_common;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_is_registered_once() {
        let registry = RuleRegistry::with_standard_rules();
        assert!(registry.len() > 120);
        for name in ["Copy", "TableMean", "MultipleCharNGramCounts", "HashMapC", "ValueAtKey"] {
            assert!(registry.contains(name), "missing rule '{}'", name);
        }
    }
}
