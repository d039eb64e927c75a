//! Ordered parameter sets with per-key serialization flags.

use std::collections::HashMap;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use super::value::ParamValue;

/// Controls where a parameter shows up when an experiment is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamFlags {
    /// Contributes a `key-value` segment to the experiment name.
    pub include_in_name: bool,
    /// Contributes `--key value` to the argument list.
    pub include_in_args: bool,
}

impl ParamFlags {
    /// Creates flags with explicit settings.
    pub fn new(include_in_name: bool, include_in_args: bool) -> Self {
        Self {
            include_in_name,
            include_in_args,
        }
    }

    /// Flags that hide a key from both the name and the arguments.
    pub fn hidden() -> Self {
        Self::new(false, false)
    }

    /// Whether the key is shown anywhere (name or arguments).
    pub fn is_visible(&self) -> bool {
        self.include_in_name || self.include_in_args
    }
}

impl Default for ParamFlags {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// Serialized form of one parameter: flags are kept even when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub key: String,
    #[serde(default)]
    pub value: Option<ParamValue>,
    pub include_in_name: bool,
    pub include_in_args: bool,
}

/// A mapping from parameter name to value, plus per-key flags.
///
/// Keys remember their first-registration order, which drives name and
/// argument rendering. A key may be flagged before it is given a value, so
/// the flagged keys are always a superset of the valued keys.
///
/// Read accessors never mutate. [`ParamSet::merge`] returns a fresh set and
/// leaves both operands untouched; for keys present on both sides the right
/// operand wins.
///
/// Equality compares the `(key, value, flags)` triples and ignores
/// registration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ParamEntry>", into = "Vec<ParamEntry>")]
pub struct ParamSet {
    order: Vec<String>,
    flags: HashMap<String, ParamFlags>,
    values: HashMap<String, ParamValue>,
}

impl ParamSet {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `(key, value, include_in_name, include_in_args)` tuples.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, V, bool, bool)>,
    {
        let mut set = Self::new();
        for (key, value, in_name, in_args) in pairs {
            set.set(key, value, in_name, in_args);
        }
        set
    }

    /// Chainable form of [`ParamSet::update`] for building fragments.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.update(key, value);
        self
    }

    /// Assigns a value and explicit flags, overwriting both.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ParamValue>,
        include_in_name: bool,
        include_in_args: bool,
    ) -> &mut Self {
        let key = key.into();
        self.register(&key);
        self.flags
            .insert(key.clone(), ParamFlags::new(include_in_name, include_in_args));
        self.values.insert(key, value.into());
        self
    }

    /// Assigns a value, keeping the key's existing flags.
    ///
    /// Keys seen for the first time get `(true, true)`.
    pub fn update(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        let key = key.into();
        if !self.flags.contains_key(&key) {
            self.register(&key);
            self.flags.insert(key.clone(), ParamFlags::default());
        }
        self.values.insert(key, value.into());
        self
    }

    /// Assigns several values, as repeated calls to [`ParamSet::update`].
    pub fn update_all<K, V, I>(&mut self, pairs: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            self.update(key, value);
        }
        self
    }

    /// Deletes a key and its flags. Absent keys are ignored.
    pub fn remove(&mut self, key: &str) -> &mut Self {
        if self.flags.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
        self.values.remove(key);
        self
    }

    /// Sets whether `key` appears in the experiment name.
    ///
    /// The value is untouched; an unknown key is registered with flags only.
    pub fn set_include_in_name(&mut self, key: &str, include: bool) -> &mut Self {
        self.flags_mut(key).include_in_name = include;
        self
    }

    /// Sets whether `key` appears in the argument list.
    pub fn set_include_in_args(&mut self, key: &str, include: bool) -> &mut Self {
        self.flags_mut(key).include_in_args = include;
        self
    }

    /// Returns a new set holding the union of keys, `other` winning on overlap.
    ///
    /// A key flagged but unset in `other` overrides only the flags.
    pub fn merge(&self, other: &ParamSet) -> ParamSet {
        let mut merged = self.clone();
        for key in &other.order {
            merged.register(key);
            if let Some(flags) = other.flags.get(key) {
                merged.flags.insert(key.clone(), *flags);
            }
            if let Some(value) = other.values.get(key) {
                merged.values.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Returns the value for `key`, if set.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Returns the string value for `key`, if set and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_str)
    }

    /// Returns the flags for `key`, including keys flagged but unset.
    pub fn flags(&self, key: &str) -> Option<ParamFlags> {
        self.flags.get(key).copied()
    }

    /// Whether `key` has a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of keys with a value.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no key has a value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys with a value, in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .filter(|k| self.values.contains_key(k.as_str()))
            .map(String::as_str)
    }

    /// `(key, value, flags)` for every key with a value, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue, ParamFlags)> {
        self.order.iter().filter_map(|k| {
            let value = self.values.get(k)?;
            let flags = self.flags.get(k).copied().unwrap_or_default();
            Some((k.as_str(), value, flags))
        })
    }

    /// Whether every value in `subset` is present here with an equal value.
    pub fn matches(&self, subset: &ParamSet) -> bool {
        subset
            .values
            .iter()
            .all(|(k, v)| self.values.get(k) == Some(v))
    }

    fn register(&mut self, key: &str) {
        if !self.flags.contains_key(key) && !self.order.iter().any(|k| k == key) {
            self.order.push(key.to_string());
        }
    }

    fn flags_mut(&mut self, key: &str) -> &mut ParamFlags {
        self.register(key);
        self.flags.entry(key.to_string()).or_default()
    }
}

impl PartialEq for ParamSet {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.flags == other.flags
    }
}

impl Add<&ParamSet> for &ParamSet {
    type Output = ParamSet;

    fn add(self, rhs: &ParamSet) -> ParamSet {
        self.merge(rhs)
    }
}

impl Add for ParamSet {
    type Output = ParamSet;

    fn add(self, rhs: ParamSet) -> ParamSet {
        self.merge(&rhs)
    }
}

impl From<Vec<ParamEntry>> for ParamSet {
    fn from(entries: Vec<ParamEntry>) -> Self {
        let mut set = ParamSet::new();
        for entry in entries {
            match entry.value {
                Some(value) => {
                    set.set(entry.key, value, entry.include_in_name, entry.include_in_args);
                }
                None => {
                    set.set_include_in_name(&entry.key, entry.include_in_name);
                    set.set_include_in_args(&entry.key, entry.include_in_args);
                }
            }
        }
        set
    }
}

impl From<ParamSet> for Vec<ParamEntry> {
    fn from(set: ParamSet) -> Self {
        set.order
            .iter()
            .map(|key| {
                let flags = set.flags.get(key).copied().unwrap_or_default();
                ParamEntry {
                    key: key.clone(),
                    value: set.values.get(key).cloned(),
                    include_in_name: flags.include_in_name,
                    include_in_args: flags.include_in_args,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relaxation() -> ParamSet {
        ParamSet::new()
            .with("relaxation", "rlt")
            .with("envelopeOnly", true)
            .with("rltFilter", "obj-var")
    }

    #[test]
    fn test_update_defaults_flags_to_visible() {
        let mut p = ParamSet::new();
        p.update("iterations", 1000);
        assert_eq!(p.flags("iterations"), Some(ParamFlags::new(true, true)));
        assert_eq!(p.get("iterations"), Some(&ParamValue::Int(1000)));
    }

    #[test]
    fn test_update_preserves_existing_flags() {
        let mut p = ParamSet::new();
        p.set("train", "/data/wsj", false, true);
        p.update("train", "/data/brown");
        assert_eq!(p.flags("train"), Some(ParamFlags::new(false, true)));
        assert_eq!(p.get_str("train"), Some("/data/brown"));
    }

    #[test]
    fn test_flag_before_set() {
        let mut p = ParamSet::new();
        p.set_include_in_name("brownClusters", false);
        assert!(!p.contains_key("brownClusters"));
        assert_eq!(p.flags("brownClusters"), Some(ParamFlags::new(false, true)));

        p.update("brownClusters", "/data/bc256");
        assert_eq!(p.flags("brownClusters"), Some(ParamFlags::new(false, true)));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut p = relaxation();
        let before = p.clone();
        p.remove("missing");
        assert_eq!(p, before);

        p.remove("relaxation");
        assert!(!p.contains_key("relaxation"));
        assert!(p.flags("relaxation").is_none());
        assert_eq!(p.keys().collect::<Vec<_>>(), vec!["envelopeOnly", "rltFilter"]);
    }

    #[test]
    fn test_merge_right_bias_and_operands_untouched() {
        let a = relaxation();
        let mut b = ParamSet::new();
        b.set("relaxation", "dw", false, true);

        let merged = a.merge(&b);
        assert_eq!(merged.get_str("relaxation"), Some("dw"));
        assert_eq!(merged.flags("relaxation"), Some(ParamFlags::new(false, true)));
        assert_eq!(a.get_str("relaxation"), Some("rlt"));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_merge_keeps_left_registration_order() {
        let a = ParamSet::new().with("x", 1).with("y", 2);
        let b = ParamSet::new().with("z", 3).with("x", 4);
        let merged = &a + &b;
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["x", "y", "z"]);
        assert_eq!(merged.get("x"), Some(&ParamValue::Int(4)));
    }

    #[test]
    fn test_merge_flag_only_key_overrides_flags() {
        let a = ParamSet::new().with("test", "/data/test");
        let mut b = ParamSet::new();
        b.set_include_in_name("test", false);
        let merged = a.merge(&b);
        assert_eq!(merged.get_str("test"), Some("/data/test"));
        assert!(!merged.flags("test").map(|f| f.include_in_name).unwrap_or(true));
    }

    #[test]
    fn test_matches_subset() {
        let exp = relaxation().with("offsetProb", 1.0);
        assert!(exp.matches(&ParamSet::new().with("offsetProb", 1.0)));
        assert!(!exp.matches(&ParamSet::new().with("offsetProb", 0.5)));
        assert!(!exp.matches(&ParamSet::new().with("missing", 1)));
        assert!(exp.matches(&ParamSet::new()));
    }

    #[test]
    fn test_serde_keeps_order_flags_and_unset_keys() {
        let mut p = ParamSet::new();
        p.set("dataset", "wsj200", true, false);
        p.update("maxNumSentences", 200);
        p.set_include_in_name("test", false);

        let json = serde_json::to_string(&p).expect("serialize");
        let parsed: ParamSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, p);
        assert_eq!(parsed.keys().collect::<Vec<_>>(), vec!["dataset", "maxNumSentences"]);
        assert_eq!(parsed.flags("test"), Some(ParamFlags::new(false, true)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn value_strategy() -> impl Strategy<Value = ParamValue> {
            prop_oneof![
                any::<bool>().prop_map(ParamValue::Bool),
                any::<i64>().prop_map(ParamValue::Int),
                (-1.0e6f64..1.0e6).prop_map(ParamValue::Float),
                "[a-z]{0,6}".prop_map(ParamValue::Str),
            ]
        }

        fn set_strategy(prefix: &'static str) -> impl Strategy<Value = ParamSet> {
            prop::collection::vec(
                (0usize..8, value_strategy(), any::<bool>(), any::<bool>()),
                0..8,
            )
            .prop_map(move |entries| {
                let mut set = ParamSet::new();
                for (k, v, n, a) in entries {
                    set.set(format!("{}{}", prefix, k), v, n, a);
                }
                set
            })
        }

        proptest! {
            /// Property: merging disjoint sets commutes
            #[test]
            fn prop_disjoint_merge_commutes(a in set_strategy("a"), b in set_strategy("b")) {
                prop_assert_eq!(a.merge(&b), b.merge(&a));
            }

            /// Property: for shared keys the right operand's value and flags win
            #[test]
            fn prop_merge_is_right_biased(a in set_strategy("k"), b in set_strategy("k")) {
                let merged = a.merge(&b);
                for (key, value, flags) in b.iter() {
                    prop_assert_eq!(merged.get(key), Some(value));
                    prop_assert_eq!(merged.flags(key), Some(flags));
                }
                for (key, value, _) in a.iter() {
                    if !b.contains_key(key) {
                        prop_assert_eq!(merged.get(key), Some(value));
                    }
                }
            }

            /// Property: merging never mutates either operand
            #[test]
            fn prop_merge_leaves_operands(a in set_strategy("k"), b in set_strategy("k")) {
                let (a0, b0) = (a.clone(), b.clone());
                let _ = a.merge(&b);
                prop_assert_eq!(a, a0);
                prop_assert_eq!(b, b0);
            }
        }
    }
}
