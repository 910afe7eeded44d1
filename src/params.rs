//! Command parameters.
//!
//! A [`ParameterSet`] is built once per command through
//! [`ParameterSetBuilder`] and cannot be changed afterwards. Values are a
//! closed set of shapes ([`ParamValue`]) so flattening to wire pairs is
//! exhaustive.

use std::collections::{BTreeMap, btree_map};

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParamValue {
    /// Plain string value.
    Text(String),

    /// Multi-valued parameter, sent comma separated (`ids=a,b,c`).
    List(Vec<String>),

    /// "List parameter" used by bulk commands, sent as
    /// `name[index].key=value` for every entry.
    Entries(Vec<BTreeMap<String, String>>),
}

impl ParamValue {
    fn flatten_into(&self, name: &str, out: &mut Vec<(String, String)>) {
        match self {
            Self::Text(v) => out.push((name.to_string(), v.clone())),
            Self::List(values) => out.push((name.to_string(), values.join(","))),
            Self::Entries(entries) => {
                for (index, entry) in entries.iter().enumerate() {
                    for (key, value) in entry {
                        out.push((format!("{name}[{index}].{key}"), value.clone()));
                    }
                }
            }
        }
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Immutable set of named parameters for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    /// Start building a parameter set.
    #[must_use]
    pub fn builder() -> ParameterSetBuilder {
        ParameterSetBuilder::default()
    }

    /// A parameter set without parameters.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a parameter by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Number of named parameters (before flattening).
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set holds no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over the named parameters.
    pub fn iter(&self) -> btree_map::Iter<'_, String, ParamValue> {
        self.values.iter()
    }

    /// Flatten into `(name, value)` wire pairs, unencoded and unordered
    /// with respect to the canonical signing order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.values.len());
        for (name, value) in &self.values {
            value.flatten_into(name, &mut out);
        }
        out
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = (&'a String, &'a ParamValue);
    type IntoIter = btree_map::Iter<'a, String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Builder for [`ParameterSet`].
///
/// Setting a name twice keeps the last value.
#[derive(Debug, Clone, Default)]
pub struct ParameterSetBuilder {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSetBuilder {
    /// Set a string parameter.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .insert(name.into(), ParamValue::Text(value.into()));
        self
    }

    /// Set a string parameter when `value` is `Some`.
    #[must_use]
    pub fn set_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.set(name, v),
            None => self,
        }
    }

    /// Set a boolean parameter (`true` / `false`).
    #[must_use]
    pub fn set_bool(self, name: impl Into<String>, value: bool) -> Self {
        self.set(name, if value { "true" } else { "false" })
    }

    /// Set an integer parameter.
    #[must_use]
    pub fn set_int(self, name: impl Into<String>, value: i64) -> Self {
        self.set(name, value.to_string())
    }

    /// Set a multi-valued parameter.
    #[must_use]
    pub fn set_list<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.insert(
            name.into(),
            ParamValue::List(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Append one entry to a list parameter (`name[i].key=value`).
    ///
    /// Replaces any non-list value previously set under `name`.
    #[must_use]
    pub fn push_entry<I, K, V>(mut self, name: impl Into<String>, entry: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entry: BTreeMap<String, String> = entry
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        match self.values.entry(name.into()) {
            btree_map::Entry::Occupied(mut slot) => match slot.get_mut() {
                ParamValue::Entries(entries) => entries.push(entry),
                other => *other = ParamValue::Entries(vec![entry]),
            },
            btree_map::Entry::Vacant(slot) => {
                slot.insert(ParamValue::Entries(vec![entry]));
            }
        }
        self
    }

    /// Set a parameter from any [`ParamValue`].
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> ParameterSet {
        ParameterSet {
            values: self.values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn last_write_wins() {
        let params = ParameterSet::builder()
            .set("name", "first")
            .set("name", "second")
            .build();
        assert_eq!(params.len(), 1);
        assert_eq!(
            params.get("name"),
            Some(&ParamValue::Text("second".to_string()))
        );
    }

    #[test]
    fn optional_values_are_skipped_when_none() {
        let params = ParameterSet::builder()
            .set_opt("account", None::<String>)
            .set_opt("projectid", Some("p-1"))
            .build();
        assert!(params.get("account").is_none());
        assert_eq!(params.to_pairs(), vec![pair("projectid", "p-1")]);
    }

    #[test]
    fn lists_are_comma_joined() {
        let params = ParameterSet::builder()
            .set_list("ids", ["a", "b", "c"])
            .set_bool("forced", true)
            .set_int("page", 2)
            .build();
        let pairs = params.to_pairs();
        assert!(pairs.contains(&pair("ids", "a,b,c")));
        assert!(pairs.contains(&pair("forced", "true")));
        assert!(pairs.contains(&pair("page", "2")));
    }

    #[test]
    fn entries_are_indexed() {
        let params = ParameterSet::builder()
            .push_entry("tags", [("key", "env"), ("value", "prod")])
            .push_entry("tags", [("key", "team"), ("value", "core")])
            .build();
        let mut pairs = params.to_pairs();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                pair("tags[0].key", "env"),
                pair("tags[0].value", "prod"),
                pair("tags[1].key", "team"),
                pair("tags[1].value", "core"),
            ]
        );
    }

    #[test]
    fn built_set_is_independent_of_builder_clones() {
        let builder = ParameterSet::builder().set("zoneid", "z1");
        let first = builder.clone().build();
        let second = builder.set("zoneid", "z2").build();
        assert_eq!(first.get("zoneid"), Some(&ParamValue::from("z1")));
        assert_eq!(second.get("zoneid"), Some(&ParamValue::from("z2")));
    }
}
