//! Canonical label sets and series keys.
//!
//! A series is identified by its full label set, including the reserved
//! [`METRIC_NAME_LABEL`]. Labels are kept sorted by name so that the same set
//! always produces the same [`SeriesKey`], whatever order the pairs arrived in.
//!
//! # Example
//!
//! ```rust
//! use promsnap::labels::Labels;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let a = Labels::for_metric("up", &[
//!     ("job".to_string(), "api".to_string()),
//!     ("instance".to_string(), "n1".to_string()),
//! ])?;
//! let b = Labels::for_metric("up", &[
//!     ("instance".to_string(), "n1".to_string()),
//!     ("job".to_string(), "api".to_string()),
//! ])?;
//!
//! assert_eq!(a.key(), b.key());
//! assert_eq!(a.to_string(), r#"{__name__="up", instance="n1", job="api"}"#);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Reserved label holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Separates a label name from its value inside a [`SeriesKey`].
const NAME_VALUE_SEP: u8 = 0xfe;

/// Terminates each label pair inside a [`SeriesKey`].
const PAIR_SEP: u8 = 0xff;

/// A single label pair.
///
/// Field order matters: the derived `Ord` compares names first, then values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// The label name.
    pub name: String,
    /// The label value.
    pub value: String,
}

impl Label {
    /// Creates a label pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A sorted, duplicate-free set of labels.
///
/// `Labels` orders lexicographically over its sorted `(name, value)` pairs,
/// which gives query results a deterministic total order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Builds the canonical label set for one metric instance.
    ///
    /// The metric name becomes the `__name__` label, instance labels are
    /// validated and labels with an empty value are omitted (an empty value
    /// is equivalent to the label being absent).
    ///
    /// # Errors
    ///
    /// - [`IngestError::InvalidMetricName`] if `name` is not a valid metric name
    /// - [`IngestError::InvalidLabel`] if a label name is invalid or reserved
    /// - [`IngestError::DuplicateLabel`] if a label name is repeated
    pub fn for_metric(name: &str, pairs: &[(String, String)]) -> Result<Self, IngestError> {
        if !is_valid_metric_name(name) {
            return Err(IngestError::InvalidMetricName {
                name: name.to_string(),
            });
        }

        let mut labels = Vec::with_capacity(pairs.len() + 1);
        labels.push(Label::new(METRIC_NAME_LABEL, name));

        for (key, value) in pairs {
            if let Some(reason) = label_name_problem(key) {
                return Err(IngestError::InvalidLabel {
                    metric: name.to_string(),
                    key: key.clone(),
                    value: value.clone(),
                    reason: reason.to_string(),
                });
            }
            if value.is_empty() {
                continue;
            }
            labels.push(Label::new(key.as_str(), value.as_str()));
        }

        labels.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = labels.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(IngestError::DuplicateLabel {
                metric: name.to_string(),
                key: pair[0].name.clone(),
            });
        }

        Ok(Self(labels))
    }

    /// Builds a label set from arbitrary pairs without validation.
    ///
    /// Pairs are sorted by name; when a name repeats, the last pair wins.
    /// Intended for evaluator output and tests, not the ingest path.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self(map.into_iter().map(|(name, value)| Label { name, value }).collect())
    }

    /// Returns the value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|label| label.name.as_str().cmp(name))
            .ok()
            .map(|index| self.0[index].value.as_str())
    }

    /// Returns the metric name, if the set carries one.
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    /// Returns a copy of this set without the metric name label.
    #[must_use]
    pub fn without_metric_name(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|label| label.name != METRIC_NAME_LABEL)
                .cloned()
                .collect(),
        )
    }

    /// Converts the set to a map, leaving out the metric name label.
    pub fn to_map_without_name(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter(|label| label.name != METRIC_NAME_LABEL)
            .map(|label| (label.name.clone(), label.value.clone()))
            .collect()
    }

    /// Iterates over the labels in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Iterates over the label names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|label| label.name.as_str())
    }

    /// Returns the number of labels, including the metric name.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set has no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Computes the canonical key for this set.
    pub fn key(&self) -> SeriesKey {
        let capacity = self
            .0
            .iter()
            .map(|label| label.name.len() + label.value.len() + 2)
            .sum();
        let mut bytes = Vec::with_capacity(capacity);
        for label in &self.0 {
            bytes.extend_from_slice(label.name.as_bytes());
            bytes.push(NAME_VALUE_SEP);
            bytes.extend_from_slice(label.value.as_bytes());
            bytes.push(PAIR_SEP);
        }
        SeriesKey(bytes)
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        f.write_str("}")
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Index key derived from a sorted label set.
///
/// Pairs are encoded as `name 0xfe value 0xff`. Neither byte can appear in
/// UTF-8 text, so two different label sets never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(Vec<u8>);

impl SeriesKey {
    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Checks a metric name against `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Returns why `name` cannot be used as an instance label, if it cannot.
fn label_name_problem(name: &str) -> Option<&'static str> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Some("name cannot be empty"),
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some(_) => return Some("name must start with a letter or underscore"),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Some("name may only contain letters, digits and underscores");
    }
    if name.starts_with("__") {
        return Some("names starting with '__' are reserved for internal use");
    }
    None
}
