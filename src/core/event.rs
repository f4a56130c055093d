//! Event types accepted by the ingestion pipeline

use crate::core::temporal::Timestamp;
use crate::error::{Error, Result};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Event labels: string keys mapped to string values, keys unique.
///
/// Decoding rejects a document that repeats a key instead of silently keeping
/// the last value. `null` decodes to an empty set of labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label, replacing any previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

struct LabelsVisitor;

impl<'de> Visitor<'de> for LabelsVisitor {
    type Value = Labels;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of string labels")
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Labels, E> {
        Ok(Labels::default())
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Labels, E> {
        Ok(Labels::default())
    }

    fn visit_some<D>(self, deserializer: D) -> std::result::Result<Labels, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(LabelsVisitor)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Labels, A::Error> {
        let mut labels = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, String>()? {
            if labels.contains_key(&key) {
                return Err(de::Error::custom(format_args!("duplicate label `{}`", key)));
            }
            labels.insert(key, value);
        }
        Ok(Labels(labels))
    }
}

impl<'de> Deserialize<'de> for Labels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_option(LabelsVisitor)
    }
}

/// A timestamped, labeled value.
///
/// Wire form: `{"labels": {...}, "time": <nanos>, "value": "..."}`. The
/// capitalized field names written by older clients are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, alias = "Labels")]
    pub labels: Labels,
    #[serde(alias = "Time")]
    pub time: Timestamp,
    #[serde(alias = "Value")]
    pub value: String,
}

impl Event {
    /// Create an event without labels
    pub fn new(time: Timestamp, value: impl Into<String>) -> Self {
        Self {
            labels: Labels::default(),
            time,
            value: value.into(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key, value);
        self
    }

    /// Decode an event from its JSON wire form
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Canonical encoding stored in a segment's payload column
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}
