//! Record identifiers and the key bindings of keyed stores.
//!
//! Identifier fields differ per entity type: most records are keyed by
//! `id`, node infos by `name`, and check results by the composite of
//! their check and node. A [`KeyField`] captures both the JSON field
//! names forming a key and a typed extractor, so a store can key full
//! records and also resolve the identifier of a bare delete payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// Separator between the parts of a composite key.
const COMPOSITE_SEPARATOR: &str = "/";

/// A normalized record identifier.
///
/// String identifiers are kept verbatim, numeric identifiers are rendered
/// in decimal, and composite identifiers join their parts with `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct RecordKey(String);

impl RecordKey {
    /// Create a key from a single identifier value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a composite key from several identifier parts.
    pub fn composite(parts: &[&str]) -> Self {
        Self(parts.join(COMPOSITE_SEPARATOR))
    }

    /// Convert a JSON scalar into a key.
    ///
    /// Only strings and numbers identify records; anything else yields
    /// `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Read a (possibly composite) key out of a JSON object.
    ///
    /// Returns `None` if `data` is not an object or any of `fields` is
    /// missing or not a scalar identifier.
    pub fn from_fields(data: &Value, fields: &[&str]) -> Option<Self> {
        let parts = fields
            .iter()
            .map(|field| data.get(*field).and_then(Self::from_value))
            .collect::<Option<Vec<_>>>()?;
        let parts: Vec<&str> = parts.iter().map(Self::as_str).collect();
        Some(Self::composite(&parts))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty. Empty keys never identify a record.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RecordKey {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RecordKey {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for RecordKey {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identifier binding of a keyed store.
///
/// `fields` names the JSON fields that form the key (in order) and
/// `extract` computes the same key from a decoded record. The two must
/// agree for every record of `R`.
pub struct KeyField<R> {
    fields: &'static [&'static str],
    extract: fn(&R) -> RecordKey,
}

impl<R> KeyField<R> {
    /// Bind a key to the given JSON fields and typed extractor.
    pub const fn new(fields: &'static [&'static str], extract: fn(&R) -> RecordKey) -> Self {
        Self { fields, extract }
    }

    /// The JSON field names forming the key.
    pub const fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// The key of a decoded record.
    pub fn key_of(&self, record: &R) -> RecordKey {
        (self.extract)(record)
    }

    /// The key carried by a raw JSON payload, e.g. the `data` of a delete
    /// message that only holds the identifier.
    pub fn key_in(&self, data: &Value) -> Option<RecordKey> {
        RecordKey::from_fields(data, self.fields)
    }

    /// Human-readable description of the key, e.g. `check_id+node_id`.
    pub fn describe(&self) -> String {
        self.fields.join("+")
    }
}

impl<R> Clone for KeyField<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for KeyField<R> {}

impl<R> core::fmt::Debug for KeyField<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyField")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}
