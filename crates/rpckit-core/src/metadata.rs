//! Metadata value model.
//!
//! Metadata is out-of-band key/value data carried alongside a call:
//! invocation metadata from client to server, and initial and trailing
//! metadata from server to client.
//!
//! # Rules
//!
//! - A collection is an ordered sequence of entries. Duplicate keys are
//!   allowed and order is preserved; nothing is ever deduplicated.
//! - Keys are non-empty and consist of `0-9`, `a-z`, `_`, `-` and `.`.
//! - Keys ending in [`BINARY_SUFFIX`] carry [`MetadataValue::Binary`] values,
//!   all other keys carry [`MetadataValue::Text`] values.
//! - Text values are printable ASCII.
//!
//! Every constructor validates, so a [`Metadata`] value is always well formed
//! and malformed input is rejected before a call ever reaches a transport.
//!
//! # Example
//!
//! ```rust
//! use rpckit_core::metadata::{Metadata, MetadataValue, seen_subset};
//!
//! let sent = Metadata::try_from_pairs([
//!     ("client-to-server", MetadataValue::from("question")),
//!     ("client-to-server-bin", MetadataValue::from(b"\x07\x07\x07")),
//! ])
//! .unwrap();
//!
//! // Transports may add their own entries on the way.
//! let mut received = sent.clone();
//! received.push("user-agent", "rpckit").unwrap();
//!
//! assert!(seen_subset(&sent, &received));
//! assert!(!seen_subset(&received, &sent));
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Key suffix marking a binary-valued entry.
pub const BINARY_SUFFIX: &str = "-bin";

/// Reasons a metadata collection can fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMetadata {
    /// The input is not a sequence at all.
    #[error("metadata must be a sequence of key/value pairs")]
    NotASequence,

    /// An element of the sequence is not a two-element pair.
    #[error("metadata entry {index} is not a key/value pair")]
    NotAPair {
        /// Position of the offending element.
        index: usize,
    },

    /// The key of a pair is not text.
    #[error("metadata key at entry {index} is not text")]
    KeyNotText {
        /// Position of the offending element.
        index: usize,
    },

    /// The value of a pair is neither text nor bytes.
    #[error("metadata value for '{key}' is neither text nor bytes")]
    UnsupportedValue {
        /// Key of the offending entry.
        key: String,
    },

    /// The key is empty or contains characters outside `0-9a-z_.-`.
    #[error("invalid metadata key '{key}'")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// A text value contains characters outside printable ASCII.
    #[error("metadata value for '{key}' is not printable ASCII")]
    InvalidTextValue {
        /// Key of the offending entry.
        key: String,
    },

    /// A binary value was given for a key without the `-bin` suffix.
    #[error("binary metadata value for non-binary key '{key}'")]
    BinaryValueForTextKey {
        /// Key of the offending entry.
        key: String,
    },

    /// A text value was given for a key with the `-bin` suffix.
    #[error("text metadata value for binary key '{key}'")]
    TextValueForBinaryKey {
        /// Key of the offending entry.
        key: String,
    },
}

/// A metadata value: either printable text or arbitrary bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataValue {
    /// A text value, used by keys without the binary suffix.
    Text(String),
    /// A binary value, used by keys ending in [`BINARY_SUFFIX`].
    Binary(Bytes),
}

impl MetadataValue {
    /// Create a text value.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Create a binary value.
    #[must_use]
    pub fn binary(value: impl Into<Bytes>) -> Self {
        Self::Binary(value.into())
    }

    /// Whether this is a binary value.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// The text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// The raw bytes of the value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Text values render as-is, binary values as unpadded base64 (the header
/// encoding used for `-bin` keys).
impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Binary(bytes) => f.write_str(&STANDARD_NO_PAD.encode(bytes)),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&[u8]> for MetadataValue {
    fn from(value: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for MetadataValue {
    fn from(value: &[u8; N]) -> Self {
        Self::Binary(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

impl From<Bytes> for MetadataValue {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

/// A single validated key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataEntry {
    key: String,
    value: MetadataValue,
}

impl MetadataEntry {
    /// Validate and create an entry.
    pub fn new(
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<Self, InvalidMetadata> {
        let key = key.into();
        let value = value.into();
        validate_entry(&key, &value)?;
        Ok(Self { key, value })
    }

    /// The entry key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entry value.
    #[must_use]
    pub const fn value(&self) -> &MetadataValue {
        &self.value
    }

    /// Split the entry into key and value.
    #[must_use]
    pub fn into_parts(self) -> (String, MetadataValue) {
        (self.key, self.value)
    }
}

/// Whether `key` names a binary-valued entry.
#[must_use]
pub fn is_binary_key(key: &str) -> bool {
    key.ends_with(BINARY_SUFFIX)
}

fn validate_key(key: &str) -> Result<(), InvalidMetadata> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(InvalidMetadata::InvalidKey {
            key: key.to_string(),
        })
    }
}

fn validate_entry(key: &str, value: &MetadataValue) -> Result<(), InvalidMetadata> {
    validate_key(key)?;
    match (is_binary_key(key), value) {
        (true, MetadataValue::Binary(_)) => Ok(()),
        (true, MetadataValue::Text(_)) => Err(InvalidMetadata::TextValueForBinaryKey {
            key: key.to_string(),
        }),
        (false, MetadataValue::Binary(_)) => Err(InvalidMetadata::BinaryValueForTextKey {
            key: key.to_string(),
        }),
        (false, MetadataValue::Text(text)) => {
            if text.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
                Ok(())
            } else {
                Err(InvalidMetadata::InvalidTextValue {
                    key: key.to_string(),
                })
            }
        }
    }
}

/// An ordered, validated metadata collection.
///
/// Equality is order-sensitive. Use [`seen_subset`] to check that some
/// entries are present without requiring the collections to match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<MetadataEntry>,
}

impl Metadata {
    /// Create an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Validate a sequence of pairs into a collection.
    ///
    /// Fails on the first invalid pair; no partial collection is returned.
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, InvalidMetadata>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        let entries = pairs
            .into_iter()
            .map(|(key, value)| MetadataEntry::new(key, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Append an entry.
    pub fn push(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<(), InvalidMetadata> {
        self.entries.push(MetadataEntry::new(key, value)?);
        Ok(())
    }

    /// Append an entry, consuming and returning the collection.
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<Self, InvalidMetadata> {
        self.push(key, value)?;
        Ok(self)
    }

    /// Append all entries of another collection.
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// The first value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    /// All values stored under `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a MetadataValue> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    /// Whether any entry uses `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|entry| entry.key == key)
    }

    /// Iterate over the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, MetadataEntry> {
        self.entries.iter()
    }

    /// Number of entries, counting duplicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every entry of `self` is present in `other`.
    ///
    /// See [`seen_subset`].
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        seen_subset(self, other)
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = &'a MetadataEntry;
    type IntoIter = std::slice::Iter<'a, MetadataEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for Metadata {
    type Item = MetadataEntry;
    type IntoIter = std::vec::IntoIter<MetadataEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Validate untyped JSON metadata.
///
/// The accepted shape is an array of `[key, value]` arrays where `key` is a
/// string and `value` is either a string (text) or an array of integers in
/// `0..=255` (binary).
impl TryFrom<&serde_json::Value> for Metadata {
    type Error = InvalidMetadata;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        let items = value.as_array().ok_or(InvalidMetadata::NotASequence)?;
        let mut metadata = Self::new();
        for (index, item) in items.iter().enumerate() {
            let pair = match item.as_array() {
                Some(pair) if pair.len() == 2 => pair,
                _ => return Err(InvalidMetadata::NotAPair { index }),
            };
            let key = pair[0]
                .as_str()
                .ok_or(InvalidMetadata::KeyNotText { index })?;
            let value = json_value(key, &pair[1])?;
            metadata.push(key, value)?;
        }
        Ok(metadata)
    }
}

impl TryFrom<serde_json::Value> for Metadata {
    type Error = InvalidMetadata;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

fn json_value(key: &str, value: &serde_json::Value) -> Result<MetadataValue, InvalidMetadata> {
    let unsupported = || InvalidMetadata::UnsupportedValue {
        key: key.to_string(),
    };
    match value {
        serde_json::Value::String(text) => Ok(MetadataValue::Text(text.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(unsupported)
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(MetadataValue::from),
        _ => Err(unsupported()),
    }
}

/// Whether every entry of `expected` occurs in `actual`.
///
/// Order is ignored but multiplicity is not: an entry listed twice in
/// `expected` must appear at least twice in `actual`. Adding entries to
/// `actual` never turns a `true` result into `false`.
#[must_use]
pub fn seen_subset(expected: &Metadata, actual: &Metadata) -> bool {
    let mut available: HashMap<&MetadataEntry, usize> = HashMap::new();
    for entry in actual {
        *available.entry(entry).or_default() += 1;
    }
    expected.iter().all(|entry| match available.get_mut(entry) {
        Some(count) if *count > 0 => {
            *count -= 1;
            true
        }
        _ => false,
    })
}

/// Conversion into a validated [`Metadata`] collection.
///
/// Call sites accept `impl IntoMetadata` so callers can pass an existing
/// collection, `()` for none, literal pairs, or untyped JSON. Validation
/// happens during the conversion.
pub trait IntoMetadata {
    /// Convert and validate.
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata>;
}

impl IntoMetadata for Metadata {
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Ok(self)
    }
}

impl IntoMetadata for &Metadata {
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Ok(self.clone())
    }
}

impl IntoMetadata for Option<Metadata> {
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Ok(self.unwrap_or_default())
    }
}

impl IntoMetadata for () {
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Ok(Metadata::new())
    }
}

impl IntoMetadata for serde_json::Value {
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Metadata::try_from(&self)
    }
}

impl IntoMetadata for &serde_json::Value {
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Metadata::try_from(self)
    }
}

impl<K, V> IntoMetadata for Vec<(K, V)>
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Metadata::try_from_pairs(self)
    }
}

impl<K, V, const N: usize> IntoMetadata for [(K, V); N]
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn into_metadata(self) -> Result<Metadata, InvalidMetadata> {
        Metadata::try_from_pairs(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn client_metadata() -> Metadata {
        Metadata::try_from_pairs([
            ("client-to-server", MetadataValue::from("question")),
            ("client-to-server-bin", MetadataValue::from(b"\x07\x07\x07")),
        ])
        .unwrap()
    }

    #[test]
    fn test_valid_pairs_preserve_order_and_duplicates() {
        let metadata = Metadata::try_from_pairs([
            ("b", MetadataValue::from("2")),
            ("a", MetadataValue::from("1")),
            ("b", MetadataValue::from("3")),
        ])
        .unwrap();

        let keys: Vec<_> = metadata.iter().map(MetadataEntry::key).collect();
        assert_eq!(keys, ["b", "a", "b"]);
        assert_eq!(metadata.get("b"), Some(&MetadataValue::from("2")));
        assert_eq!(metadata.get_all("b").count(), 2);
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_key_rules() {
        assert!(Metadata::new().with("x-request.id_2", "ok").is_ok());
        assert_eq!(
            Metadata::new().with("", "v").unwrap_err(),
            InvalidMetadata::InvalidKey { key: String::new() }
        );
        assert!(matches!(
            Metadata::new().with("Upper", "v"),
            Err(InvalidMetadata::InvalidKey { .. })
        ));
        assert!(matches!(
            Metadata::new().with("has space", "v"),
            Err(InvalidMetadata::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_value_kind_must_match_key_suffix() {
        assert!(matches!(
            Metadata::new().with("trace-bin", "text"),
            Err(InvalidMetadata::TextValueForBinaryKey { .. })
        ));
        assert!(matches!(
            Metadata::new().with("trace", b"\x00\x01"),
            Err(InvalidMetadata::BinaryValueForTextKey { .. })
        ));
        assert!(matches!(
            Metadata::new().with("trace", "line\nbreak"),
            Err(InvalidMetadata::InvalidTextValue { .. })
        ));
    }

    #[test]
    fn test_failed_validation_returns_nothing_partial() {
        let result = Metadata::try_from_pairs([
            ("good", MetadataValue::from("1")),
            ("BAD", MetadataValue::from("2")),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_metadata() {
        let metadata = Metadata::try_from(json!([
            ["client-to-server", "question"],
            ["client-to-server-bin", [7, 7, 7]],
        ]))
        .unwrap();
        assert_eq!(metadata, client_metadata());
    }

    #[test]
    fn test_json_rejects_malformed_input() {
        let cases = [
            (json!([[42, 42]]), InvalidMetadata::KeyNotText { index: 0 }),
            (json!([[{}, {}]]), InvalidMetadata::KeyNotText { index: 0 }),
            (
                json!([["normal", {}]]),
                InvalidMetadata::UnsupportedValue {
                    key: "normal".to_string(),
                },
            ),
            (json!({}), InvalidMetadata::NotASequence),
            (json!([{}]), InvalidMetadata::NotAPair { index: 0 }),
            (json!([["k", "v", "extra"]]), InvalidMetadata::NotAPair { index: 0 }),
            (json!([[["k", "v"]]]), InvalidMetadata::NotAPair { index: 0 }),
            (
                json!([["k-bin", [1, 256]]]),
                InvalidMetadata::UnsupportedValue {
                    key: "k-bin".to_string(),
                },
            ),
        ];

        for (input, expected) in cases {
            assert_eq!(Metadata::try_from(&input).unwrap_err(), expected, "{input}");
        }
    }

    #[test]
    fn test_seen_subset_ignores_order_and_extras() {
        let expected = client_metadata();
        let mut actual = Metadata::new().with("user-agent", "test").unwrap();
        for entry in expected.iter().rev() {
            actual.push(entry.key(), entry.value().clone()).unwrap();
        }

        assert!(seen_subset(&expected, &actual));
        assert!(seen_subset(&Metadata::new(), &actual));
        assert!(!seen_subset(&actual, &expected));
    }

    #[test]
    fn test_seen_subset_counts_multiplicity() {
        let twice = Metadata::try_from_pairs([("k", "v"), ("k", "v")]).unwrap();
        let once = Metadata::try_from_pairs([("k", "v")]).unwrap();
        let other_value = Metadata::try_from_pairs([("k", "v"), ("k", "w")]).unwrap();

        assert!(seen_subset(&once, &twice));
        assert!(!seen_subset(&twice, &once));
        assert!(!seen_subset(&twice, &other_value));
    }

    #[test]
    fn test_binary_display_is_base64() {
        assert_eq!(MetadataValue::from(b"\x07\x07\x07").to_string(), "BwcH");
        assert_eq!(MetadataValue::from("answer").to_string(), "answer");
    }

    #[test]
    fn test_into_metadata_conversions() {
        assert!(().into_metadata().unwrap().is_empty());
        assert_eq!(
            vec![("a", "1")].into_metadata().unwrap(),
            Metadata::new().with("a", "1").unwrap()
        );
        assert!(json!("nope").into_metadata().is_err());
    }
}
