//! Session record and its bag.
//!
//! A [`Session`] is keyed by its access token, which is also the shard key.
//! Everything except the [`Bag`] and the expiry is immutable after creation.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form string map attached to a session.
///
/// Keys are unique. Updates merge into the existing map, they never replace
/// it wholesale. [`Bag::encode`] and [`Bag::decode`] are the only persisted
/// representation, shared by every storage implementation.
///
/// # Example
///
/// ```
/// use mnemosyne_core::session::Bag;
///
/// let mut bag = Bag::from_iter([("username", "test")]);
/// bag.set("email", "a@b.com");
/// assert_eq!(bag.len(), 2);
/// assert_eq!(bag.get("username"), Some("test"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bag(BTreeMap<String, String>);

impl Bag {
    /// Create an empty bag.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Set `key` to `value`, returning the previous value if any.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up a single key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge every key of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Serialize the bag for storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(&self.0).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Deserialize a bag previously produced by [`Bag::encode`].
    ///
    /// An empty byte slice decodes to an empty bag.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the bytes are not a valid bag.
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        bincode::deserialize(bytes)
            .map(Self)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Bag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for Bag {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl IntoIterator for Bag {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A stored session.
///
/// Optional string fields use the empty string for "not set".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique key and shard key.
    pub access_token: String,
    /// Optional refresh token, set at creation.
    #[serde(default)]
    pub refresh_token: String,
    /// Owning principal.
    pub subject_id: String,
    /// Optional client descriptor.
    #[serde(default)]
    pub subject_client: String,
    /// Mutable key/value data.
    #[serde(default)]
    pub bag: Bag,
    /// Sliding expiry, pushed to `now + ttl` on every read.
    pub expire_at: DateTime<Utc>,
}

/// Fields supplied by a caller creating a session.
///
/// An empty `access_token` asks the session manager to generate one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSession {
    /// Pre-generated token, or empty.
    pub access_token: String,
    /// Optional refresh token.
    pub refresh_token: String,
    /// Owning principal; required.
    pub subject_id: String,
    /// Optional client descriptor.
    pub subject_client: String,
    /// Initial bag.
    pub bag: Bag,
}

impl NewSession {
    /// Start building a session for `subject_id`.
    #[must_use]
    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ..Self::default()
        }
    }

    /// Use a caller-chosen access token.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = access_token.into();
        self
    }

    /// Attach a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = refresh_token.into();
        self
    }

    /// Attach a client descriptor.
    #[must_use]
    pub fn with_subject_client(mut self, subject_client: impl Into<String>) -> Self {
        self.subject_client = subject_client.into();
        self
    }

    /// Set the initial bag.
    #[must_use]
    pub fn with_bag(mut self, bag: Bag) -> Self {
        self.bag = bag;
        self
    }

    /// Turn the request into a stored session expiring at `expire_at`.
    #[must_use]
    pub fn into_session(self, expire_at: DateTime<Utc>) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            subject_id: self.subject_id,
            subject_client: self.subject_client,
            bag: self.bag,
            expire_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bag_set_merges_keys() {
        let mut bag = Bag::from_iter([("username", "test")]);
        assert_eq!(bag.set("email", "a@b.com"), None);
        assert_eq!(bag.set("username", "other"), Some("test".to_string()));

        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get("username"), Some("other"));
        assert_eq!(bag.get("email"), Some("a@b.com"));
    }

    #[test]
    fn bag_merge_keeps_existing_keys() {
        let mut bag = Bag::from_iter([("a", "1"), ("b", "2")]);
        bag.merge(Bag::from_iter([("b", "3"), ("c", "4")]));

        let pairs: Vec<_> = bag.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "3"), ("c", "4")]);
    }

    #[test]
    fn bag_encoding_survives_storage() {
        let bag = Bag::from_iter([("index", "7"), ("lang", "pl")]);
        let bytes = bag.encode().unwrap();
        assert_eq!(Bag::decode(&bytes).unwrap(), bag);
    }

    #[test]
    fn empty_bytes_decode_to_empty_bag() {
        assert!(Bag::decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn garbage_bytes_are_a_serialization_error() {
        let err = Bag::decode(&[0xff; 3]).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn bag_serializes_as_plain_object() {
        let bag = Bag::from_iter([("k", "v")]);
        assert_eq!(serde_json::to_string(&bag).unwrap(), r#"{"k":"v"}"#);
    }

    #[test]
    fn new_session_defaults_missing_fields() {
        let parsed: NewSession = serde_json::from_str(r#"{"subject_id":"user-1"}"#).unwrap();
        assert_eq!(parsed, NewSession::for_subject("user-1"));
        assert!(parsed.access_token.is_empty());
    }
}
