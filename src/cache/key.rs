//! Structural cache keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One component of a [`CacheKey`].
///
/// Integers up to `i64::MAX` are always `Int`, whatever type they were built
/// from; `UInt` only holds values above that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
  Int(i64),
  UInt(u64),
  Str(String),
}

impl From<&str> for KeyPart {
  fn from(value: &str) -> Self {
    KeyPart::Str(value.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(value: String) -> Self {
    KeyPart::Str(value)
  }
}

impl From<&String> for KeyPart {
  fn from(value: &String) -> Self {
    KeyPart::Str(value.clone())
  }
}

impl From<i64> for KeyPart {
  fn from(value: i64) -> Self {
    KeyPart::Int(value)
  }
}

impl From<i32> for KeyPart {
  fn from(value: i32) -> Self {
    KeyPart::Int(i64::from(value))
  }
}

impl From<u64> for KeyPart {
  fn from(value: u64) -> Self {
    match i64::try_from(value) {
      Ok(n) => KeyPart::Int(n),
      Err(_) => KeyPart::UInt(value),
    }
  }
}

/// Ordered sequence of primitives identifying a queryable resource,
/// e.g. `["conversations", 7, "messages"]`.
///
/// Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<KeyPart>);

/// Build a [`CacheKey`] from a list of strings and integers.
///
/// ```ignore
/// let key = cache_key!["conversations", 7, "messages"];
/// ```
#[macro_export]
macro_rules! cache_key {
  ($($part:expr),* $(,)?) => {
    $crate::cache::CacheKey::new(vec![$($crate::cache::KeyPart::from($part)),*])
  };
}

impl CacheKey {
  pub fn new(parts: Vec<KeyPart>) -> Self {
    Self(parts)
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether `prefix` matches the leading parts of this key.
  /// The empty key is a prefix of every key.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// Stable, fixed-length identifier for persisting data under this key.
  pub fn storage_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("[")?;
    for (i, part) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(",")?;
      }
      match part {
        KeyPart::Int(n) => write!(f, "{}", n)?,
        KeyPart::UInt(n) => write!(f, "{}", n)?,
        KeyPart::Str(s) => write!(f, "{:?}", s)?,
      }
    }
    f.write_str("]")
  }
}

/// Selects cache entries by key, for invalidation and removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
  /// Only the entry with exactly this key
  Exact(CacheKey),
  /// Every entry whose key starts with this prefix
  Prefix(CacheKey),
}

impl KeyMatch {
  pub fn matches(&self, key: &CacheKey) -> bool {
    match self {
      KeyMatch::Exact(k) => k == key,
      KeyMatch::Prefix(prefix) => key.starts_with(prefix),
    }
  }

  pub fn key(&self) -> &CacheKey {
    match self {
      KeyMatch::Exact(k) | KeyMatch::Prefix(k) => k,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_structural_equality() {
    let a = cache_key!["conversations", 7, "messages"];
    let b = cache_key!["conversations".to_string(), 7u64, "messages"];
    assert_eq!(a, b);

    let mut set = HashSet::new();
    set.insert(a);
    assert!(set.contains(&b));

    assert_ne!(cache_key!["conversations", 7], cache_key!["conversations", "7"]);
  }

  #[test]
  fn test_large_ids_stay_distinct() {
    let max = cache_key!["users", u64::MAX];
    let next = cache_key!["users", u64::MAX - 1];
    assert_ne!(max, next);
    assert_ne!(max.storage_hash(), next.storage_hash());
    assert_ne!(cache_key!["users", i64::MAX], cache_key!["users", i64::MAX as u64 + 1]);
    assert_eq!(cache_key!["users", i64::MAX], cache_key!["users", i64::MAX as u64]);

    assert_eq!(max.to_string(), format!(r#"["users",{}]"#, u64::MAX));
    let back: CacheKey = serde_json::from_str(&serde_json::to_string(&max).unwrap()).unwrap();
    assert_eq!(back, max);
  }

  #[test]
  fn test_prefix_matching() {
    let messages = cache_key!["conversations", 7, "messages"];
    assert!(messages.starts_with(&cache_key!["conversations"]));
    assert!(messages.starts_with(&cache_key![]));
    assert!(!messages.starts_with(&cache_key!["conversations", 8]));

    assert!(KeyMatch::Prefix(cache_key!["conversations"]).matches(&messages));
    assert!(!KeyMatch::Exact(cache_key!["conversations"]).matches(&messages));
  }

  #[test]
  fn test_display_and_hash() {
    let key = cache_key!["companies", "map"];
    assert_eq!(key.to_string(), r#"["companies","map"]"#);
    assert_eq!(key.storage_hash().len(), 64);
    assert_eq!(key.storage_hash(), cache_key!["companies", "map"].storage_hash());
    assert_ne!(key.storage_hash(), cache_key!["companies"].storage_hash());
  }

  #[test]
  fn test_serializes_as_plain_array() {
    let key = cache_key!["conversations", 42, "messages"];
    let json = serde_json::to_string(&key).unwrap();
    assert_eq!(json, r#"["conversations",42,"messages"]"#);
    let back: CacheKey = serde_json::from_str(&json).unwrap();
    assert_eq!(back, key);
  }
}
