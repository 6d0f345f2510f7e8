//! Cache keys for every queryable marketplace resource.

use crate::cache::CacheKey;
use crate::cache_key;

pub fn companies_map() -> CacheKey {
  cache_key!["companies", "map"]
}

pub fn companies_directory() -> CacheKey {
  cache_key!["companies", "directory"]
}

pub fn me() -> CacheKey {
  cache_key!["auth", "me"]
}

pub fn conversations() -> CacheKey {
  cache_key!["conversations"]
}

pub fn messages(conversation_id: u64) -> CacheKey {
  cache_key!["conversations", conversation_id, "messages"]
}

pub fn user(id: u64) -> CacheKey {
  cache_key!["users", id]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages_key_nests_under_conversations() {
    assert!(messages(7).starts_with(&conversations()));
    assert_ne!(messages(7), messages(8));
    assert!(!me().starts_with(&conversations()));
  }
}
