//! Client-side query cache for server data.
//!
//! Inspired by TanStack Query. Views observe a [`CacheKey`] together with a
//! fetch function; the cache:
//! - serves cached data immediately and refetches in the background once it
//!   is older than `stale_time`
//! - deduplicates concurrent fetches for one key (one in-flight fetch at most)
//! - retries failed fetches according to a [`RetryPolicy`]
//! - discards responses that were superseded by a newer fetch for the key
//! - evicts entries `gc_time` after their last observer detaches
//!
//! Writes go through [`crate::mutation`], which invalidates keys here.

mod client;
mod key;
mod observer;
mod options;
mod state;


pub use client::{FetchContext, QueryClient};
pub use key::{CacheKey, KeyMatch, KeyPart};
pub use observer::QueryObserver;
pub use options::{QueryOptions, RetryPolicy};
pub use state::{QueryState, QueryStatus};
