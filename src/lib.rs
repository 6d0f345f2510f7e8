//! Client-side data synchronization for the Festival NATUR marketplace.
//!
//! Reads go through a keyed query cache ([`cache::QueryClient`]) that
//! deduplicates fetches, serves stale data while refetching, and evicts
//! unobserved entries. Writes go through [`mutation::Mutation`], which
//! invalidates dependent keys from a static table on success and runs a
//! declared rollback on failure. [`views`] holds the headless view models
//! built on both.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod mutation;
pub mod session;
pub mod storage;
pub mod views;
