//! Festival NATUR marketplace API: endpoints, response schemas, cache keys
//! and the write-to-invalidation table.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod keys;
pub mod resources;
pub mod types;

pub use cached_client::CachedNaturClient;
pub use client::NaturApi;
pub use resources::{Method, Resource, ResourceKind};
