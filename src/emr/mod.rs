//! EMR resources: wire types, query keys and the (cached) client.

pub mod cached_client;
pub mod client;
pub mod keys;
pub mod types;

pub use cached_client::CachedEmrClient;
pub use client::{EmrClient, Resource};
pub use keys::EmrQueryKey;
