//! Client-side data layer for a veterinary clinic EMR backend.
//!
//! - [`api`]: typed JSON client with normalized errors
//! - [`query`]: in-memory query cache with staleness, GC and retries
//! - [`emr`]: entity types, query keys and the cached EMR client
//! - [`event`]: connectivity monitor feeding reconnect refetches

pub mod api;
pub mod config;
pub mod emr;
pub mod event;
pub mod logging;
pub mod query;
