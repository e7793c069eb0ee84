//! Typed JSON client for the EMR REST API.

mod client;
mod error;
#[cfg(test)]
pub(crate) mod test_server;

pub use client::{ApiClient, RequestOptions};
pub use error::ApiError;
