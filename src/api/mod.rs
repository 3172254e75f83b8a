pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod error;
pub mod mapper;
pub mod reference;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cached_client::{CachedIncidentClient, SyncAction};
pub use client::ListParams;
pub use error::ApiError;
pub use types::{Incident, IncidentPage, Priority, PriorityCounts};
