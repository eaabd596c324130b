//! HTTP access to the remote catalog's search API.

pub mod client;
pub mod estimator;
mod retry;

pub use client::CatalogClient;
pub use estimator::LiveEstimator;

/// Cap on upstream error bodies quoted into logs.
pub(crate) const UPSTREAM_BODY_PREVIEW_CHARS: usize = 256;
