pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod partition;
pub mod queue;
pub mod remote;
pub mod store;
pub mod worker;

pub use error::{IsRetryable, MagpieError};
