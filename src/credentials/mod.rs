pub mod actor;
pub mod pool;

pub use actor::{CredentialActorMessage, CredentialPoolHandle, PoolStats, spawn};
pub use pool::{AcquireOutcome, CredentialId, CredentialLease, CredentialPool, QuotaSnapshot};
