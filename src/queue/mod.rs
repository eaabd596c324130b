pub mod actor;
pub mod schema;
pub mod state;

pub use actor::{QueueActorMessage, QueueHandle, QueueSettings, spawn};
pub use state::{QueueDepth, QueueState, UnitLease, UnitState, WorkUnit};
