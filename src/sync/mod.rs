//! Background delivery of queued actions.

mod coordinator;
mod registration;
mod retry;

pub use coordinator::{SyncCoordinator, SyncOutcome, SyncReport};
pub use registration::{SyncRegistration, SyncRegistry, SyncState};
pub use retry::RetryPolicy;
