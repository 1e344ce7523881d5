//! Prediction dispatch: the cooldown gate and the fan-out to model queues.

pub mod coordinator;
pub mod error;
pub mod ports;
pub mod types;

pub use coordinator::{CoordinatorSettings, DispatchCoordinator};
pub use error::{DispatchError, QueueFailure};
pub use ports::{CooldownStore, ObjectStore, ResourceLocator, WorkQueue};
pub use types::{DispatchAck, DispatchPayload, ResourceId};

#[cfg(test)]
pub(crate) mod testing;
