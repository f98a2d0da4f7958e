//! Optimistic state store and mutation coordination per collection.

pub mod coordinator;
pub mod mirror;
pub mod operation;

pub use self::coordinator::{DeleteOutcome, MutationCoordinator, SyncError};
pub use self::mirror::Mirror;
pub use self::operation::{OperationKind, OperationStatus, OptimisticOperation};
