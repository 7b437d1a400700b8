pub mod config;
pub mod coordinator;
pub mod decision;
pub mod errors;
pub mod executor;
pub mod group;
pub mod guard;
pub mod local_tx;
pub mod outcome;
pub mod participant;
pub mod rendezvous;

// Re-export key types and structs for easier access
pub use config::ParticipantConfig;
pub use coordinator::{GroupCoordinator, NetworkSession};
pub use decision::Decision;
pub use errors::{BoxError, Result, TxError};
pub use group::{ParticipantOutcome, TransactionGroup};
pub use local_tx::{LocalTransactionManager, NestedTx, TxStatus};
pub use outcome::OutcomeLatch;
pub use participant::{GroupRole, ParticipantService, prelude};
pub use rendezvous::{AwaitFlag, Task, TaskLease, TaskRegistry, TaskState};
