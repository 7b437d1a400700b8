use thiserror::Error;

/// Boxed error produced by an intercepted business call.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Failed to join transaction group: {0}")]
    GroupRegistration(String),

    #[error("Transaction group rejected the participant state: {0}")]
    GroupState(String),

    #[error("Coordinator network failure, local transaction rolled back")]
    Network,

    #[error("Timed out waiting for the coordinator, local transaction rolled back")]
    Timeout,

    #[error("Business call failed: {0}")]
    Business(#[source] BoxError),

    #[error("Rendezvous task already registered: {0}")]
    DuplicateKey(String),

    #[error("Rendezvous task not found: {0}")]
    TaskNotFound(String),

    #[error("Rendezvous task result already consumed: {0}")]
    TaskConsumed(String),

    #[error("Unknown decision code: {0}")]
    UnknownDecision(i32),

    #[error("Local transaction error: {0}")]
    LocalTransaction(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl TxError {
    /// Whether this error was raised by the runtime rather than by the
    /// business call itself.
    pub fn is_runtime(&self) -> bool {
        !matches!(self, TxError::Business(_))
    }
}

pub type Result<T> = std::result::Result<T, TxError>;
