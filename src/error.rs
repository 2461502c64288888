use crate::store::StoreError;
use crate::types::RoomId;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort a step of a match run
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("prompt catalog exhausted for room {0}")]
    PromptCatalogExhausted(RoomId),

    #[error("lease for room {0} was lost to another orchestrator")]
    LeaseLost(RoomId),
}

impl EngineError {
    /// Whether restarting the match run could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}
