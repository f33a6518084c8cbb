use crate::model::{PetitionId, PetitionState, SignatureId};
use crate::storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PetitionError>;

/// Petition engine errors.
#[derive(Debug, Error)]
pub enum PetitionError {
    #[error("petition {0} not found")]
    PetitionNotFound(PetitionId),

    #[error("signature {0} not found")]
    SignatureNotFound(SignatureId),

    #[error("petition {0} has no creator signature")]
    CreatorSignatureMissing(PetitionId),

    #[error("cannot {action} a petition in state '{from}'")]
    InvalidTransition {
        from: PetitionState,
        action: &'static str,
    },

    #[error("unknown rejection code '{0}'")]
    UnknownRejectionCode(String),

    #[error("concurrent update conflict persisted after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PetitionError {
    pub fn invalid_transition(from: PetitionState, action: &'static str) -> Self {
        Self::InvalidTransition { from, action }
    }

    /// Transient errors are safe for the caller to retry wholesale.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConflictRetriesExhausted { .. })
    }
}
