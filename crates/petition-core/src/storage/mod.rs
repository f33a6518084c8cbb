//! Storage abstractions for the petition engine.
//!
//! Backends must provide a row-version compare-and-swap on petition rows:
//! the engine layers a bounded retry loop on top of it so counter updates
//! and their threshold side effects commit atomically under concurrent
//! writers.

use crate::model::{
    NewPetition, NewSignature, Petition, PetitionId, Rejection, Signature, SignatureId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

pub mod memory;

pub type StorageResult<T> = Result<T, StorageError>;

/// Monotonic per-row version used for optimistic concurrency.
pub type Version = u64;

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A petition row together with its optimistic-concurrency version.
#[derive(Debug, Clone)]
pub struct VersionedPetition {
    pub petition: Petition,
    pub version: Version,
}

/// Storage interface for petition rows.
#[async_trait]
pub trait PetitionStore: Send + Sync {
    /// Insert a new petition row and assign its identifier.
    async fn create_petition(&self, new: NewPetition) -> StorageResult<Petition>;

    async fn get_petition(&self, id: PetitionId) -> StorageResult<Option<VersionedPetition>>;

    /// Conditionally replace a petition row.
    ///
    /// Fails with [`StorageError::Conflict`] when the stored version no
    /// longer matches `expected`; the caller reloads and reapplies.
    async fn update_petition(
        &self,
        id: PetitionId,
        expected: Version,
        petition: Petition,
    ) -> StorageResult<Version>;

    /// Open petitions whose closing date is on or before `now`.
    async fn list_open_past_closing(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<VersionedPetition>>;

    /// Petitions scheduled for a debate on or before `date`.
    async fn list_scheduled_debates_due(
        &self,
        date: NaiveDate,
    ) -> StorageResult<Vec<VersionedPetition>>;
}

/// Storage interface for signature rows.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    async fn create_signature(&self, new: NewSignature) -> StorageResult<Signature>;

    async fn get_signature(&self, id: SignatureId) -> StorageResult<Option<Signature>>;

    async fn update_signature(&self, signature: Signature) -> StorageResult<()>;

    /// The distinguished creator signature for a petition.
    async fn creator_signature(&self, petition_id: PetitionId) -> StorageResult<Option<Signature>>;

    /// Authoritative count of validated signatures, for drift correction.
    async fn count_validated_signatures(&self, petition_id: PetitionId) -> StorageResult<u64>;
}

/// Storage interface for rejection records.
#[async_trait]
pub trait RejectionStore: Send + Sync {
    /// Insert or replace the one rejection row for a petition.
    ///
    /// Concurrent upserts for the same petition must both succeed (last
    /// writer wins) rather than surface a uniqueness violation.
    async fn upsert_rejection(&self, rejection: Rejection) -> StorageResult<()>;

    async fn get_rejection(&self, petition_id: PetitionId) -> StorageResult<Option<Rejection>>;
}

/// Unified storage bundle consumed by the engine.
pub trait PetitionStorage: PetitionStore + SignatureStore + RejectionStore + Send + Sync {}

impl<T> PetitionStorage for T where T: PetitionStore + SignatureStore + RejectionStore + Send + Sync {}
