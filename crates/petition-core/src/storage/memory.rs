//! In-memory reference implementation of the petition storage traits.
//!
//! Deterministic and test-friendly. Production deployments should use a
//! transactional backend (see the `petition-postgres` crate).

use crate::model::{
    NewPetition, NewSignature, Petition, PetitionId, PetitionState, Rejection, Signature,
    SignatureId, SignatureState,
};
use crate::storage::{
    PetitionStore, RejectionStore, SignatureStore, StorageError, StorageResult, Version,
    VersionedPetition,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

/// In-memory petition storage adapter.
#[derive(Debug, Default)]
pub struct InMemoryPetitionStore {
    petitions: RwLock<HashMap<PetitionId, (Petition, Version)>>,
    signatures: RwLock<HashMap<SignatureId, Signature>>,
    rejections: RwLock<HashMap<PetitionId, Rejection>>,
    next_petition_id: AtomicI64,
    next_signature_id: AtomicI64,
}

impl InMemoryPetitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PetitionStore for InMemoryPetitionStore {
    async fn create_petition(&self, new: NewPetition) -> StorageResult<Petition> {
        let id = self.next_petition_id.fetch_add(1, Ordering::SeqCst) + 1;
        let petition = Petition::from_new(id, &new);

        let mut guard = self
            .petitions
            .write()
            .map_err(|_| StorageError::Backend("petitions lock poisoned".to_string()))?;
        guard.insert(id, (petition.clone(), 0));
        Ok(petition)
    }

    async fn get_petition(&self, id: PetitionId) -> StorageResult<Option<VersionedPetition>> {
        let guard = self
            .petitions
            .read()
            .map_err(|_| StorageError::Backend("petitions lock poisoned".to_string()))?;
        Ok(guard.get(&id).map(|(petition, version)| VersionedPetition {
            petition: petition.clone(),
            version: *version,
        }))
    }

    async fn update_petition(
        &self,
        id: PetitionId,
        expected: Version,
        petition: Petition,
    ) -> StorageResult<Version> {
        let mut guard = self
            .petitions
            .write()
            .map_err(|_| StorageError::Backend("petitions lock poisoned".to_string()))?;
        let entry = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("petition {id}")))?;

        if entry.1 != expected {
            return Err(StorageError::Conflict(format!(
                "petition {id}: expected version {expected}, found {}",
                entry.1
            )));
        }

        entry.0 = petition;
        entry.1 += 1;
        Ok(entry.1)
    }

    async fn list_open_past_closing(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<VersionedPetition>> {
        let guard = self
            .petitions
            .read()
            .map_err(|_| StorageError::Backend("petitions lock poisoned".to_string()))?;
        let mut due = guard
            .values()
            .filter(|(petition, _)| {
                petition.state == PetitionState::Open && petition.past_closing_date(now)
            })
            .map(|(petition, version)| VersionedPetition {
                petition: petition.clone(),
                version: *version,
            })
            .collect::<Vec<_>>();
        due.sort_by_key(|item| item.petition.id);
        Ok(due)
    }

    async fn list_scheduled_debates_due(
        &self,
        date: NaiveDate,
    ) -> StorageResult<Vec<VersionedPetition>> {
        let guard = self
            .petitions
            .read()
            .map_err(|_| StorageError::Backend("petitions lock poisoned".to_string()))?;
        let mut due = guard
            .values()
            .filter(|(petition, _)| crate::debate::due_for_debate(petition, date))
            .map(|(petition, version)| VersionedPetition {
                petition: petition.clone(),
                version: *version,
            })
            .collect::<Vec<_>>();
        due.sort_by_key(|item| item.petition.id);
        Ok(due)
    }
}

#[async_trait]
impl SignatureStore for InMemoryPetitionStore {
    async fn create_signature(&self, new: NewSignature) -> StorageResult<Signature> {
        let id = self.next_signature_id.fetch_add(1, Ordering::SeqCst) + 1;
        let signature = Signature::from_new(id, &new);

        let mut guard = self
            .signatures
            .write()
            .map_err(|_| StorageError::Backend("signatures lock poisoned".to_string()))?;

        if signature.creator
            && guard
                .values()
                .any(|existing| existing.petition_id == signature.petition_id && existing.creator)
        {
            return Err(StorageError::InvariantViolation(format!(
                "petition {} already has a creator signature",
                signature.petition_id
            )));
        }

        guard.insert(id, signature.clone());
        Ok(signature)
    }

    async fn get_signature(&self, id: SignatureId) -> StorageResult<Option<Signature>> {
        let guard = self
            .signatures
            .read()
            .map_err(|_| StorageError::Backend("signatures lock poisoned".to_string()))?;
        Ok(guard.get(&id).cloned())
    }

    async fn update_signature(&self, signature: Signature) -> StorageResult<()> {
        let mut guard = self
            .signatures
            .write()
            .map_err(|_| StorageError::Backend("signatures lock poisoned".to_string()))?;
        match guard.get_mut(&signature.id) {
            Some(existing) => {
                *existing = signature;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "signature {}",
                signature.id
            ))),
        }
    }

    async fn creator_signature(&self, petition_id: PetitionId) -> StorageResult<Option<Signature>> {
        let guard = self
            .signatures
            .read()
            .map_err(|_| StorageError::Backend("signatures lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .find(|signature| signature.petition_id == petition_id && signature.creator)
            .cloned())
    }

    async fn count_validated_signatures(&self, petition_id: PetitionId) -> StorageResult<u64> {
        let guard = self
            .signatures
            .read()
            .map_err(|_| StorageError::Backend("signatures lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .filter(|signature| {
                signature.petition_id == petition_id && signature.state == SignatureState::Validated
            })
            .count() as u64)
    }
}

#[async_trait]
impl RejectionStore for InMemoryPetitionStore {
    async fn upsert_rejection(&self, rejection: Rejection) -> StorageResult<()> {
        let mut guard = self
            .rejections
            .write()
            .map_err(|_| StorageError::Backend("rejections lock poisoned".to_string()))?;
        guard.insert(rejection.petition_id, rejection);
        Ok(())
    }

    async fn get_rejection(&self, petition_id: PetitionId) -> StorageResult<Option<Rejection>> {
        let guard = self
            .rejections
            .read()
            .map_err(|_| StorageError::Backend("rejections lock poisoned".to_string()))?;
        Ok(guard.get(&petition_id).cloned())
    }
}
