//! Engine facade tying storage, configuration, clock and notifications
//! together.
//!
//! Every mutation of a petition row goes through a bounded compare-and-swap
//! retry loop: the row is loaded, a pure transition is applied to the
//! snapshot, and the result is written back conditionally on the version
//! read. A counter update and the threshold side effects it triggers are
//! therefore observed together or not at all.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::counter::{self, CounterOutcome};
use crate::debate;
use crate::error::{PetitionError, Result};
use crate::lifecycle;
use crate::lock::{self, CheckoutOutcome};
use crate::model::{
    ModeratorId, NewPetition, NewSignature, Petition, PetitionId, Rejection, Signature,
    SignatureId, SignatureState,
};
use crate::notify::{Notifier, PetitionEvent};
use crate::reasons::RejectionReasonSet;
use crate::storage::{PetitionStorage, StorageError, VersionedPetition};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bounded attempts for the compare-and-swap update loop. Exhausting them
/// surfaces a transient error the caller retries wholesale.
const MAX_UPDATE_ATTEMPTS: u32 = 3;

/// Whether a transition closure wants its snapshot written back.
enum Apply<T> {
    Write(T),
    Skip(T),
}

/// The petition lifecycle engine.
///
/// All collaborator dependencies are injected: the engine owns no global
/// state and carries no ambient "current user" — every moderator action
/// takes the acting principal explicitly.
pub struct PetitionEngine {
    store: Arc<dyn PetitionStorage>,
    config: EngineConfig,
    reasons: RejectionReasonSet,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl PetitionEngine {
    pub fn new(
        store: Arc<dyn PetitionStorage>,
        config: EngineConfig,
        reasons: RejectionReasonSet,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            config,
            reasons,
            clock,
            notifier,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- petition and signature intake ---------------------------------

    /// Create a petition in `pending` state together with its distinguished
    /// creator signature (itself still pending validation).
    pub async fn create_petition(
        &self,
        collect_signatures: bool,
        creator_name: impl Into<String>,
        creator_email: impl Into<String>,
    ) -> Result<(Petition, Signature)> {
        let now = self.clock.now();
        let petition = self
            .store
            .create_petition(NewPetition {
                collect_signatures,
                created_at: now,
            })
            .await?;

        let creator = self
            .store
            .create_signature(NewSignature {
                petition_id: petition.id,
                creator: true,
                sponsor: false,
                name: creator_name.into(),
                email: creator_email.into(),
                created_at: now,
            })
            .await?;

        info!(petition_id = petition.id, collect_signatures, "petition created");
        Ok((petition, creator))
    }

    /// Record a new supporter or sponsor signature, still pending
    /// validation. Rejected once signing has ended for good.
    pub async fn add_signature(&self, new: NewSignature) -> Result<Signature> {
        let now = self.clock.now();
        let petition = self.get_petition(new.petition_id).await?;
        if petition.closed_for_signing(now) {
            return Err(PetitionError::invalid_transition(petition.state, "sign"));
        }
        Ok(self.store.create_signature(new).await?)
    }

    /// Validate the creator's signature, counting it and moving a pending
    /// petition into the sponsorship phase. Idempotent.
    pub async fn validate_creator(&self, petition_id: PetitionId) -> Result<Petition> {
        let signature = self
            .store
            .creator_signature(petition_id)
            .await?
            .ok_or(PetitionError::CreatorSignatureMissing(petition_id))?;
        self.validate_signature_record(signature).await
    }

    /// Validate a signature and count it. Idempotent for signatures that
    /// are already validated.
    pub async fn validate_signature(&self, signature_id: SignatureId) -> Result<Petition> {
        let signature = self
            .store
            .get_signature(signature_id)
            .await?
            .ok_or(PetitionError::SignatureNotFound(signature_id))?;
        self.validate_signature_record(signature).await
    }

    async fn validate_signature_record(&self, mut signature: Signature) -> Result<Petition> {
        if signature.validated() {
            return self.get_petition(signature.petition_id).await;
        }

        signature.state = SignatureState::Validated;
        signature.validated_at = Some(self.clock.now());
        self.store.update_signature(signature.clone()).await?;

        let petition = self
            .increment_signature_count(signature.petition_id, 1)
            .await?;

        if signature.creator {
            self.dispatch(PetitionEvent::CreatorValidated {
                petition: petition.clone(),
            });
        }

        Ok(petition)
    }

    /// Invalidate a signature, uncounting it if it had been validated.
    pub async fn invalidate_signature(&self, signature_id: SignatureId) -> Result<Petition> {
        let mut signature = self
            .store
            .get_signature(signature_id)
            .await?
            .ok_or(PetitionError::SignatureNotFound(signature_id))?;

        let was_validated = signature.validated();
        if signature.state != SignatureState::Invalidated {
            signature.state = SignatureState::Invalidated;
            self.store.update_signature(signature.clone()).await?;
        }

        if was_validated {
            self.decrement_signature_count(signature.petition_id, 1)
                .await
        } else {
            self.get_petition(signature.petition_id).await
        }
    }

    // ---- counter engine ------------------------------------------------

    /// Add to the stored tally and re-evaluate every threshold in the same
    /// atomic update.
    pub async fn increment_signature_count(
        &self,
        petition_id: PetitionId,
        by: u64,
    ) -> Result<Petition> {
        let now = self.clock.now();
        let config = self.config.clone();
        let (petition, outcome) = self
            .update_with_retry(petition_id, |petition| {
                Ok(Apply::Write(counter::apply_increment(
                    petition, by, &config, now,
                )))
            })
            .await?;

        self.dispatch_counter_events(&petition, outcome);
        Ok(petition)
    }

    /// Subtract from the stored tally, clearing any threshold the count
    /// drops strictly below. A tally at the creator floor is untouched.
    pub async fn decrement_signature_count(
        &self,
        petition_id: PetitionId,
        by: u64,
    ) -> Result<Petition> {
        let config = self.config.clone();
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                Ok(if counter::apply_decrement(petition, by, &config) {
                    Apply::Write(())
                } else {
                    Apply::Skip(())
                })
            })
            .await?;
        Ok(petition)
    }

    /// Overwrite the stored tally with the authoritative count of validated
    /// signatures. The designated recovery path for drift; idempotent and
    /// never an error when the counts already agree.
    pub async fn resync_signature_count(&self, petition_id: PetitionId) -> Result<Petition> {
        let actual = self.store.count_validated_signatures(petition_id).await?;
        let (petition, corrected) = self
            .update_with_retry(petition_id, |petition| {
                Ok(if petition.signature_count == actual {
                    Apply::Skip(false)
                } else {
                    petition.signature_count = actual;
                    Apply::Write(true)
                })
            })
            .await?;

        if corrected {
            info!(petition_id, count = actual, "signature count resynchronized");
        }
        Ok(petition)
    }

    // ---- moderation ----------------------------------------------------

    /// Approve a petition for publication.
    pub async fn publish(&self, petition_id: PetitionId, moderator: &ModeratorId) -> Result<Petition> {
        let now = self.clock.now();
        let config = self.config.clone();
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                lifecycle::apply_publish(petition, &config, now)?;
                lifecycle::record_moderation(petition, moderator, now);
                Ok(Apply::Write(()))
            })
            .await?;

        info!(
            petition_id,
            state = %petition.state,
            reference = petition.reference.as_deref().unwrap_or(""),
            "petition published"
        );
        self.dispatch(PetitionEvent::PetitionApproved {
            petition: petition.clone(),
        });
        Ok(petition)
    }

    /// Reject or hide a petition with a configured reason code.
    ///
    /// The code is validated before any mutation. The single Rejection row
    /// is upserted, so two concurrent moderators both succeed and the last
    /// writer's reason survives.
    pub async fn reject(
        &self,
        petition_id: PetitionId,
        moderator: &ModeratorId,
        code: &str,
        details: Option<String>,
    ) -> Result<Petition> {
        let reason = self
            .reasons
            .get(code)
            .ok_or_else(|| PetitionError::UnknownRejectionCode(code.to_string()))?
            .clone();

        let now = self.clock.now();
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                lifecycle::apply_reject(petition, &reason, now);
                lifecycle::record_moderation(petition, moderator, now);
                Ok(Apply::Write(()))
            })
            .await?;

        let rejection = Rejection {
            petition_id,
            code: reason.code.clone(),
            details: details.clone(),
            rejected_at: petition.rejected_at.unwrap_or(now),
        };
        self.store.upsert_rejection(rejection.clone()).await?;

        info!(petition_id, code = %reason.code, state = %petition.state, "petition rejected");
        self.dispatch(PetitionEvent::PetitionRejected {
            petition: petition.clone(),
            rejection,
        });
        Ok(petition)
    }

    /// Put a petition aside for senior review. Queue management rather than
    /// a moderation decision, so the audit fields stay untouched.
    pub async fn flag(&self, petition_id: PetitionId, moderator: &ModeratorId) -> Result<Petition> {
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                lifecycle::apply_flag(petition)?;
                Ok(Apply::Write(()))
            })
            .await?;
        debug!(petition_id, moderator = %moderator, "petition flagged");
        Ok(petition)
    }

    /// Return a flagged petition to the moderation queue.
    pub async fn unflag(&self, petition_id: PetitionId, moderator: &ModeratorId) -> Result<Petition> {
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                lifecycle::apply_unflag(petition)?;
                Ok(Apply::Write(()))
            })
            .await?;
        debug!(petition_id, moderator = %moderator, "petition unflagged");
        Ok(petition)
    }

    /// Republish a taken-down petition, resuming the life it had.
    pub async fn restore(&self, petition_id: PetitionId, moderator: &ModeratorId) -> Result<Petition> {
        let now = self.clock.now();
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                lifecycle::apply_restore(petition, now)?;
                lifecycle::record_moderation(petition, moderator, now);
                Ok(Apply::Write(()))
            })
            .await?;

        info!(petition_id, state = %petition.state, "petition restored");
        self.dispatch(PetitionEvent::PetitionRestored {
            petition: petition.clone(),
        });
        Ok(petition)
    }

    /// Close an open petition now. Fatal on any other state.
    pub async fn close(&self, petition_id: PetitionId) -> Result<Petition> {
        let now = self.clock.now();
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                lifecycle::apply_close(petition, now)?;
                Ok(Apply::Write(()))
            })
            .await?;

        info!(petition_id, "petition closed");
        Ok(petition)
    }

    /// Sweep: close every open petition whose closing date has passed,
    /// keeping the scheduled date as the close time. Returns how many
    /// petitions were closed.
    pub async fn close_petitions(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.store.list_open_past_closing(now).await?;
        let mut closed = 0;

        for candidate in &due {
            let id = candidate.petition.id;
            let (_, did_close) = self
                .update_with_retry(id, |petition| {
                    let deadline = match petition.closed_at {
                        Some(deadline) if deadline <= now => deadline,
                        _ => return Ok(Apply::Skip(false)),
                    };
                    if !petition.can_be_signed() {
                        // A racing close or rejection got here first.
                        return Ok(Apply::Skip(false));
                    }
                    lifecycle::apply_close(petition, deadline)?;
                    Ok(Apply::Write(true))
                })
                .await?;
            if did_close {
                closed += 1;
            }
        }

        if closed > 0 {
            info!(closed, "closed petitions past their closing date");
        }
        Ok(closed)
    }

    // ---- debate scheduling ---------------------------------------------

    /// Set or clear the scheduled debate date, re-deriving the debate
    /// sub-state. A no-op when the date is unchanged.
    pub async fn set_scheduled_debate_date(
        &self,
        petition_id: PetitionId,
        date: Option<NaiveDate>,
    ) -> Result<Petition> {
        let today = self.clock.today();
        let (petition, changed) = self
            .update_with_retry(petition_id, |petition| {
                if petition.scheduled_debate_date == date {
                    return Ok(Apply::Skip(false));
                }
                debate::apply_scheduled_date(petition, date, today);
                Ok(Apply::Write(true))
            })
            .await?;

        if changed {
            if let Some(scheduled) = date {
                self.dispatch(PetitionEvent::DebateScheduled {
                    petition: petition.clone(),
                    date: scheduled,
                });
            }
        }
        Ok(petition)
    }

    /// Record the explicit negative outcome: the petition will not be
    /// debated. Sticky; a no-op once either outcome is recorded.
    pub async fn mark_as_not_debated(&self, petition_id: PetitionId) -> Result<Petition> {
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                if petition.debate_state.concluded() {
                    return Ok(Apply::Skip(false));
                }
                petition.debate_state = crate::model::DebateState::NotDebated;
                Ok(Apply::Write(true))
            })
            .await?;
        Ok(petition)
    }

    /// Sweep: promote every scheduled petition whose debate date has passed
    /// to `debated`. Returns how many petitions were promoted.
    pub async fn mark_petitions_as_debated(&self) -> Result<usize> {
        let today = self.clock.today();
        let due = self.store.list_scheduled_debates_due(today).await?;
        let mut marked = 0;

        for candidate in &due {
            let id = candidate.petition.id;
            let (_, did_mark) = self
                .update_with_retry(id, |petition| {
                    if !debate::due_for_debate(petition, today) {
                        return Ok(Apply::Skip(false));
                    }
                    petition.debate_state = crate::model::DebateState::Debated;
                    Ok(Apply::Write(true))
                })
                .await?;
            if did_mark {
                marked += 1;
            }
        }

        if marked > 0 {
            info!(marked, "marked scheduled petitions as debated");
        }
        Ok(marked)
    }

    // ---- moderation lock -----------------------------------------------

    /// Claim the editing lock. Contention is reported as a value carrying
    /// the current holder, not an error.
    pub async fn checkout(
        &self,
        petition_id: PetitionId,
        user: &ModeratorId,
    ) -> Result<CheckoutOutcome> {
        let now = self.clock.now();
        let (_, outcome) = self
            .update_with_retry(petition_id, |petition| {
                Ok(match lock::apply_checkout(petition, user, now) {
                    outcome @ CheckoutOutcome::Acquired => Apply::Write(outcome),
                    outcome => Apply::Skip(outcome),
                })
            })
            .await?;

        if let CheckoutOutcome::HeldByOther { holder } = &outcome {
            debug!(petition_id, user = %user, holder = %holder, "checkout refused");
        }
        Ok(outcome)
    }

    /// Administrative override: claim the lock whoever holds it.
    pub async fn force_checkout(
        &self,
        petition_id: PetitionId,
        user: &ModeratorId,
    ) -> Result<Petition> {
        let now = self.clock.now();
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                lock::apply_force_checkout(petition, user, now);
                Ok(Apply::Write(()))
            })
            .await?;
        Ok(petition)
    }

    /// Keep-alive for an active editing session: refresh `locked_at` only
    /// when `user` is the current holder.
    pub async fn touch(&self, petition_id: PetitionId, user: &ModeratorId) -> Result<Petition> {
        let now = self.clock.now();
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                Ok(if lock::apply_touch(petition, user, now) {
                    Apply::Write(())
                } else {
                    Apply::Skip(())
                })
            })
            .await?;
        Ok(petition)
    }

    /// Release the lock when `user` is the current holder; no-op otherwise.
    pub async fn release(&self, petition_id: PetitionId, user: &ModeratorId) -> Result<Petition> {
        let (petition, _) = self
            .update_with_retry(petition_id, |petition| {
                Ok(if lock::apply_release(petition, user) {
                    Apply::Write(())
                } else {
                    Apply::Skip(())
                })
            })
            .await?;
        Ok(petition)
    }

    // ---- reads ---------------------------------------------------------

    pub async fn get_petition(&self, petition_id: PetitionId) -> Result<Petition> {
        Ok(self.load(petition_id).await?.petition)
    }

    pub async fn get_rejection(&self, petition_id: PetitionId) -> Result<Option<Rejection>> {
        Ok(self.store.get_rejection(petition_id).await?)
    }

    // ---- internals -----------------------------------------------------

    async fn load(&self, petition_id: PetitionId) -> Result<VersionedPetition> {
        self.store
            .get_petition(petition_id)
            .await?
            .ok_or(PetitionError::PetitionNotFound(petition_id))
    }

    /// Load, apply, conditionally write. Conflicts reload and reapply up to
    /// [`MAX_UPDATE_ATTEMPTS`] times; transition errors abort immediately
    /// with no partial mutation.
    async fn update_with_retry<T, F>(&self, petition_id: PetitionId, mut apply: F) -> Result<(Petition, T)>
    where
        F: FnMut(&mut Petition) -> Result<Apply<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let VersionedPetition {
                mut petition,
                version,
            } = self.load(petition_id).await?;

            match apply(&mut petition)? {
                Apply::Skip(value) => return Ok((petition, value)),
                Apply::Write(value) => {
                    match self
                        .store
                        .update_petition(petition_id, version, petition.clone())
                        .await
                    {
                        Ok(_) => return Ok((petition, value)),
                        Err(StorageError::Conflict(reason)) => {
                            if attempts >= MAX_UPDATE_ATTEMPTS {
                                warn!(petition_id, attempts, %reason, "petition update conflict persisted");
                                return Err(PetitionError::ConflictRetriesExhausted { attempts });
                            }
                            debug!(petition_id, attempts, "retrying petition update after conflict");
                        }
                        Err(other) => return Err(other.into()),
                    }
                }
            }
        }
    }

    fn dispatch_counter_events(&self, petition: &Petition, outcome: CounterOutcome) {
        if outcome.moderation_threshold_crossed {
            self.dispatch(PetitionEvent::ModerationThresholdReached {
                petition: petition.clone(),
            });
        }
    }

    /// Fire-and-forget notification dispatch. Failures are logged and never
    /// affect petition state.
    fn dispatch(&self, event: PetitionEvent) {
        let name = event.name();
        if let Err(err) = self.notifier.notify(event) {
            warn!(event = name, error = %err, "notification dispatch failed");
        }
    }
}
