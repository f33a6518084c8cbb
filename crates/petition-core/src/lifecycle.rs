use crate::config::EngineConfig;
use crate::error::PetitionError;
use crate::model::{ModeratorId, Petition, PetitionState};
use crate::reasons::RejectionReason;
use chrono::{DateTime, Utc};

/// Open a moderated petition for signing, or close it immediately when it
/// does not collect signatures (paper petitions enter the system already
/// signed).
///
/// The public reference is assigned here, exactly once; a petition taken
/// down and republished keeps the reference it already has.
pub(crate) fn apply_publish(
    petition: &mut Petition,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<(), PetitionError> {
    if !matches!(
        petition.state,
        PetitionState::Validated | PetitionState::Sponsored | PetitionState::Flagged
    ) {
        return Err(PetitionError::invalid_transition(petition.state, "publish"));
    }

    if petition.reference.is_none() {
        petition.reference = Some(format!("P-{:05}", petition.id));
    }
    petition.open_at = Some(now);

    if petition.collect_signatures {
        petition.state = PetitionState::Open;
        petition.closed_at = Some(now + config.petition_duration);
    } else {
        petition.state = PetitionState::Closed;
    }

    Ok(())
}

/// Record the rejection outcome on the petition row itself. The Rejection
/// record is upserted separately by the engine.
///
/// Re-rejecting with a different reason is allowed from any state (this is
/// how an already-hidden petition is reclassified), and keeps the first
/// `rejected_at`.
pub(crate) fn apply_reject(petition: &mut Petition, reason: &RejectionReason, now: DateTime<Utc>) {
    petition.state = reason.target_state();
    if petition.rejected_at.is_none() {
        petition.rejected_at = Some(now);
    }
}

pub(crate) fn apply_flag(petition: &mut Petition) -> Result<(), PetitionError> {
    if !matches!(
        petition.state,
        PetitionState::Validated | PetitionState::Sponsored
    ) {
        return Err(PetitionError::invalid_transition(petition.state, "flag"));
    }
    petition.state = PetitionState::Flagged;
    Ok(())
}

pub(crate) fn apply_unflag(petition: &mut Petition) -> Result<(), PetitionError> {
    if petition.state != PetitionState::Flagged {
        return Err(PetitionError::invalid_transition(petition.state, "unflag"));
    }
    petition.state = PetitionState::Sponsored;
    Ok(())
}

/// Republish a taken-down petition.
///
/// `open_at` and `closed_at` are deliberately untouched: the petition
/// resumes the life it had, restoring to `closed` when its closing date has
/// passed (or when it never collected signatures), else back to `open`.
pub(crate) fn apply_restore(
    petition: &mut Petition,
    now: DateTime<Utc>,
) -> Result<(), PetitionError> {
    if !matches!(
        petition.state,
        PetitionState::Rejected | PetitionState::Hidden
    ) {
        return Err(PetitionError::invalid_transition(petition.state, "restore"));
    }
    if !petition.has_ever_been_open() {
        return Err(PetitionError::invalid_transition(petition.state, "restore"));
    }

    petition.state = if !petition.collect_signatures || petition.past_closing_date(now) {
        PetitionState::Closed
    } else {
        PetitionState::Open
    };

    Ok(())
}

/// Close an open petition. Fatal on any other state, including a second
/// close of the same petition.
pub(crate) fn apply_close(petition: &mut Petition, at: DateTime<Utc>) -> Result<(), PetitionError> {
    if petition.state != PetitionState::Open {
        return Err(PetitionError::invalid_transition(petition.state, "close"));
    }
    petition.state = PetitionState::Closed;
    petition.closed_at = Some(at);
    Ok(())
}

/// Stamp the moderation audit fields for a direct human decision.
///
/// The lag is computed and frozen the first time a petition is moderated;
/// later decisions never recompute it.
pub(crate) fn record_moderation(petition: &mut Petition, moderator: &ModeratorId, now: DateTime<Utc>) {
    petition.moderated_by = Some(moderator.clone());
    if petition.moderation_lag.is_none() {
        if let Some(reached_at) = petition.moderation_threshold_reached_at {
            petition.moderation_lag = Some((now - reached_at).num_days());
        }
    }
}
